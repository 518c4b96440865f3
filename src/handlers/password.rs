//! Password lifecycle handlers: forgot, reset, change

use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;

use super::{error_response, guard_csrf, require_authenticated};
use crate::csrf::CsrfGuard;
use crate::models::ApiResponse;
use crate::orchestrator::AuthOrchestrator;
use crate::utils::responses::ResponseBuilder;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub email: String,
    pub code: String,
    pub password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

/// `POST /auth/password/forgot`
///
/// Always the uniform success shape; whether a reset link actually went
/// out never reaches the response.
pub async fn forgot_password(
    req: HttpRequest,
    data: web::Json<ForgotPasswordRequest>,
    orchestrator: web::Data<AuthOrchestrator>,
    csrf: web::Data<CsrfGuard>,
) -> HttpResponse {
    if let Err(resp) = guard_csrf(&req, &csrf) {
        return resp;
    }

    orchestrator.forgot_password(&data.email);
    ResponseBuilder::uniform_success()
}

/// `POST /auth/password/reset` — consume a reset token
///
/// On success every previously issued session for the account is
/// invalidated, not merely the current one.
pub async fn reset_password(
    req: HttpRequest,
    data: web::Json<ResetPasswordRequest>,
    orchestrator: web::Data<AuthOrchestrator>,
    csrf: web::Data<CsrfGuard>,
) -> HttpResponse {
    if let Err(resp) = guard_csrf(&req, &csrf) {
        return resp;
    }

    match orchestrator.reset_password(&data.email, &data.code, &data.password) {
        Ok(()) => ResponseBuilder::ok(&ApiResponse::success(Some("Password has been reset"))),
        Err(err) => error_response(&err),
    }
}

/// `POST /auth/password/change` — authenticated password change
///
/// Re-validates the current password, rotates the security stamp, and
/// re-issues only the calling session's cookie.
pub async fn change_password(
    req: HttpRequest,
    data: web::Json<ChangePasswordRequest>,
    orchestrator: web::Data<AuthOrchestrator>,
    csrf: web::Data<CsrfGuard>,
) -> HttpResponse {
    if let Err(resp) = guard_csrf(&req, &csrf) {
        return resp;
    }
    let account_id = match require_authenticated(&req, &orchestrator) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match orchestrator.change_password(account_id, &data.current_password, &data.new_password) {
        Ok(account) => match orchestrator.sessions().issue_authenticated(&account, false) {
            Ok(cookie) => HttpResponse::Ok()
                .cookie(cookie)
                .json(ApiResponse::success(Some("Password changed successfully"))),
            Err(err) => {
                log::error!("failed to re-issue session cookie: {err}");
                ResponseBuilder::internal_server_error().build()
            }
        },
        Err(err) => error_response(&err),
    }
}
