//! Core authentication handlers: anti-forgery, login, registration,
//! confirmation, logout, and the current-principal endpoint

use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::{error_response, guard_csrf, login_outcome_response, require_authenticated};
use crate::csrf::CsrfGuard;
use crate::models::ApiResponse;
use crate::orchestrator::AuthOrchestrator;
use crate::utils::responses::ResponseBuilder;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub remember_me: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEmailRequest {
    pub new_email: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkTokenQuery {
    pub user_id: Uuid,
    pub code: String,
}

/// Health check
pub async fn health() -> HttpResponse {
    ResponseBuilder::ok(&json!({
        "status": "ok",
        "version": crate::VERSION,
    }))
}

/// `GET /auth/antiforgery` — issue a session-bound anti-forgery token
pub async fn antiforgery_token(csrf: web::Data<CsrfGuard>) -> HttpResponse {
    let (token, cookie) = csrf.issue();
    HttpResponse::Ok()
        .cookie(cookie)
        .json(json!({ "token": token }))
}

/// `GET /auth/user` — the current principal
pub async fn current_user(
    req: HttpRequest,
    orchestrator: web::Data<AuthOrchestrator>,
) -> HttpResponse {
    let account_id = match require_authenticated(&req, &orchestrator) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match orchestrator.user_info(account_id) {
        Some(info) => ResponseBuilder::ok(&info),
        None => ResponseBuilder::unauthorized().build(),
    }
}

/// `POST /auth/login` — password login
pub async fn login(
    req: HttpRequest,
    data: web::Json<LoginRequest>,
    orchestrator: web::Data<AuthOrchestrator>,
    csrf: web::Data<CsrfGuard>,
) -> HttpResponse {
    if let Err(resp) = guard_csrf(&req, &csrf) {
        return resp;
    }
    if data.email.is_empty() || data.password.is_empty() {
        return ResponseBuilder::missing_field("email or password");
    }

    let outcome = orchestrator.login(&data.email, &data.password, data.remember_me);
    login_outcome_response(&orchestrator, outcome)
}

/// `POST /auth/register` — password registration
pub async fn register(
    req: HttpRequest,
    data: web::Json<RegisterRequest>,
    orchestrator: web::Data<AuthOrchestrator>,
    csrf: web::Data<CsrfGuard>,
) -> HttpResponse {
    if let Err(resp) = guard_csrf(&req, &csrf) {
        return resp;
    }

    match orchestrator.register(&data.email, &data.password) {
        Ok(()) => ResponseBuilder::ok(&ApiResponse::success(Some(
            "Registration successful. Please check your email to confirm your account.",
        ))),
        Err(err) => error_response(&err),
    }
}

/// `GET /auth/confirm-email` — consume an emailed confirmation token
pub async fn confirm_email(
    query: web::Query<LinkTokenQuery>,
    orchestrator: web::Data<AuthOrchestrator>,
) -> HttpResponse {
    match orchestrator.confirm_email(query.user_id, &query.code) {
        Ok(()) => ResponseBuilder::ok(&ApiResponse::success(Some("Email confirmed"))),
        Err(err) => error_response(&err),
    }
}

/// `POST /auth/logout` — explicit return to anonymous
pub async fn logout(
    req: HttpRequest,
    orchestrator: web::Data<AuthOrchestrator>,
    csrf: web::Data<CsrfGuard>,
) -> HttpResponse {
    if let Err(resp) = guard_csrf(&req, &csrf) {
        return resp;
    }
    if let Err(resp) = require_authenticated(&req, &orchestrator) {
        return resp;
    }

    log::info!("user logged out");
    HttpResponse::Ok()
        .cookie(orchestrator.sessions().clear_cookie())
        .json(ApiResponse::success(None))
}

/// `POST /auth/email/change` — request an email change
pub async fn change_email(
    req: HttpRequest,
    data: web::Json<ChangeEmailRequest>,
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

    match orchestrator.change_email(account_id, &data.new_email) {
        Ok(()) => ResponseBuilder::ok(&ApiResponse::success(Some(
            "Verification email sent. Please check your inbox.",
        ))),
        Err(err) => error_response(&err),
    }
}

/// `GET /auth/confirm-email-change` — consume an email-change token
///
/// Rotates the security stamp: the caller's other sessions die with the
/// old address.
pub async fn confirm_email_change(
    req: HttpRequest,
    query: web::Query<LinkTokenQuery>,
    orchestrator: web::Data<AuthOrchestrator>,
) -> HttpResponse {
    let caller = require_authenticated(&req, &orchestrator).ok();

    match orchestrator.confirm_email_change(query.user_id, &query.code) {
        Ok(()) => {
            // Re-issue the confirming session's cookie under the new stamp;
            // every other session for this account is now stale
            if caller == Some(query.user_id) {
                if let Some(account) = orchestrator.find_account(query.user_id) {
                    if let Ok(cookie) =
                        orchestrator.sessions().issue_authenticated(&account, false)
                    {
                        return HttpResponse::Ok()
                            .cookie(cookie)
                            .json(ApiResponse::success(Some("Email changed")));
                    }
                }
            }
            ResponseBuilder::ok(&ApiResponse::success(Some("Email changed")))
        }
        Err(err) => error_response(&err),
    }
}
