//! Two-factor handlers: step-up verification, email-code delivery, and
//! management of the preferred method

use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use super::{error_response, guard_csrf, require_authenticated, require_partial};
use crate::csrf::CsrfGuard;
use crate::models::{ApiResponse, LoginResponse, TwoFactorMethod};
use crate::orchestrator::AuthOrchestrator;
use crate::two_factor::StepUpOutcome;
use crate::utils::responses::ResponseBuilder;

#[derive(Deserialize)]
pub struct VerifyRequest {
    pub code: String,
}

#[derive(Deserialize)]
pub struct MethodRequest {
    pub method: i32,
}

/// `POST /auth/2fa/verify` — submit the second factor
///
/// Success promotes the partial session to authenticated; failures route
/// through the shared lockout counter.
pub async fn verify_two_factor(
    req: HttpRequest,
    data: web::Json<VerifyRequest>,
    orchestrator: web::Data<AuthOrchestrator>,
    csrf: web::Data<CsrfGuard>,
) -> HttpResponse {
    if let Err(resp) = guard_csrf(&req, &csrf) {
        return resp;
    }
    let account_id = match require_partial(&req, &orchestrator) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match orchestrator.verify_two_factor(account_id, &data.code) {
        StepUpOutcome::Success => {
            let Some(account) = orchestrator.find_account(account_id) else {
                return ResponseBuilder::unauthorized().build();
            };
            match orchestrator.sessions().issue_authenticated(&account, false) {
                Ok(cookie) => {
                    log::info!("account {account_id} completed two-factor login");
                    HttpResponse::Ok()
                        .cookie(cookie)
                        .json(LoginResponse::success())
                }
                Err(err) => {
                    log::error!("failed to issue session cookie: {err}");
                    ResponseBuilder::internal_server_error().build()
                }
            }
        }
        StepUpOutcome::LockedOut => ResponseBuilder::ok(&LoginResponse::locked_out()),
        StepUpOutcome::Invalid => {
            ResponseBuilder::ok(&LoginResponse::failure("Invalid authenticator code"))
        }
    }
}

/// `POST /auth/2fa/send-email-code` — deliver a fresh emailed code to a
/// partially authenticated principal
pub async fn send_two_factor_email_code(
    req: HttpRequest,
    orchestrator: web::Data<AuthOrchestrator>,
    csrf: web::Data<CsrfGuard>,
) -> HttpResponse {
    if let Err(resp) = guard_csrf(&req, &csrf) {
        return resp;
    }
    let account_id = match require_partial(&req, &orchestrator) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match orchestrator.send_two_factor_code(account_id) {
        Ok(()) => ResponseBuilder::ok(&ApiResponse::success(Some("Verification code sent"))),
        Err(err) => error_response(&err),
    }
}

/// `POST /auth/2fa/enable` — turn on a second factor
///
/// The authenticator method returns enrollment material (secret and
/// otpauth URL) for the authenticator app.
pub async fn enable_two_factor(
    req: HttpRequest,
    data: web::Json<MethodRequest>,
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
    let Some(method) = TwoFactorMethod::from_wire(data.method) else {
        return ResponseBuilder::invalid_field("method", "unknown 2FA method");
    };

    match orchestrator.enable_two_factor(account_id, method) {
        Ok(Some(enrollment)) => ResponseBuilder::ok(&json!({
            "succeeded": true,
            "sharedKey": enrollment.secret,
            "authenticatorUri": enrollment.otpauth_url,
        })),
        Ok(None) => ResponseBuilder::ok(&ApiResponse::success(Some(
            "Two-factor authentication enabled",
        ))),
        Err(err) => error_response(&err),
    }
}

/// `POST /auth/2fa/disable`
pub async fn disable_two_factor(
    req: HttpRequest,
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

    match orchestrator.disable_two_factor(account_id) {
        Ok(()) => ResponseBuilder::ok(&ApiResponse::success(Some(
            "Two-factor authentication disabled",
        ))),
        Err(err) => error_response(&err),
    }
}

/// `POST /auth/2fa/update-method` — change the preferred second factor
pub async fn update_two_factor_method(
    req: HttpRequest,
    data: web::Json<MethodRequest>,
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
    let Some(method) = TwoFactorMethod::from_wire(data.method) else {
        return ResponseBuilder::invalid_field("method", "unknown 2FA method");
    };

    match orchestrator.update_two_factor_method(account_id, method) {
        Ok(()) => ResponseBuilder::ok(&ApiResponse::success(Some("Preferred method updated"))),
        Err(err) => error_response(&err),
    }
}
