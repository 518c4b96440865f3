//! HTTP request handlers
//!
//! Thin translation layer: extract the request, validate the anti-forgery
//! token on mutating calls, delegate to the orchestrator, and map its
//! outcome onto the wire. Unauthenticated access to a protected operation
//! is a 401, a forbidden one a 403 — never a redirect, since this surface
//! is consumed by a programmatic client.

mod auth;
mod passkey;
mod password;
mod two_factor;

pub use auth::{
    antiforgery_token, change_email, confirm_email, confirm_email_change, current_user, health,
    login, logout, register,
};
pub use passkey::{
    add_passkey_complete, add_passkey_options, delete_passkey, list_passkeys, passkey_assertion,
    passkey_assertion_options, register_passwordless, resend_passkey_verification,
    setup_passkey_complete, setup_passkey_options, verify_passkey_email,
};
pub use password::{change_password, forgot_password, reset_password};
pub use two_factor::{
    disable_two_factor, enable_two_factor, send_two_factor_email_code, update_two_factor_method,
    verify_two_factor,
};

use actix_web::{HttpRequest, HttpResponse};
use uuid::Uuid;

use crate::csrf::CsrfGuard;
use crate::models::LoginResponse;
use crate::orchestrator::{AuthError, AuthOrchestrator, LoginOutcome};
use crate::utils::responses::ResponseBuilder;

/// Validate the anti-forgery token on a mutating call
///
/// # Errors
/// Returns the cached 400 rejection the client recognizes for its single
/// refresh-and-retry.
fn guard_csrf(req: &HttpRequest, csrf: &CsrfGuard) -> Result<(), HttpResponse> {
    csrf.validate(req).map_err(|_| {
        log::debug!("rejected mutating call with invalid anti-forgery token");
        ResponseBuilder::csrf_rejected()
    })
}

/// Resolve the caller's fully authenticated account id
///
/// # Errors
/// Returns a 401 when the session is anonymous or only partially
/// authenticated.
fn require_authenticated(
    req: &HttpRequest,
    orchestrator: &AuthOrchestrator,
) -> Result<Uuid, HttpResponse> {
    orchestrator
        .sessions()
        .resolve(req, orchestrator.accounts())
        .authenticated_account()
        .ok_or_else(|| ResponseBuilder::unauthorized().build())
}

/// Resolve the caller's partially authenticated account id (2FA pending)
///
/// # Errors
/// Returns a 401 when no step-up is in progress.
fn require_partial(
    req: &HttpRequest,
    orchestrator: &AuthOrchestrator,
) -> Result<Uuid, HttpResponse> {
    orchestrator
        .sessions()
        .resolve(req, orchestrator.accounts())
        .pending_account()
        .ok_or_else(|| ResponseBuilder::unauthorized().build())
}

/// Map an orchestrator error onto the wire
///
/// Specific kinds are logged internally; callers get the generic message
/// for their class.
fn error_response(err: &AuthError) -> HttpResponse {
    match err {
        AuthError::InvalidCredentials => {
            ResponseBuilder::authentication_failed("Invalid credentials")
        }
        AuthError::LockedOut => ResponseBuilder::ok(&LoginResponse::locked_out()),
        AuthError::AccountNotConfirmed => ResponseBuilder::bad_request()
            .with_error_code("not_confirmed")
            .with_message("The account email address is not confirmed")
            .build(),
        AuthError::CodeExpiredOrInvalid => ResponseBuilder::bad_request()
            .with_error_code("code_invalid")
            .with_message("The verification code is invalid")
            .build(),
        AuthError::TokenExpiredOrInvalid => ResponseBuilder::bad_request()
            .with_error_code("token_invalid")
            .with_message("The token is invalid")
            .build(),
        AuthError::Ceremony(ceremony_err) => {
            log::warn!("ceremony failed: {}", ceremony_err.kind());
            ResponseBuilder::authentication_failed("Authentication failed")
        }
        AuthError::Conflict(msg) => ResponseBuilder::conflict().with_message(msg).build(),
        AuthError::Validation(msg) => ResponseBuilder::invalid_field("request", msg),
        AuthError::Unauthorized => ResponseBuilder::unauthorized().build(),
        AuthError::Forbidden => ResponseBuilder::forbidden().build(),
        AuthError::Internal(msg) => {
            log::error!("internal error: {msg}");
            ResponseBuilder::internal_server_error().build()
        }
    }
}

/// Turn a first-factor outcome into a response, issuing session cookies
fn login_outcome_response(
    orchestrator: &AuthOrchestrator,
    outcome: LoginOutcome,
) -> HttpResponse {
    match outcome {
        LoginOutcome::Authenticated { account, remember } => {
            match orchestrator.sessions().issue_authenticated(&account, remember) {
                Ok(cookie) => HttpResponse::Ok()
                    .cookie(cookie)
                    .json(LoginResponse::success()),
                Err(err) => {
                    log::error!("failed to issue session cookie: {err}");
                    ResponseBuilder::internal_server_error().build()
                }
            }
        }
        LoginOutcome::RequiresTwoFactor { account } => {
            match orchestrator.sessions().issue_partial(&account) {
                Ok(cookie) => HttpResponse::Ok()
                    .cookie(cookie)
                    .json(LoginResponse::requires_two_factor()),
                Err(err) => {
                    log::error!("failed to issue session cookie: {err}");
                    ResponseBuilder::internal_server_error().build()
                }
            }
        }
        LoginOutcome::LockedOut => ResponseBuilder::ok(&LoginResponse::locked_out()),
        LoginOutcome::NotAllowed => ResponseBuilder::ok(&LoginResponse::not_allowed()),
        LoginOutcome::Invalid => {
            ResponseBuilder::ok(&LoginResponse::failure("Invalid login attempt"))
        }
    }
}
