//! Passkey handlers: assertion login, passwordless signup with email
//! verification and enrollment tokens, and credential management
//!
//! Ceremony state never rides the response: `begin` handlers store it in
//! the keyed store under a random ceremony id delivered in an HttpOnly
//! cookie, so another session can neither read nor replay it.

use actix_web::cookie::{time as cookie_time, Cookie, SameSite};
use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::{error_response, guard_csrf, login_outcome_response, require_authenticated};
use crate::csrf::CsrfGuard;
use crate::models::{ApiResponse, LoginResponse};
use crate::orchestrator::AuthOrchestrator;
use crate::utils::responses::ResponseBuilder;
use crate::webauthn::{AssertionResponse, RegistrationResponse};

/// Cookie binding a ceremony to the browser that began it
pub const CEREMONY_COOKIE: &str = "gh_ceremony";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionOptionsRequest {
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordlessRegisterRequest {
    pub email: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyEmailRequest {
    pub user_id: Uuid,
    pub code: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResendRequest {
    pub user_id: Uuid,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupOptionsRequest {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupRegisterRequest {
    pub user_id: Uuid,
    pub token: String,
    pub credential: RegistrationResponse,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletePasskeyRequest {
    pub id: String,
}

fn ceremony_cookie(ceremony_id: &str, secure: bool, ttl_seconds: u64) -> Cookie<'static> {
    Cookie::build(CEREMONY_COOKIE, ceremony_id.to_string())
        .path("/auth/passkey")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .max_age(cookie_time::Duration::seconds(
            i64::try_from(ttl_seconds).unwrap_or(60),
        ))
        .finish()
}

fn take_ceremony_id(req: &HttpRequest) -> Option<String> {
    req.cookie(CEREMONY_COOKIE)
        .map(|cookie| cookie.value().to_string())
}

/// `POST /auth/passkey/request-options` — begin an assertion ceremony
///
/// An unknown email produces the same discoverable-flow options as no
/// email at all.
pub async fn passkey_assertion_options(
    req: HttpRequest,
    data: web::Json<AssertionOptionsRequest>,
    orchestrator: web::Data<AuthOrchestrator>,
    csrf: web::Data<CsrfGuard>,
) -> HttpResponse {
    if let Err(resp) = guard_csrf(&req, &csrf) {
        return resp;
    }

    let (options, ceremony_id) = orchestrator.begin_passkey_login(data.email.as_deref());
    HttpResponse::Ok()
        .cookie(ceremony_cookie(
            &ceremony_id,
            orchestrator.cookie_secure(),
            orchestrator.challenge_ttl_seconds(),
        ))
        .json(options)
}

/// `POST /auth/passkey/authenticate` — complete an assertion ceremony
pub async fn passkey_assertion(
    req: HttpRequest,
    data: web::Json<AssertionResponse>,
    orchestrator: web::Data<AuthOrchestrator>,
    csrf: web::Data<CsrfGuard>,
) -> HttpResponse {
    if let Err(resp) = guard_csrf(&req, &csrf) {
        return resp;
    }
    let Some(ceremony_id) = take_ceremony_id(&req) else {
        return ceremony_missing();
    };

    let outcome = orchestrator.complete_passkey_login(&ceremony_id, &data);
    login_outcome_response(&orchestrator, outcome)
}

/// `POST /auth/passkey/register-passwordless` — begin a passwordless signup
///
/// The response shape is identical for new and already registered emails.
pub async fn register_passwordless(
    req: HttpRequest,
    data: web::Json<PasswordlessRegisterRequest>,
    orchestrator: web::Data<AuthOrchestrator>,
    csrf: web::Data<CsrfGuard>,
) -> HttpResponse {
    if let Err(resp) = guard_csrf(&req, &csrf) {
        return resp;
    }

    let account_id = orchestrator.register_passwordless(&data.email);
    HttpResponse::Ok().json(json!({
        "succeeded": true,
        "userId": account_id,
    }))
}

/// `POST /auth/passkey/verify-email` — submit the emailed signup code
///
/// Success confirms the address and returns the single-use enrollment
/// token gating passkey creation.
pub async fn verify_passkey_email(
    req: HttpRequest,
    data: web::Json<VerifyEmailRequest>,
    orchestrator: web::Data<AuthOrchestrator>,
    csrf: web::Data<CsrfGuard>,
) -> HttpResponse {
    if let Err(resp) = guard_csrf(&req, &csrf) {
        return resp;
    }

    match orchestrator.verify_email(data.user_id, &data.code) {
        Ok(token) => HttpResponse::Ok().json(json!({
            "succeeded": true,
            "token": token,
        })),
        Err(err) => error_response(&err),
    }
}

/// `POST /auth/passkey/resend-verification` — re-send the signup code
///
/// Non-disclosing: absent and already confirmed accounts get the same
/// shape as a real resend.
pub async fn resend_passkey_verification(
    req: HttpRequest,
    data: web::Json<ResendRequest>,
    orchestrator: web::Data<AuthOrchestrator>,
    csrf: web::Data<CsrfGuard>,
) -> HttpResponse {
    if let Err(resp) = guard_csrf(&req, &csrf) {
        return resp;
    }

    orchestrator.resend_verification(data.user_id);
    ResponseBuilder::uniform_success()
}

/// `POST /auth/passkey/setup-creation-options` — creation options for the
/// enrollment ceremony, gated by an outstanding enrollment token
pub async fn setup_passkey_options(
    req: HttpRequest,
    data: web::Json<SetupOptionsRequest>,
    orchestrator: web::Data<AuthOrchestrator>,
    csrf: web::Data<CsrfGuard>,
) -> HttpResponse {
    if let Err(resp) = guard_csrf(&req, &csrf) {
        return resp;
    }

    match orchestrator.begin_setup_passkey(data.user_id, &data.token) {
        Ok((options, ceremony_id)) => HttpResponse::Ok()
            .cookie(ceremony_cookie(
                &ceremony_id,
                orchestrator.cookie_secure(),
                orchestrator.challenge_ttl_seconds(),
            ))
            .json(options),
        Err(err) => error_response(&err),
    }
}

/// `POST /auth/passkey/setup-register` — redeem the enrollment token and
/// complete the ceremony; success signs the new account in immediately
pub async fn setup_passkey_complete(
    req: HttpRequest,
    data: web::Json<SetupRegisterRequest>,
    orchestrator: web::Data<AuthOrchestrator>,
    csrf: web::Data<CsrfGuard>,
) -> HttpResponse {
    if let Err(resp) = guard_csrf(&req, &csrf) {
        return resp;
    }
    let Some(ceremony_id) = take_ceremony_id(&req) else {
        return ceremony_missing();
    };

    match orchestrator.setup_passkey(data.user_id, &data.token, &ceremony_id, &data.credential) {
        Ok(account) => match orchestrator.sessions().issue_authenticated(&account, false) {
            Ok(cookie) => HttpResponse::Ok()
                .cookie(cookie)
                .json(LoginResponse::success()),
            Err(err) => {
                log::error!("failed to issue session cookie: {err}");
                ResponseBuilder::internal_server_error().build()
            }
        },
        Err(err) => error_response(&err),
    }
}

/// `POST /auth/passkey/creation-options` — begin adding a passkey to an
/// authenticated account
pub async fn add_passkey_options(
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

    match orchestrator.begin_add_passkey(account_id) {
        Ok((options, ceremony_id)) => HttpResponse::Ok()
            .cookie(ceremony_cookie(
                &ceremony_id,
                orchestrator.cookie_secure(),
                orchestrator.challenge_ttl_seconds(),
            ))
            .json(options),
        Err(err) => error_response(&err),
    }
}

/// `POST /auth/passkey/register` — complete adding a passkey to an
/// authenticated account
pub async fn add_passkey_complete(
    req: HttpRequest,
    data: web::Json<RegistrationResponse>,
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
    let Some(ceremony_id) = take_ceremony_id(&req) else {
        return ceremony_missing();
    };

    match orchestrator.add_passkey(account_id, &ceremony_id, &data) {
        Ok(()) => ResponseBuilder::ok(&ApiResponse::success(Some(
            "Passkey registered successfully",
        ))),
        Err(err) => error_response(&err),
    }
}

/// `GET /auth/passkey/list`
pub async fn list_passkeys(
    req: HttpRequest,
    orchestrator: web::Data<AuthOrchestrator>,
) -> HttpResponse {
    let account_id = match require_authenticated(&req, &orchestrator) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    ResponseBuilder::ok(&orchestrator.list_passkeys(account_id))
}

/// `POST /auth/passkey/delete`
pub async fn delete_passkey(
    req: HttpRequest,
    data: web::Json<DeletePasskeyRequest>,
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

    match orchestrator.delete_passkey(account_id, &data.id) {
        Ok(()) => ResponseBuilder::ok(&ApiResponse::success(Some(
            "Passkey deleted",
        ))),
        Err(err) => error_response(&err),
    }
}

fn ceremony_missing() -> HttpResponse {
    ResponseBuilder::bad_request()
        .with_error_code("ceremony_missing")
        .with_message("No ceremony in progress")
        .build()
}
