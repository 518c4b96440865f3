#![warn(clippy::pedantic)]
#![allow(clippy::multiple_crate_versions)]

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use gatehouse::{
    csrf::CsrfGuard,
    handlers::{
        add_passkey_complete, add_passkey_options, antiforgery_token, change_email,
        change_password, confirm_email, confirm_email_change, current_user, delete_passkey,
        disable_two_factor, enable_two_factor, forgot_password, health, list_passkeys, login,
        logout, passkey_assertion, passkey_assertion_options, register, register_passwordless,
        resend_passkey_verification, reset_password, send_two_factor_email_code,
        setup_passkey_complete, setup_passkey_options, update_two_factor_method,
        verify_passkey_email, verify_two_factor,
    },
    mailer::LogMailer,
    orchestrator::AuthOrchestrator,
    settings::GatehouseSettings,
    store::{MemoryAccountStore, MemoryKeyedStore},
};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load configuration from Settings.toml and environment variables
    // This also loads .env file and initializes the logger
    let settings = GatehouseSettings::load()
        .map_err(|e| std::io::Error::other(format!("Failed to load settings: {e}")))?;

    let orchestrator = AuthOrchestrator::new(
        settings.clone(),
        Arc::new(MemoryAccountStore::new()),
        Arc::new(MemoryKeyedStore::new()),
        Arc::new(LogMailer),
    )
    .map_err(|e| std::io::Error::other(format!("Failed to build orchestrator: {e}")))?;

    start_server(orchestrator, settings).await
}

/// Start the server
///
/// # Errors
///
/// Returns an error if:
/// - Server binding fails
/// - Server fails to start
async fn start_server(
    orchestrator: AuthOrchestrator,
    settings: GatehouseSettings,
) -> std::io::Result<()> {
    let bind_address = settings.get_bind_address();
    print_startup_info(&bind_address, &settings);

    let orchestrator = web::Data::new(orchestrator);
    let csrf = web::Data::new(CsrfGuard::new(settings.session.cookie_secure));
    let cors_origins = settings.get_cors_origins();

    HttpServer::new(move || {
        let cors_origins = cors_origins.clone();
        let cors = Cors::default()
            .allowed_origin_fn(move |origin, _| {
                cors_origins
                    .iter()
                    .any(|allowed| allowed == origin.to_str().unwrap_or(""))
            })
            .allowed_methods(vec!["GET", "POST", "OPTIONS"])
            .allowed_headers(vec!["Content-Type", "Accept", "X-CSRF-Token"])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .app_data(orchestrator.clone())
            .app_data(csrf.clone())
            .wrap(cors)
            .wrap(Logger::default())
            .configure(configure_services)
    })
    .bind(&bind_address)?
    .run()
    .await
}

fn configure_services(cfg: &mut web::ServiceConfig) {
    cfg
        // Anti-forgery and principal
        .route("/auth/antiforgery", web::get().to(antiforgery_token))
        .route("/auth/user", web::get().to(current_user))
        // Password authentication
        .route("/auth/login", web::post().to(login))
        .route("/auth/register", web::post().to(register))
        .route("/auth/confirm-email", web::get().to(confirm_email))
        .route("/auth/logout", web::post().to(logout))
        // Email change
        .route("/auth/email/change", web::post().to(change_email))
        .route(
            "/auth/confirm-email-change",
            web::get().to(confirm_email_change),
        )
        // Two-factor
        .route("/auth/2fa/verify", web::post().to(verify_two_factor))
        .route(
            "/auth/2fa/send-email-code",
            web::post().to(send_two_factor_email_code),
        )
        .route("/auth/2fa/enable", web::post().to(enable_two_factor))
        .route("/auth/2fa/disable", web::post().to(disable_two_factor))
        .route(
            "/auth/2fa/update-method",
            web::post().to(update_two_factor_method),
        )
        // Passkey login
        .route(
            "/auth/passkey/request-options",
            web::post().to(passkey_assertion_options),
        )
        .route("/auth/passkey/authenticate", web::post().to(passkey_assertion))
        // Passwordless signup
        .route(
            "/auth/passkey/register-passwordless",
            web::post().to(register_passwordless),
        )
        .route(
            "/auth/passkey/verify-email",
            web::post().to(verify_passkey_email),
        )
        .route(
            "/auth/passkey/resend-verification",
            web::post().to(resend_passkey_verification),
        )
        .route(
            "/auth/passkey/setup-creation-options",
            web::post().to(setup_passkey_options),
        )
        .route(
            "/auth/passkey/setup-register",
            web::post().to(setup_passkey_complete),
        )
        // Passkey management
        .route(
            "/auth/passkey/creation-options",
            web::post().to(add_passkey_options),
        )
        .route("/auth/passkey/register", web::post().to(add_passkey_complete))
        .route("/auth/passkey/list", web::get().to(list_passkeys))
        .route("/auth/passkey/delete", web::post().to(delete_passkey))
        // Password lifecycle
        .route("/auth/password/forgot", web::post().to(forgot_password))
        .route("/auth/password/reset", web::post().to(reset_password))
        .route("/auth/password/change", web::post().to(change_password))
        // Health endpoint
        .route("/ping", web::get().to(health));
}

fn print_startup_info(bind_address: &str, settings: &GatehouseSettings) {
    println!("Starting Gatehouse authentication service on http://{bind_address}");
    println!();
    println!("Authentication endpoints:");
    println!("  GET  /auth/antiforgery            - Fetch anti-forgery token");
    println!("  POST /auth/login                  - Password login");
    println!("  POST /auth/register               - Password registration");
    println!("  POST /auth/2fa/verify             - Two-factor step-up");
    println!();
    println!("Passkey endpoints:");
    println!("  POST /auth/passkey/request-options       - Start passkey login");
    println!("  POST /auth/passkey/authenticate          - Complete passkey login");
    println!("  POST /auth/passkey/register-passwordless - Start passwordless signup");
    println!("  POST /auth/passkey/setup-register        - Finish passwordless signup");
    println!();
    println!("Relying party: {} ({})", settings.passkeys.rp_id, settings.passkeys.rp_origin);
    println!();
    println!("System endpoints:");
    println!("  GET  /ping            - Health check");
}
