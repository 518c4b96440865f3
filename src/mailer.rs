//! Outbound mail collaborator
//!
//! The orchestrator treats mail as fire-and-forget: a delivery failure is
//! logged and never surfaced as an authentication failure. The shipped
//! implementation logs deliveries instead of sending them; deployments
//! provide a real transport behind the same trait.

use anyhow::Result;

use crate::models::Account;

/// Outbound mail operations the authentication flows need
pub trait Mailer: Send + Sync {
    /// Deliver an account-confirmation link
    ///
    /// # Errors
    /// Returns an error when delivery fails; callers log and continue.
    fn send_confirmation_link(&self, account: &Account, email: &str, link: &str) -> Result<()>;

    /// Deliver a password-reset link
    ///
    /// # Errors
    /// Returns an error when delivery fails; callers log and continue.
    fn send_password_reset_link(&self, account: &Account, email: &str, link: &str) -> Result<()>;

    /// Deliver an email-verification code
    ///
    /// # Errors
    /// Returns an error when delivery fails; callers log and continue.
    fn send_verification_code(&self, account: &Account, email: &str, code: &str) -> Result<()>;

    /// Deliver a two-factor code
    ///
    /// # Errors
    /// Returns an error when delivery fails; callers log and continue.
    fn send_two_factor_code(&self, account: &Account, email: &str, code: &str) -> Result<()>;
}

/// Development mailer that logs deliveries instead of sending them
#[derive(Default)]
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send_confirmation_link(&self, account: &Account, email: &str, link: &str) -> Result<()> {
        log::info!(
            "mail: confirmation link for account {} to {email}: {link}",
            account.id
        );
        Ok(())
    }

    fn send_password_reset_link(&self, account: &Account, email: &str, link: &str) -> Result<()> {
        log::info!(
            "mail: password reset link for account {} to {email}: {link}",
            account.id
        );
        Ok(())
    }

    fn send_verification_code(&self, account: &Account, email: &str, _code: &str) -> Result<()> {
        // The code itself stays out of the log line; it is a live secret
        log::info!(
            "mail: verification code for account {} sent to {email}",
            account.id
        );
        Ok(())
    }

    fn send_two_factor_code(&self, account: &Account, email: &str, _code: &str) -> Result<()> {
        log::info!(
            "mail: two-factor code for account {} sent to {email}",
            account.id
        );
        Ok(())
    }
}
