//! Authentication orchestrator
//!
//! Composes the credential store, lockout tracker, verification code
//! cache, enrollment token issuer, ceremony engine, two-factor step-up,
//! and mail collaborator into the externally visible flows. Handlers talk
//! only to this type.
//!
//! Enumeration-sensitive operations (forgot-password, passwordless
//! registration of a known email, verification resend) run their real
//! branch for side effects only and always produce the same caller-visible
//! shape; see [`AuthOrchestrator::non_disclosing`].

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::codes::{CodePurpose, VerificationCodeCache};
use crate::enrollment::EnrollmentTokenIssuer;
use crate::lockout::LockoutTracker;
use crate::mailer::Mailer;
use crate::models::{Account, PasskeyCredential, PasskeyInfo, TwoFactorMethod, UserInfo};
use crate::session::SessionManager;
use crate::settings::GatehouseSettings;
use crate::store::{AccountStore, KeyedStore, StoreError};
use crate::two_factor::{self, StepUpOutcome, TwoFactorStepUp};
use crate::utils::{crypto, password};
use crate::webauthn::{
    AssertionOptions, AssertionResponse, CeremonyEngine, CeremonyError, ChallengeState,
    RegistrationOptions, RegistrationResponse,
};

/// Failures surfaced by orchestrator operations
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("account locked out")]
    LockedOut,
    #[error("account email not confirmed")]
    AccountNotConfirmed,
    #[error("code expired or invalid")]
    CodeExpiredOrInvalid,
    #[error("token expired or invalid")]
    TokenExpiredOrInvalid,
    #[error("ceremony failed: {0}")]
    Ceremony(#[from] CeremonyError),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(msg) => AuthError::Conflict(msg),
            StoreError::NotFound => AuthError::Internal("record vanished".to_string()),
        }
    }
}

/// Outcome of a first-factor login attempt (password or passkey)
#[derive(Debug, Clone)]
pub enum LoginOutcome {
    Authenticated { account: Account, remember: bool },
    RequiresTwoFactor { account: Account },
    LockedOut,
    /// Account cannot sign in yet (email not confirmed)
    NotAllowed,
    Invalid,
}

/// TOTP enrollment material returned when the authenticator method is enabled
#[derive(Debug, Clone)]
pub struct TotpEnrollment {
    pub secret: String,
    pub otpauth_url: String,
}

const MIN_PASSWORD_LEN: usize = 6;

pub struct AuthOrchestrator {
    settings: GatehouseSettings,
    accounts: Arc<dyn AccountStore>,
    secrets: Arc<dyn KeyedStore>,
    codes: Arc<VerificationCodeCache>,
    enrollment: EnrollmentTokenIssuer,
    lockout: Arc<LockoutTracker>,
    step_up: TwoFactorStepUp,
    engine: CeremonyEngine,
    mailer: Arc<dyn Mailer>,
    sessions: SessionManager,
    /// Verified against when an email lookup misses, keeping the response
    /// shape and timing independent of account existence
    dummy_hash: String,
}

impl AuthOrchestrator {
    /// Wire up the orchestrator from settings and collaborators
    ///
    /// # Errors
    /// Returns an error when the relying-party configuration is invalid or
    /// the dummy hash cannot be computed.
    pub fn new(
        settings: GatehouseSettings,
        accounts: Arc<dyn AccountStore>,
        secrets: Arc<dyn KeyedStore>,
        mailer: Arc<dyn Mailer>,
    ) -> anyhow::Result<Self> {
        let codes = Arc::new(VerificationCodeCache::new(
            secrets.clone(),
            settings.security.code_ttl_minutes,
        ));
        let enrollment = EnrollmentTokenIssuer::new(
            secrets.clone(),
            settings.security.enrollment_token_ttl_minutes,
        );
        let lockout = Arc::new(LockoutTracker::new(
            accounts.clone(),
            settings.security.lockout_threshold,
            settings.security.lockout_duration_minutes,
        ));
        let step_up = TwoFactorStepUp::new(accounts.clone(), codes.clone(), lockout.clone());
        let engine = CeremonyEngine::new(settings.passkeys.clone())
            .map_err(|e| anyhow::anyhow!("passkey configuration: {e}"))?;
        let sessions = SessionManager::new(&settings.session);
        let dummy_hash = password::hash_password(&crypto::generate_nonce(18))?;

        Ok(Self {
            settings,
            accounts,
            secrets,
            codes,
            enrollment,
            lockout,
            step_up,
            engine,
            mailer,
            sessions,
            dummy_hash,
        })
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Whether cookies should carry the Secure attribute
    #[must_use]
    pub fn cookie_secure(&self) -> bool {
        self.settings.session.cookie_secure
    }

    /// TTL applied to stored ceremony state
    #[must_use]
    pub fn challenge_ttl_seconds(&self) -> u64 {
        self.engine.challenge_ttl_seconds()
    }

    #[must_use]
    pub fn accounts(&self) -> &dyn AccountStore {
        self.accounts.as_ref()
    }

    #[must_use]
    pub fn find_account(&self, id: Uuid) -> Option<Account> {
        self.accounts.find_by_id(id)
    }

    #[must_use]
    pub fn user_info(&self, id: Uuid) -> Option<UserInfo> {
        self.accounts
            .find_by_id(id)
            .map(|account| UserInfo::from_account(&account))
    }

    // =========================================================
    // Password login
    // =========================================================

    /// Password login, the first of the three converging paths
    #[must_use]
    pub fn login(&self, email: &str, submitted_password: &str, remember: bool) -> LoginOutcome {
        let Some(account) = self.accounts.find_by_email(email) else {
            // Burn a verification against the dummy hash so a miss costs
            // the same as a mismatch
            let _ = password::verify_password(submitted_password, &self.dummy_hash);
            return LoginOutcome::Invalid;
        };

        if account.is_locked_out() {
            return LoginOutcome::LockedOut;
        }
        if !account.email_confirmed {
            return LoginOutcome::NotAllowed;
        }

        let verified = account
            .password_hash
            .as_deref()
            .is_some_and(|hash| password::verify_password(submitted_password, hash));
        if !verified {
            log::debug!("password login failed for account {}", account.id);
            if self.lockout.record_failure(account.id) {
                return LoginOutcome::LockedOut;
            }
            return LoginOutcome::Invalid;
        }

        self.finish_first_factor(account, remember)
    }

    /// Shared tail of password and passkey login: either step up to the
    /// second factor or establish the authenticated session
    fn finish_first_factor(&self, account: Account, remember: bool) -> LoginOutcome {
        if account.two_factor_enabled {
            if account.preferred_two_factor == TwoFactorMethod::Email {
                let code = self.codes.issue(account.id, CodePurpose::TwoFactor);
                self.deliver(
                    "two-factor code",
                    self.mailer
                        .send_two_factor_code(&account, &account.email, &code),
                );
            }
            return LoginOutcome::RequiresTwoFactor { account };
        }

        self.lockout.record_success(account.id);
        LoginOutcome::Authenticated { account, remember }
    }

    // =========================================================
    // Two-factor step-up
    // =========================================================

    /// Verify the second factor for a partially authenticated principal
    #[must_use]
    pub fn verify_two_factor(&self, account_id: Uuid, code: &str) -> StepUpOutcome {
        self.step_up.verify(account_id, code)
    }

    /// Send (or re-send) an email two-factor code to a partially
    /// authenticated principal
    ///
    /// # Errors
    /// Returns `Unauthorized` when the account does not exist.
    pub fn send_two_factor_code(&self, account_id: Uuid) -> Result<(), AuthError> {
        let account = self
            .accounts
            .find_by_id(account_id)
            .ok_or(AuthError::Unauthorized)?;
        let code = self.codes.issue(account.id, CodePurpose::TwoFactor);
        self.deliver(
            "two-factor code",
            self.mailer
                .send_two_factor_code(&account, &account.email, &code),
        );
        Ok(())
    }

    // =========================================================
    // Passkey login
    // =========================================================

    /// Start an assertion ceremony
    ///
    /// With an email the allow list is restricted to that account's
    /// credentials; an unknown email produces the same discoverable-flow
    /// options as no email, so this path does not leak account existence.
    #[must_use]
    pub fn begin_passkey_login(&self, email: Option<&str>) -> (AssertionOptions, String) {
        let account = email.and_then(|email| self.accounts.find_by_email(email));
        let credentials = account
            .as_ref()
            .map(|a| self.accounts.credentials_for(a.id))
            .unwrap_or_default();
        let (options, state) =
            self.engine
                .begin_assertion(account.as_ref().map(|a| a.id), &credentials);
        (options, self.store_challenge(&state))
    }

    /// Complete an assertion ceremony and resolve the account
    ///
    /// All ceremony failures collapse to `Invalid`; the specific kind is
    /// only logged.
    #[must_use]
    pub fn complete_passkey_login(
        &self,
        ceremony_id: &str,
        response: &AssertionResponse,
    ) -> LoginOutcome {
        let Some(state) = self.take_challenge(ceremony_id) else {
            log::debug!("passkey login rejected: {}", CeremonyError::ChallengeExpired.kind());
            return LoginOutcome::Invalid;
        };

        let Some(mut credential) = self.accounts.find_credential(&response.raw_id) else {
            log::debug!("passkey login rejected: {}", CeremonyError::UnknownCredential.kind());
            return LoginOutcome::Invalid;
        };

        // A ceremony begun for one account cannot complete with another's
        // credential
        if state
            .account_id
            .is_some_and(|bound| bound != credential.account_id)
        {
            log::debug!("passkey login rejected: {}", CeremonyError::UnknownCredential.kind());
            return LoginOutcome::Invalid;
        }

        let Some(account) = self.accounts.find_by_id(credential.account_id) else {
            return LoginOutcome::Invalid;
        };
        if account.is_locked_out() {
            return LoginOutcome::LockedOut;
        }

        let new_count = match self.engine.complete_assertion(response, &state, &credential) {
            Ok(count) => count,
            Err(err) => {
                log::warn!(
                    "passkey login rejected for account {}: {}",
                    account.id,
                    err.kind()
                );
                return LoginOutcome::Invalid;
            }
        };

        credential.sign_count = new_count;
        credential.last_used_at = Some(Utc::now());
        if let Err(err) = self.accounts.update_credential(&credential) {
            log::warn!("failed to persist sign count: {err}");
            return LoginOutcome::Invalid;
        }

        if !account.email_confirmed {
            return LoginOutcome::NotAllowed;
        }

        self.finish_first_factor(account, false)
    }

    // =========================================================
    // Password registration and confirmation
    // =========================================================

    /// Create a password account; unusable for login until confirmed
    ///
    /// # Errors
    /// Returns `Validation` for malformed input and `Conflict` for a
    /// duplicate email.
    pub fn register(&self, email: &str, submitted_password: &str) -> Result<(), AuthError> {
        validate_email(email)?;
        validate_password(submitted_password)?;

        let mut account = Account::new(email);
        account.password_hash = Some(
            password::hash_password(submitted_password)
                .map_err(|e| AuthError::Internal(e.to_string()))?,
        );
        self.accounts.create(account.clone())?;

        let link = self.issue_link_token(&account, "confirm", "confirm-email");
        self.deliver(
            "confirmation link",
            self.mailer
                .send_confirmation_link(&account, &account.email, &link),
        );
        log::info!("account {} registered", account.id);
        Ok(())
    }

    /// Consume a confirmation token and mark the email confirmed
    ///
    /// # Errors
    /// Returns `TokenExpiredOrInvalid` for unknown, expired, or replayed
    /// tokens.
    pub fn confirm_email(&self, account_id: Uuid, token: &str) -> Result<(), AuthError> {
        if self
            .secrets
            .take(&link_key("confirm", account_id, token))
            .is_none()
        {
            return Err(AuthError::TokenExpiredOrInvalid);
        }
        self.accounts
            .mutate(account_id, &mut |account| account.email_confirmed = true)
            .map_err(|_| AuthError::TokenExpiredOrInvalid)?;
        log::info!("account {account_id} confirmed its email");
        Ok(())
    }

    // =========================================================
    // Passwordless (passkey) registration
    // =========================================================

    /// Start a passwordless signup
    ///
    /// Always returns an account id. For a known email no state changes
    /// and the id is a generated placeholder, indistinguishable from a
    /// fresh registration.
    #[must_use]
    pub fn register_passwordless(&self, email: &str) -> Uuid {
        if email_is_invalid(email) || self.accounts.find_by_email(email).is_some() {
            log::debug!("passwordless registration suppressed, returning placeholder id");
            return Uuid::new_v4();
        }

        let account = Account::new(email);
        let account_id = account.id;
        if let Err(err) = self.accounts.create(account.clone()) {
            // Raced with a concurrent signup; keep the uniform shape
            log::debug!("passwordless registration suppressed: {err}");
            return Uuid::new_v4();
        }

        let code = self.codes.issue(account_id, CodePurpose::EmailVerify);
        self.deliver(
            "verification code",
            self.mailer
                .send_verification_code(&account, &account.email, &code),
        );
        account_id
    }

    /// Verify the signup code; on success the email is confirmed and an
    /// enrollment token authorizing one passkey ceremony is returned
    ///
    /// # Errors
    /// Returns `CodeExpiredOrInvalid` for a wrong, expired, or replayed
    /// code — the caller cannot tell which.
    pub fn verify_email(&self, account_id: Uuid, code: &str) -> Result<String, AuthError> {
        if !self.codes.verify(account_id, CodePurpose::EmailVerify, code) {
            return Err(AuthError::CodeExpiredOrInvalid);
        }
        self.accounts
            .mutate(account_id, &mut |account| account.email_confirmed = true)
            .map_err(|_| AuthError::CodeExpiredOrInvalid)?;
        Ok(self.enrollment.issue(account_id))
    }

    /// Re-send the signup verification code, superseding the previous one
    ///
    /// Non-disclosing: an absent or already confirmed account produces the
    /// same shape as a successful resend.
    pub fn resend_verification(&self, account_id: Uuid) {
        self.non_disclosing("verification resend", |this| {
            let account = this
                .accounts
                .find_by_id(account_id)
                .ok_or(AuthError::CodeExpiredOrInvalid)?;
            if account.email_confirmed {
                return Err(AuthError::CodeExpiredOrInvalid);
            }
            let code = this.codes.issue(account.id, CodePurpose::EmailVerify);
            this.deliver(
                "verification code",
                this.mailer
                    .send_verification_code(&account, &account.email, &code),
            );
            Ok(())
        });
    }

    /// Produce creation options for the enrollment ceremony
    ///
    /// Requires an outstanding enrollment token but does not consume it;
    /// redemption happens atomically with completion.
    ///
    /// # Errors
    /// Returns `TokenExpiredOrInvalid` when no matching token is pending.
    pub fn begin_setup_passkey(
        &self,
        account_id: Uuid,
        token: &str,
    ) -> Result<(RegistrationOptions, String), AuthError> {
        let account = self
            .accounts
            .find_by_id(account_id)
            .ok_or(AuthError::TokenExpiredOrInvalid)?;
        if !account.email_confirmed || !self.enrollment.is_pending(account_id, token) {
            return Err(AuthError::TokenExpiredOrInvalid);
        }
        Ok(self.begin_registration_ceremony(&account))
    }

    /// Redeem the enrollment token and run the registration ceremony
    ///
    /// The token is consumed before the ceremony; a ceremony that then
    /// fails cannot replay it. Success is the end of the passwordless
    /// signup and establishes an authenticated session immediately.
    ///
    /// # Errors
    /// Returns `TokenExpiredOrInvalid` for token failures and `Ceremony`
    /// for ceremony failures.
    pub fn setup_passkey(
        &self,
        account_id: Uuid,
        token: &str,
        ceremony_id: &str,
        response: &RegistrationResponse,
    ) -> Result<Account, AuthError> {
        // Consume ceremony state first: it is single-use whatever happens next
        let state = self
            .take_challenge(ceremony_id)
            .ok_or(AuthError::Ceremony(CeremonyError::ChallengeExpired))?;

        let account = self
            .accounts
            .find_by_id(account_id)
            .ok_or(AuthError::TokenExpiredOrInvalid)?;

        if !self.enrollment.redeem(account_id, token) {
            return Err(AuthError::TokenExpiredOrInvalid);
        }

        self.finish_registration_ceremony(&account, &state, response)?;
        self.lockout.record_success(account.id);
        log::info!("account {} enrolled its first passkey", account.id);
        Ok(account)
    }

    // =========================================================
    // Passkey management for signed-in users
    // =========================================================

    /// Start a registration ceremony for an authenticated account
    ///
    /// # Errors
    /// Returns `Unauthorized` when the account does not exist.
    pub fn begin_add_passkey(
        &self,
        account_id: Uuid,
    ) -> Result<(RegistrationOptions, String), AuthError> {
        let account = self
            .accounts
            .find_by_id(account_id)
            .ok_or(AuthError::Unauthorized)?;
        Ok(self.begin_registration_ceremony(&account))
    }

    /// Complete an additional-passkey registration for an authenticated
    /// account
    ///
    /// # Errors
    /// Returns `Ceremony` for ceremony failures.
    pub fn add_passkey(
        &self,
        account_id: Uuid,
        ceremony_id: &str,
        response: &RegistrationResponse,
    ) -> Result<(), AuthError> {
        let state = self
            .take_challenge(ceremony_id)
            .ok_or(AuthError::Ceremony(CeremonyError::ChallengeExpired))?;
        let account = self
            .accounts
            .find_by_id(account_id)
            .ok_or(AuthError::Unauthorized)?;
        self.finish_registration_ceremony(&account, &state, response)?;
        log::info!("account {} registered an additional passkey", account.id);
        Ok(())
    }

    #[must_use]
    pub fn list_passkeys(&self, account_id: Uuid) -> Vec<PasskeyInfo> {
        self.accounts
            .credentials_for(account_id)
            .into_iter()
            .map(|c| PasskeyInfo {
                id: c.credential_id,
                name: c.name,
                created_at: c.created_at,
            })
            .collect()
    }

    /// Delete one of the caller's passkeys
    ///
    /// # Errors
    /// Returns `Validation` when the credential does not exist or belongs
    /// to a different account.
    pub fn delete_passkey(&self, account_id: Uuid, credential_id: &str) -> Result<(), AuthError> {
        if self.accounts.remove_credential(account_id, credential_id) {
            log::info!("account {account_id} deleted a passkey");
            Ok(())
        } else {
            Err(AuthError::Validation("unknown passkey".to_string()))
        }
    }

    fn begin_registration_ceremony(&self, account: &Account) -> (RegistrationOptions, String) {
        let existing = self.accounts.credentials_for(account.id);
        let (options, state) =
            self.engine
                .begin_registration(account.id, &account.email, &account.email, &existing);
        (options, self.store_challenge(&state))
    }

    fn finish_registration_ceremony(
        &self,
        account: &Account,
        state: &ChallengeState,
        response: &RegistrationResponse,
    ) -> Result<(), AuthError> {
        let registered = self.engine.complete_registration(response, state)?;
        let credential = PasskeyCredential {
            credential_id: registered.credential_id,
            account_id: account.id,
            public_key: registered.public_key,
            sign_count: registered.sign_count,
            transports: registered.transports,
            name: None,
            created_at: Utc::now(),
            last_used_at: None,
        };
        self.accounts.add_credential(credential).map_err(|err| match err {
            StoreError::Conflict(_) => {
                log::warn!(
                    "passkey registration rejected for account {}: {}",
                    account.id,
                    CeremonyError::DuplicateCredential.kind()
                );
                AuthError::Ceremony(CeremonyError::DuplicateCredential)
            }
            other => other.into(),
        })
    }

    // =========================================================
    // Forgot / reset password
    // =========================================================

    /// Request a password reset; the response shape never varies
    ///
    /// The reset link is only actually sent when the account exists and is
    /// confirmed.
    pub fn forgot_password(&self, email: &str) {
        self.non_disclosing("forgot password", |this| {
            let account = this
                .accounts
                .find_by_email(email)
                .ok_or(AuthError::InvalidCredentials)?;
            if !account.email_confirmed {
                return Err(AuthError::AccountNotConfirmed);
            }
            let link = this.issue_link_token(&account, "reset", "reset-password");
            this.deliver(
                "password reset link",
                this.mailer
                    .send_password_reset_link(&account, &account.email, &link),
            );
            Ok(())
        });
    }

    /// Consume a reset token and set a new password
    ///
    /// Rotating the security stamp invalidates every session issued before
    /// the reset, for this account, on any device.
    ///
    /// # Errors
    /// Returns `TokenExpiredOrInvalid` for token failures and `Validation`
    /// for a malformed password. An unknown email reports success, the
    /// same shape as a real reset.
    pub fn reset_password(
        &self,
        email: &str,
        token: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        validate_password(new_password)?;

        let Some(account) = self.accounts.find_by_email(email) else {
            // Don't reveal that the account does not exist
            return Ok(());
        };

        if self
            .secrets
            .take(&link_key("reset", account.id, token))
            .is_none()
        {
            return Err(AuthError::TokenExpiredOrInvalid);
        }

        let hash = password::hash_password(new_password)
            .map_err(|e| AuthError::Internal(e.to_string()))?;
        self.accounts.mutate(account.id, &mut |account| {
            account.password_hash = Some(hash.clone());
            account.rotate_security_stamp();
        })?;
        self.lockout.record_success(account.id);
        log::info!("account {} reset its password", account.id);
        Ok(())
    }

    // =========================================================
    // Credential changes for signed-in users
    // =========================================================

    /// Change the password, re-validating the current one
    ///
    /// Rotates the security stamp; the returned account carries the new
    /// stamp so the handler can re-issue the calling session's cookie
    /// while every other session dies.
    ///
    /// # Errors
    /// Returns `InvalidCredentials` when the current password is wrong.
    pub fn change_password(
        &self,
        account_id: Uuid,
        current: &str,
        new_password: &str,
    ) -> Result<Account, AuthError> {
        validate_password(new_password)?;

        let account = self
            .accounts
            .find_by_id(account_id)
            .ok_or(AuthError::Unauthorized)?;
        let verified = account
            .password_hash
            .as_deref()
            .is_some_and(|hash| password::verify_password(current, hash));
        if !verified {
            return Err(AuthError::InvalidCredentials);
        }

        let hash = password::hash_password(new_password)
            .map_err(|e| AuthError::Internal(e.to_string()))?;
        self.accounts.mutate(account_id, &mut |account| {
            account.password_hash = Some(hash.clone());
            account.rotate_security_stamp();
        })?;
        log::info!("account {account_id} changed its password");
        self.accounts
            .find_by_id(account_id)
            .ok_or(AuthError::Unauthorized)
    }

    /// Request an email change; a confirmation link goes to the new address
    ///
    /// # Errors
    /// Returns `Validation` when the address is malformed or unchanged and
    /// `Conflict` when it is already in use.
    pub fn change_email(&self, account_id: Uuid, new_email: &str) -> Result<(), AuthError> {
        validate_email(new_email)?;
        let account = self
            .accounts
            .find_by_id(account_id)
            .ok_or(AuthError::Unauthorized)?;
        let new_email = new_email.trim().to_ascii_lowercase();
        if account.email == new_email {
            return Err(AuthError::Validation(
                "new email is the same as the current email".to_string(),
            ));
        }
        if self.accounts.find_by_email(&new_email).is_some() {
            return Err(AuthError::Conflict("email is already in use".to_string()));
        }

        let token = crypto::generate_nonce(32);
        self.secrets.put(
            &link_key("email-change", account.id, &token),
            &new_email,
            self.link_token_ttl(),
        );
        let link = format!(
            "{}/auth/confirm-email-change?userId={}&code={token}",
            self.settings.application.public_origin, account.id
        );
        self.deliver(
            "email change confirmation",
            self.mailer
                .send_confirmation_link(&account, &new_email, &link),
        );
        Ok(())
    }

    /// Consume an email-change token and move the account to the new address
    ///
    /// # Errors
    /// Returns `TokenExpiredOrInvalid` for token failures and `Conflict`
    /// when the address was claimed in the meantime.
    pub fn confirm_email_change(&self, account_id: Uuid, token: &str) -> Result<(), AuthError> {
        let new_email = self
            .secrets
            .take(&link_key("email-change", account_id, token))
            .ok_or(AuthError::TokenExpiredOrInvalid)?;

        let mut account = self
            .accounts
            .find_by_id(account_id)
            .ok_or(AuthError::TokenExpiredOrInvalid)?;
        account.email = new_email;
        account.rotate_security_stamp();
        self.accounts.update(&account)?;
        log::info!("account {account_id} changed its email");
        Ok(())
    }

    // =========================================================
    // Two-factor management
    // =========================================================

    /// Enable a second factor
    ///
    /// The authenticator method returns fresh TOTP enrollment material;
    /// the email method requires a confirmed address.
    ///
    /// # Errors
    /// Returns `Validation` for the `None` method and
    /// `AccountNotConfirmed` for email 2FA on an unconfirmed account.
    pub fn enable_two_factor(
        &self,
        account_id: Uuid,
        method: TwoFactorMethod,
    ) -> Result<Option<TotpEnrollment>, AuthError> {
        if method == TwoFactorMethod::None {
            return Err(AuthError::Validation("invalid 2FA method".to_string()));
        }
        let account = self
            .accounts
            .find_by_id(account_id)
            .ok_or(AuthError::Unauthorized)?;
        if method == TwoFactorMethod::Email && !account.email_confirmed {
            return Err(AuthError::AccountNotConfirmed);
        }

        let enrollment = if method == TwoFactorMethod::Authenticator {
            let secret = two_factor::generate_totp_secret();
            let otpauth_url = two_factor::otpauth_url(
                &self.settings.passkeys.rp_name,
                &account.email,
                &secret,
            );
            Some(TotpEnrollment {
                secret,
                otpauth_url,
            })
        } else {
            None
        };

        let secret = enrollment.as_ref().map(|e| e.secret.clone());
        self.accounts.mutate(account_id, &mut |account| {
            account.two_factor_enabled = true;
            account.preferred_two_factor = method;
            if let Some(secret) = &secret {
                account.totp_secret = Some(secret.clone());
            }
        })?;
        log::info!("account {account_id} enabled 2FA ({method:?})");
        Ok(enrollment)
    }

    /// Disable the second factor entirely
    ///
    /// # Errors
    /// Returns `Unauthorized` when the account does not exist.
    pub fn disable_two_factor(&self, account_id: Uuid) -> Result<(), AuthError> {
        self.accounts
            .mutate(account_id, &mut |account| {
                account.two_factor_enabled = false;
                account.preferred_two_factor = TwoFactorMethod::None;
                account.totp_secret = None;
            })
            .map_err(|_| AuthError::Unauthorized)?;
        // A live emailed code must not outlive the factor it belongs to
        self.codes.invalidate(account_id, CodePurpose::TwoFactor);
        log::info!("account {account_id} disabled 2FA");
        Ok(())
    }

    /// Change the preferred method while 2FA stays enabled
    ///
    /// # Errors
    /// Returns `Validation` when 2FA is off or the method is `None`.
    pub fn update_two_factor_method(
        &self,
        account_id: Uuid,
        method: TwoFactorMethod,
    ) -> Result<(), AuthError> {
        if method == TwoFactorMethod::None {
            return Err(AuthError::Validation("invalid 2FA method".to_string()));
        }
        let account = self
            .accounts
            .find_by_id(account_id)
            .ok_or(AuthError::Unauthorized)?;
        if !account.two_factor_enabled {
            return Err(AuthError::Validation("2FA is not enabled".to_string()));
        }
        self.accounts.mutate(account_id, &mut |account| {
            account.preferred_two_factor = method;
        })?;
        Ok(())
    }

    // =========================================================
    // Internals
    // =========================================================

    /// Run an enumeration-sensitive operation for its side effects only
    ///
    /// Whatever the real branch decides, the caller-visible shape is the
    /// same; the suppressed outcome is logged at debug.
    fn non_disclosing(&self, context: &str, op: impl FnOnce(&Self) -> Result<(), AuthError>) {
        if let Err(err) = op(self) {
            log::debug!("non-disclosing {context} suppressed: {err}");
        }
    }

    /// Log-and-continue wrapper for the fire-and-forget mail collaborator
    fn deliver(&self, context: &str, result: anyhow::Result<()>) {
        if let Err(err) = result {
            log::warn!("mail delivery failed ({context}): {err}");
        }
    }

    fn link_token_ttl(&self) -> Duration {
        Duration::hours(i64::try_from(self.settings.security.link_token_ttl_hours).unwrap_or(24))
    }

    /// Mint a single-use link token and build the corresponding URL
    fn issue_link_token(&self, account: &Account, kind: &str, path: &str) -> String {
        let token = crypto::generate_nonce(32);
        self.secrets.put(
            &link_key(kind, account.id, &token),
            "issued",
            self.link_token_ttl(),
        );
        format!(
            "{}/auth/{path}?userId={}&code={token}",
            self.settings.application.public_origin, account.id
        )
    }

    fn store_challenge(&self, state: &ChallengeState) -> String {
        let ceremony_id = crypto::generate_nonce(16);
        let serialized = serde_json::to_string(state).unwrap_or_default();
        self.secrets.put(
            &format!("ceremony:{ceremony_id}"),
            &serialized,
            Duration::seconds(
                i64::try_from(self.engine.challenge_ttl_seconds()).unwrap_or(60),
            ),
        );
        ceremony_id
    }

    /// Consume ceremony state; single-use regardless of ceremony outcome
    fn take_challenge(&self, ceremony_id: &str) -> Option<ChallengeState> {
        let serialized = self.secrets.take(&format!("ceremony:{ceremony_id}"))?;
        serde_json::from_str(&serialized).ok()
    }
}

/// Keyed-store key for a single-use link token bound to an account
fn link_key(kind: &str, account_id: Uuid, token: &str) -> String {
    format!("link:{kind}:{account_id}:{token}")
}

fn email_is_invalid(email: &str) -> bool {
    let email = email.trim();
    email.is_empty() || !email.contains('@') || email.len() > 254
}

fn validate_email(email: &str) -> Result<(), AuthError> {
    if email_is_invalid(email) {
        return Err(AuthError::Validation("invalid email format".to_string()));
    }
    Ok(())
}

fn validate_password(submitted_password: &str) -> Result<(), AuthError> {
    if submitted_password.len() < MIN_PASSWORD_LEN {
        return Err(AuthError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}
