//! Two-factor step-up
//!
//! Validates a second factor against a partially authenticated principal.
//! The authenticator (TOTP) path is tried first whenever a secret is
//! configured; accounts preferring email fall back to the verification
//! code cache. Failures feed the same lockout counter as password
//! failures.

use std::sync::Arc;

use rand::RngCore;
use totp_rs::{Algorithm, Secret, TOTP};
use uuid::Uuid;

use crate::codes::{CodePurpose, VerificationCodeCache};
use crate::lockout::LockoutTracker;
use crate::store::AccountStore;

/// TOTP parameters: 6 digits, 30 second step, one step of clock skew
const TOTP_DIGITS: usize = 6;
const TOTP_SKEW: u8 = 1;
const TOTP_STEP: u64 = 30;

/// Outcome of a step-up attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepUpOutcome {
    Success,
    LockedOut,
    Invalid,
}

/// Generate a 20-byte TOTP secret, base32 encoded for authenticator apps
#[must_use]
pub fn generate_totp_secret() -> String {
    let mut bytes = [0u8; 20];
    rand::thread_rng().fill_bytes(&mut bytes);
    Secret::Raw(bytes.to_vec()).to_encoded().to_string()
}

/// Build the otpauth:// URL an authenticator app enrolls from
#[must_use]
pub fn otpauth_url(issuer: &str, account_name: &str, secret: &str) -> String {
    format!(
        "otpauth://totp/{issuer}:{account_name}?secret={secret}&issuer={issuer}&digits={TOTP_DIGITS}&period={TOTP_STEP}"
    )
}

/// Check a TOTP code against a base32 secret with the configured skew
#[must_use]
pub fn verify_totp(secret_base32: &str, code: &str) -> bool {
    if code.len() != TOTP_DIGITS || !code.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }

    let Ok(secret_bytes) = Secret::Encoded(secret_base32.to_string()).to_bytes() else {
        return false;
    };
    let Ok(totp) = TOTP::new(Algorithm::SHA1, TOTP_DIGITS, TOTP_SKEW, TOTP_STEP, secret_bytes)
    else {
        return false;
    };

    let Ok(elapsed) = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) else {
        return false;
    };
    totp.check(code, elapsed.as_secs())
}

pub struct TwoFactorStepUp {
    accounts: Arc<dyn AccountStore>,
    codes: Arc<VerificationCodeCache>,
    lockout: Arc<LockoutTracker>,
}

impl TwoFactorStepUp {
    #[must_use]
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        codes: Arc<VerificationCodeCache>,
        lockout: Arc<LockoutTracker>,
    ) -> Self {
        Self {
            accounts,
            codes,
            lockout,
        }
    }

    /// Verify a submitted second-factor code for the account
    ///
    /// Success resets the shared lockout counter; failure increments it,
    /// exactly like a failed password attempt.
    #[must_use]
    pub fn verify(&self, account_id: Uuid, submitted: &str) -> StepUpOutcome {
        let Some(account) = self.accounts.find_by_id(account_id) else {
            return StepUpOutcome::Invalid;
        };
        if account.is_locked_out() {
            return StepUpOutcome::LockedOut;
        }

        // Authenticator apps often render codes with separators
        let code: String = submitted
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-')
            .collect();

        let mut verified = account
            .totp_secret
            .as_deref()
            .is_some_and(|secret| verify_totp(secret, &code));

        if !verified && account.preferred_two_factor == crate::models::TwoFactorMethod::Email {
            verified = self.codes.verify(account_id, CodePurpose::TwoFactor, &code);
        }

        if verified {
            self.lockout.record_success(account_id);
            StepUpOutcome::Success
        } else if self.lockout.record_failure(account_id) {
            StepUpOutcome::LockedOut
        } else {
            StepUpOutcome::Invalid
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Account, TwoFactorMethod};
    use crate::store::{KeyedStore, MemoryAccountStore, MemoryKeyedStore};

    fn current_code(secret: &str) -> String {
        let secret_bytes = Secret::Encoded(secret.to_string()).to_bytes().unwrap();
        let totp = TOTP::new(Algorithm::SHA1, TOTP_DIGITS, TOTP_SKEW, TOTP_STEP, secret_bytes)
            .unwrap();
        let elapsed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs();
        totp.generate(elapsed)
    }

    struct Fixture {
        accounts: Arc<MemoryAccountStore>,
        codes: Arc<VerificationCodeCache>,
        step_up: TwoFactorStepUp,
    }

    fn fixture(configure: impl FnOnce(&mut Account)) -> (Fixture, Uuid) {
        let accounts: Arc<MemoryAccountStore> = Arc::new(MemoryAccountStore::new());
        let keyed: Arc<dyn KeyedStore> = Arc::new(MemoryKeyedStore::new());
        let codes = Arc::new(VerificationCodeCache::new(keyed, 10));
        let lockout = Arc::new(LockoutTracker::new(accounts.clone(), 3, 5));

        let mut account = Account::new("a@x.test");
        account.email_confirmed = true;
        account.two_factor_enabled = true;
        configure(&mut account);
        let id = account.id;
        accounts.create(account).unwrap();

        let step_up = TwoFactorStepUp::new(accounts.clone(), codes.clone(), lockout);
        (
            Fixture {
                accounts,
                codes,
                step_up,
            },
            id,
        )
    }

    #[test]
    fn totp_secret_is_base32_of_20_bytes() {
        let secret = generate_totp_secret();
        let bytes = Secret::Encoded(secret).to_bytes().expect("decode base32");
        assert_eq!(bytes.len(), 20);
    }

    #[test]
    fn totp_round_trip() {
        let secret = generate_totp_secret();
        let code = current_code(&secret);
        assert!(verify_totp(&secret, &code));
        assert!(!verify_totp(&secret, "000000"));
        assert!(!verify_totp(&secret, "not-a-code"));
    }

    #[test]
    fn authenticator_code_succeeds_and_resets_lockout() {
        let secret = generate_totp_secret();
        let cloned = secret.clone();
        let (fixture, id) = fixture(move |account| {
            account.preferred_two_factor = TwoFactorMethod::Authenticator;
            account.totp_secret = Some(cloned);
        });

        assert_eq!(fixture.step_up.verify(id, "999999"), StepUpOutcome::Invalid);
        assert_eq!(fixture.accounts.find_by_id(id).unwrap().failure_count, 1);

        let code = current_code(&secret);
        assert_eq!(fixture.step_up.verify(id, &code), StepUpOutcome::Success);
        assert_eq!(fixture.accounts.find_by_id(id).unwrap().failure_count, 0);
    }

    #[test]
    fn email_fallback_applies_only_to_email_preference() {
        let (fixture, id) = fixture(|account| {
            account.preferred_two_factor = TwoFactorMethod::Email;
        });

        let code = fixture.codes.issue(id, CodePurpose::TwoFactor);
        assert_eq!(fixture.step_up.verify(id, &code), StepUpOutcome::Success);

        // Consumed: the same emailed code cannot be replayed
        assert_eq!(fixture.step_up.verify(id, &code), StepUpOutcome::Invalid);
    }

    #[test]
    fn emailed_code_ignored_for_authenticator_preference() {
        let secret = generate_totp_secret();
        let (fixture, id) = fixture(move |account| {
            account.preferred_two_factor = TwoFactorMethod::Authenticator;
            account.totp_secret = Some(secret);
        });

        let code = fixture.codes.issue(id, CodePurpose::TwoFactor);
        assert_eq!(fixture.step_up.verify(id, &code), StepUpOutcome::Invalid);
    }

    #[test]
    fn repeated_failures_lock_the_account() {
        let (fixture, id) = fixture(|account| {
            account.preferred_two_factor = TwoFactorMethod::Email;
        });

        assert_eq!(fixture.step_up.verify(id, "111111"), StepUpOutcome::Invalid);
        assert_eq!(fixture.step_up.verify(id, "222222"), StepUpOutcome::Invalid);
        // Third failure crosses the threshold
        assert_eq!(fixture.step_up.verify(id, "333333"), StepUpOutcome::LockedOut);

        // Even a correct code is rejected while locked
        let code = fixture.codes.issue(id, CodePurpose::TwoFactor);
        assert_eq!(fixture.step_up.verify(id, &code), StepUpOutcome::LockedOut);
    }

    #[test]
    fn code_separators_are_stripped() {
        let secret = generate_totp_secret();
        let cloned = secret.clone();
        let (fixture, id) = fixture(move |account| {
            account.preferred_two_factor = TwoFactorMethod::Authenticator;
            account.totp_secret = Some(cloned);
        });

        let code = current_code(&secret);
        let formatted = format!("{} {}", &code[..3], &code[3..]);
        assert_eq!(fixture.step_up.verify(id, &formatted), StepUpOutcome::Success);
    }

    #[test]
    fn otpauth_url_carries_parameters() {
        let url = otpauth_url("Gatehouse", "a@x.test", "SECRETBASE32");
        assert!(url.starts_with("otpauth://totp/Gatehouse:a@x.test?"));
        assert!(url.contains("secret=SECRETBASE32"));
        assert!(url.contains("period=30"));
    }
}
