//! Verification code cache
//!
//! Single-use 6-digit numeric codes for email verification and email-based
//! second factors. At most one live code exists per (account, purpose);
//! issuing again supersedes the previous code. Codes are compared in
//! constant time and consumed atomically on first match.

use std::sync::Arc;

use chrono::Duration;
use constant_time_eq::constant_time_eq;
use rand::Rng;
use uuid::Uuid;

use crate::store::KeyedStore;

/// What an emailed code authorizes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CodePurpose {
    EmailVerify,
    TwoFactor,
}

impl CodePurpose {
    fn as_str(self) -> &'static str {
        match self {
            Self::EmailVerify => "email-verify",
            Self::TwoFactor => "2fa",
        }
    }
}

pub struct VerificationCodeCache {
    store: Arc<dyn KeyedStore>,
    ttl: Duration,
}

impl VerificationCodeCache {
    #[must_use]
    pub fn new(store: Arc<dyn KeyedStore>, ttl_minutes: u64) -> Self {
        Self {
            store,
            ttl: Duration::minutes(i64::try_from(ttl_minutes).unwrap_or(10)),
        }
    }

    fn key(account_id: Uuid, purpose: CodePurpose) -> String {
        format!("code:{}:{}", purpose.as_str(), account_id)
    }

    /// Issue a fresh code, superseding any live code for the same purpose
    ///
    /// The returned value is handed to the mail collaborator and never
    /// logged by the core.
    #[must_use]
    pub fn issue(&self, account_id: Uuid, purpose: CodePurpose) -> String {
        let code = rand::thread_rng().gen_range(100_000..=999_999).to_string();
        self.store.put(&Self::key(account_id, purpose), &code, self.ttl);
        code
    }

    /// Verify and consume a code
    ///
    /// On match the entry is deleted and `true` is returned; a mismatch,
    /// absent, or expired code returns `false` with no side effects.
    #[must_use]
    pub fn verify(&self, account_id: Uuid, purpose: CodePurpose, candidate: &str) -> bool {
        let key = Self::key(account_id, purpose);
        let Some(stored) = self.store.get(&key) else {
            return false;
        };
        let candidate = candidate.trim();
        if !constant_time_eq(stored.as_bytes(), candidate.as_bytes()) {
            return false;
        }
        // delete_if_match is the commit point: only one concurrent caller
        // can consume the code.
        self.store.delete_if_match(&key, &stored)
    }

    /// Drop any live code without verifying it
    pub fn invalidate(&self, account_id: Uuid, purpose: CodePurpose) {
        self.store.delete(&Self::key(account_id, purpose));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKeyedStore;

    fn cache() -> VerificationCodeCache {
        VerificationCodeCache::new(Arc::new(MemoryKeyedStore::new()), 10)
    }

    #[test]
    fn issued_code_is_six_digits() {
        let cache = cache();
        let code = cache.issue(Uuid::new_v4(), CodePurpose::EmailVerify);
        assert_eq!(code.len(), 6);
        let value: u32 = code.parse().unwrap();
        assert!((100_000..=999_999).contains(&value));
    }

    #[test]
    fn verify_consumes_on_match() {
        let cache = cache();
        let id = Uuid::new_v4();
        let code = cache.issue(id, CodePurpose::EmailVerify);

        assert!(cache.verify(id, CodePurpose::EmailVerify, &code));
        // Replay fails even before the TTL expires
        assert!(!cache.verify(id, CodePurpose::EmailVerify, &code));
    }

    #[test]
    fn mismatch_leaves_code_intact() {
        let cache = cache();
        let id = Uuid::new_v4();
        let code = cache.issue(id, CodePurpose::TwoFactor);

        assert!(!cache.verify(id, CodePurpose::TwoFactor, "000000"));
        assert!(cache.verify(id, CodePurpose::TwoFactor, &code));
    }

    #[test]
    fn reissue_supersedes_previous_code() {
        let cache = cache();
        let id = Uuid::new_v4();
        let first = cache.issue(id, CodePurpose::EmailVerify);
        let second = cache.issue(id, CodePurpose::EmailVerify);

        assert!(!cache.verify(id, CodePurpose::EmailVerify, &first));
        assert!(cache.verify(id, CodePurpose::EmailVerify, &second));
    }

    #[test]
    fn purposes_are_isolated() {
        let cache = cache();
        let id = Uuid::new_v4();
        let code = cache.issue(id, CodePurpose::EmailVerify);

        assert!(!cache.verify(id, CodePurpose::TwoFactor, &code));
        assert!(cache.verify(id, CodePurpose::EmailVerify, &code));
    }

    #[test]
    fn surrounding_whitespace_is_tolerated() {
        let cache = cache();
        let id = Uuid::new_v4();
        let code = cache.issue(id, CodePurpose::TwoFactor);
        assert!(cache.verify(id, CodePurpose::TwoFactor, &format!(" {code} ")));
    }
}
