//! Enrollment token issuer
//!
//! Opaque single-use tokens minted when a passwordless signup verifies its
//! email address. Each token authorizes exactly one passkey-creation
//! ceremony; redemption removes the token before the ceremony runs, so a
//! ceremony that subsequently fails cannot replay it.

use std::sync::Arc;

use chrono::Duration;
use uuid::Uuid;

use crate::store::KeyedStore;
use crate::utils::crypto;

pub struct EnrollmentTokenIssuer {
    store: Arc<dyn KeyedStore>,
    ttl: Duration,
}

impl EnrollmentTokenIssuer {
    #[must_use]
    pub fn new(store: Arc<dyn KeyedStore>, ttl_minutes: u64) -> Self {
        Self {
            store,
            ttl: Duration::minutes(i64::try_from(ttl_minutes).unwrap_or(15)),
        }
    }

    fn key(account_id: Uuid) -> String {
        format!("enroll:{account_id}")
    }

    /// Mint a token bound to the account, replacing any outstanding one
    #[must_use]
    pub fn issue(&self, account_id: Uuid) -> String {
        let token = crypto::generate_nonce(32);
        self.store.put(&Self::key(account_id), &token, self.ttl);
        token
    }

    /// Consume the token; wrong account, wrong token, and expiry all fail
    /// closed
    #[must_use]
    pub fn redeem(&self, account_id: Uuid, token: &str) -> bool {
        if token.is_empty() {
            return false;
        }
        self.store.delete_if_match(&Self::key(account_id), token)
    }

    /// Whether an unexpired token is outstanding for the account
    ///
    /// Used to gate the ceremony-options step without consuming the token.
    #[must_use]
    pub fn is_pending(&self, account_id: Uuid, token: &str) -> bool {
        self.store
            .get(&Self::key(account_id))
            .is_some_and(|stored| {
                constant_time_eq::constant_time_eq(stored.as_bytes(), token.as_bytes())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKeyedStore;

    fn issuer() -> EnrollmentTokenIssuer {
        EnrollmentTokenIssuer::new(Arc::new(MemoryKeyedStore::new()), 15)
    }

    #[test]
    fn redeem_is_single_use() {
        let issuer = issuer();
        let id = Uuid::new_v4();
        let token = issuer.issue(id);

        assert!(issuer.redeem(id, &token));
        assert!(!issuer.redeem(id, &token));
    }

    #[test]
    fn wrong_account_fails_closed() {
        let issuer = issuer();
        let id = Uuid::new_v4();
        let token = issuer.issue(id);

        assert!(!issuer.redeem(Uuid::new_v4(), &token));
        // Still redeemable by the right account
        assert!(issuer.redeem(id, &token));
    }

    #[test]
    fn wrong_token_fails_closed() {
        let issuer = issuer();
        let id = Uuid::new_v4();
        let _token = issuer.issue(id);

        assert!(!issuer.redeem(id, "forged"));
        assert!(!issuer.redeem(id, ""));
    }

    #[test]
    fn reissue_invalidates_previous_token() {
        let issuer = issuer();
        let id = Uuid::new_v4();
        let first = issuer.issue(id);
        let second = issuer.issue(id);

        assert!(!issuer.redeem(id, &first));
        assert!(issuer.redeem(id, &second));
    }

    #[test]
    fn pending_check_does_not_consume() {
        let issuer = issuer();
        let id = Uuid::new_v4();
        let token = issuer.issue(id);

        assert!(issuer.is_pending(id, &token));
        assert!(!issuer.is_pending(id, "other"));
        assert!(issuer.redeem(id, &token));
        assert!(!issuer.is_pending(id, &token));
    }
}
