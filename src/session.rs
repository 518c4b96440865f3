//! Session state and transport
//!
//! A session is one of three states: anonymous, partially authenticated
//! (password or passkey accepted, second factor outstanding), or fully
//! authenticated. State travels in an AES-256-GCM encrypted, HTTP-only,
//! SameSite cookie. The encrypted claims embed the account's security
//! stamp at issue time; on every decode the stamp is compared against the
//! account record, so rotating the stamp (password reset, password change,
//! email change) invalidates every outstanding cookie except the one
//! re-issued to the caller. Transitions are one-way except logout.

use actix_web::cookie::{time as cookie_time, Cookie, SameSite};
use actix_web::HttpRequest;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Account;
use crate::settings::SessionSettings;
use crate::store::AccountStore;
use crate::utils::crypto;

/// Cookie carrying the encrypted session claims
pub const SESSION_COOKIE: &str = "gh_session";

/// The resolved principal for a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Session {
    Anonymous,
    /// First factor accepted, second factor outstanding
    PartiallyAuthenticated(Uuid),
    Authenticated(Uuid),
}

impl Session {
    /// Account id when fully authenticated
    #[must_use]
    pub fn authenticated_account(&self) -> Option<Uuid> {
        match self {
            Session::Authenticated(id) => Some(*id),
            _ => None,
        }
    }

    /// Account id when awaiting a second factor
    #[must_use]
    pub fn pending_account(&self) -> Option<Uuid> {
        match self {
            Session::PartiallyAuthenticated(id) => Some(*id),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum Stage {
    Partial,
    Full,
}

/// Encrypted cookie payload
#[derive(Serialize, Deserialize, Clone, Debug)]
struct SessionClaims {
    account_id: Uuid,
    stage: Stage,
    security_stamp: String,
    authenticated_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

pub struct SessionManager {
    encryption_key: [u8; crypto::ENCRYPTION_KEY_SIZE],
    cookie_secure: bool,
    session_duration: Duration,
    remember_duration: Duration,
}

impl SessionManager {
    #[must_use]
    pub fn new(settings: &SessionSettings) -> Self {
        Self {
            encryption_key: crypto::derive_encryption_key(settings.session_secret.as_bytes()),
            cookie_secure: settings.cookie_secure,
            session_duration: Duration::hours(
                i64::try_from(settings.session_duration_hours).unwrap_or(2),
            ),
            remember_duration: Duration::hours(
                i64::try_from(settings.remember_duration_hours).unwrap_or(336),
            ),
        }
    }

    /// Issue a partial session awaiting the second factor
    ///
    /// # Errors
    /// Returns an error when claim encryption fails.
    pub fn issue_partial(&self, account: &Account) -> anyhow::Result<Cookie<'static>> {
        self.issue(account, Stage::Partial, false)
    }

    /// Issue a fully authenticated session
    ///
    /// # Errors
    /// Returns an error when claim encryption fails.
    pub fn issue_authenticated(
        &self,
        account: &Account,
        remember: bool,
    ) -> anyhow::Result<Cookie<'static>> {
        self.issue(account, Stage::Full, remember)
    }

    fn issue(
        &self,
        account: &Account,
        stage: Stage,
        remember: bool,
    ) -> anyhow::Result<Cookie<'static>> {
        let now = Utc::now();
        let lifetime = if remember {
            self.remember_duration
        } else {
            self.session_duration
        };
        let claims = SessionClaims {
            account_id: account.id,
            stage,
            security_stamp: account.security_stamp.clone(),
            authenticated_at: now,
            expires_at: now + lifetime,
        };
        let encrypted = crypto::encrypt_data(&claims, &self.encryption_key)?;

        let mut builder = Cookie::build(SESSION_COOKIE, encrypted)
            .path("/")
            .http_only(true)
            .secure(self.cookie_secure)
            .same_site(SameSite::Lax);
        if remember {
            builder = builder.max_age(cookie_time::Duration::seconds(lifetime.num_seconds()));
        }
        Ok(builder.finish())
    }

    /// An expired cookie that clears the session
    #[must_use]
    pub fn clear_cookie(&self) -> Cookie<'static> {
        Cookie::build(SESSION_COOKIE, "")
            .path("/")
            .http_only(true)
            .secure(self.cookie_secure)
            .same_site(SameSite::Lax)
            .max_age(cookie_time::Duration::ZERO)
            .finish()
    }

    /// Resolve the request's session against the account store
    ///
    /// Invalid, expired, stale-stamp, and orphaned cookies all resolve to
    /// `Anonymous`; a bad cookie is indistinguishable from none.
    #[must_use]
    pub fn resolve(&self, req: &HttpRequest, accounts: &dyn AccountStore) -> Session {
        let Some(cookie) = req.cookie(SESSION_COOKIE) else {
            return Session::Anonymous;
        };
        let Ok(claims) = crypto::decrypt_data::<SessionClaims>(cookie.value(), &self.encryption_key)
        else {
            log::debug!("session cookie failed to decrypt");
            return Session::Anonymous;
        };
        if claims.expires_at <= Utc::now() {
            return Session::Anonymous;
        }
        let Some(account) = accounts.find_by_id(claims.account_id) else {
            return Session::Anonymous;
        };
        if account.security_stamp != claims.security_stamp {
            log::debug!("session for account {} has stale security stamp", account.id);
            return Session::Anonymous;
        }
        match claims.stage {
            Stage::Partial => Session::PartiallyAuthenticated(account.id),
            Stage::Full => Session::Authenticated(account.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryAccountStore;
    use actix_web::test::TestRequest;

    fn manager() -> SessionManager {
        let settings = SessionSettings {
            session_secret: "unit-test-secret".to_string(),
            session_duration_hours: 2,
            remember_duration_hours: 336,
            cookie_secure: false,
        };
        SessionManager::new(&settings)
    }

    fn stored_account(store: &MemoryAccountStore) -> Account {
        let account = Account::new("a@x.test");
        store.create(account.clone()).unwrap();
        account
    }

    #[test]
    fn authenticated_cookie_round_trip() {
        let store = MemoryAccountStore::new();
        let account = stored_account(&store);
        let manager = manager();

        let cookie = manager.issue_authenticated(&account, false).unwrap();
        let req = TestRequest::default().cookie(cookie).to_http_request();

        assert_eq!(manager.resolve(&req, &store), Session::Authenticated(account.id));
    }

    #[test]
    fn partial_cookie_resolves_to_partial() {
        let store = MemoryAccountStore::new();
        let account = stored_account(&store);
        let manager = manager();

        let cookie = manager.issue_partial(&account).unwrap();
        let req = TestRequest::default().cookie(cookie).to_http_request();

        assert_eq!(
            manager.resolve(&req, &store),
            Session::PartiallyAuthenticated(account.id)
        );
    }

    #[test]
    fn missing_cookie_is_anonymous() {
        let store = MemoryAccountStore::new();
        let req = TestRequest::default().to_http_request();
        assert_eq!(manager().resolve(&req, &store), Session::Anonymous);
    }

    #[test]
    fn tampered_cookie_is_anonymous() {
        let store = MemoryAccountStore::new();
        let _ = stored_account(&store);
        let req = TestRequest::default()
            .cookie(Cookie::new(SESSION_COOKIE, "not-a-valid-ciphertext"))
            .to_http_request();
        assert_eq!(manager().resolve(&req, &store), Session::Anonymous);
    }

    #[test]
    fn stamp_rotation_invalidates_cookie() {
        let store = MemoryAccountStore::new();
        let mut account = stored_account(&store);
        let manager = manager();

        let cookie = manager.issue_authenticated(&account, false).unwrap();

        account.rotate_security_stamp();
        store.update(&account).unwrap();

        let req = TestRequest::default().cookie(cookie).to_http_request();
        assert_eq!(manager.resolve(&req, &store), Session::Anonymous);

        // A cookie issued under the new stamp works
        let fresh = manager.issue_authenticated(&account, false).unwrap();
        let req = TestRequest::default().cookie(fresh).to_http_request();
        assert_eq!(manager.resolve(&req, &store), Session::Authenticated(account.id));
    }

    #[test]
    fn cookie_from_other_key_is_anonymous() {
        let store = MemoryAccountStore::new();
        let account = stored_account(&store);

        let other = SessionManager::new(&SessionSettings {
            session_secret: "different-secret".to_string(),
            session_duration_hours: 2,
            remember_duration_hours: 336,
            cookie_secure: false,
        });
        let cookie = other.issue_authenticated(&account, false).unwrap();

        let req = TestRequest::default().cookie(cookie).to_http_request();
        assert_eq!(manager().resolve(&req, &store), Session::Anonymous);
    }

    #[test]
    fn remember_me_sets_max_age() {
        let store = MemoryAccountStore::new();
        let account = stored_account(&store);
        let manager = manager();

        let session_cookie = manager.issue_authenticated(&account, false).unwrap();
        assert!(session_cookie.max_age().is_none());

        let remembered = manager.issue_authenticated(&account, true).unwrap();
        assert!(remembered.max_age().is_some());
    }
}
