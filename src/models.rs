use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::utils::crypto;

/// Second-factor methods an account can prefer
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TwoFactorMethod {
    #[default]
    None,
    Authenticator,
    Email,
}

impl TwoFactorMethod {
    /// Decode the numeric wire representation used by API clients
    #[must_use]
    pub fn from_wire(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::Authenticator),
            2 => Some(Self::Email),
            _ => None,
        }
    }

    /// Numeric wire representation
    #[must_use]
    pub fn as_wire(self) -> i32 {
        match self {
            Self::None => 0,
            Self::Authenticator => 1,
            Self::Email => 2,
        }
    }
}

/// A user account record
///
/// `password_hash` is absent for passkey-only accounts. `security_stamp`
/// changes whenever a credential changes; session cookies embed the stamp
/// they were issued under, so rotating it invalidates every outstanding
/// session except the one re-issued to the caller.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub email_confirmed: bool,
    pub password_hash: Option<String>,
    pub two_factor_enabled: bool,
    pub preferred_two_factor: TwoFactorMethod,
    pub totp_secret: Option<String>,
    pub failure_count: u32,
    pub locked_until: Option<DateTime<Utc>>,
    pub security_stamp: String,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Create a fresh, unconfirmed account for the given address
    #[must_use]
    pub fn new(email: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.trim().to_ascii_lowercase(),
            email_confirmed: false,
            password_hash: None,
            two_factor_enabled: false,
            preferred_two_factor: TwoFactorMethod::None,
            totp_secret: None,
            failure_count: 0,
            locked_until: None,
            security_stamp: crypto::generate_nonce(16),
            created_at: Utc::now(),
        }
    }

    /// Whether a lockout is currently in effect
    #[must_use]
    pub fn is_locked_out(&self) -> bool {
        self.locked_until.is_some_and(|until| until > Utc::now())
    }

    /// Rotate the security stamp, invalidating previously issued sessions
    pub fn rotate_security_stamp(&mut self) {
        self.security_stamp = crypto::generate_nonce(16);
    }
}

/// A registered passkey, exclusively owned by one account
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PasskeyCredential {
    /// Base64url (no padding) credential id, globally unique
    pub credential_id: String,
    pub account_id: Uuid,
    /// COSE-encoded public key
    pub public_key: Vec<u8>,
    /// Monotonic signature counter reported by the authenticator
    pub sign_count: u32,
    pub transports: Vec<String>,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Current-principal view returned by `GET /auth/user`
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub email: String,
    pub email_confirmed: bool,
    pub two_factor_enabled: bool,
    pub preferred_two_factor_method: i32,
}

impl UserInfo {
    #[must_use]
    pub fn from_account(account: &Account) -> Self {
        Self {
            email: account.email.clone(),
            email_confirmed: account.email_confirmed,
            two_factor_enabled: account.two_factor_enabled,
            preferred_two_factor_method: account.preferred_two_factor.as_wire(),
        }
    }
}

/// Passkey summary exposed to the credential management UI
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PasskeyInfo {
    pub id: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Wire shape for first-factor and step-up outcomes
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub succeeded: bool,
    pub requires_two_factor: bool,
    pub is_locked_out: bool,
    pub is_not_allowed: bool,
    pub message: Option<String>,
}

impl LoginResponse {
    #[must_use]
    pub fn success() -> Self {
        Self {
            succeeded: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn requires_two_factor() -> Self {
        Self {
            requires_two_factor: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn locked_out() -> Self {
        Self {
            is_locked_out: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn not_allowed() -> Self {
        Self {
            is_not_allowed: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failure(message: &str) -> Self {
        Self {
            message: Some(message.to_string()),
            ..Self::default()
        }
    }
}

/// Generic success/failure wire shape
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse {
    pub succeeded: bool,
    pub message: Option<String>,
}

impl ApiResponse {
    #[must_use]
    pub fn success(message: Option<&str>) -> Self {
        Self {
            succeeded: true,
            message: message.map(ToString::to_string),
        }
    }

    #[must_use]
    pub fn failure(message: &str) -> Self {
        Self {
            succeeded: false,
            message: Some(message.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn new_account_normalizes_email() {
        let account = Account::new("  User@Example.COM ");
        assert_eq!(account.email, "user@example.com");
        assert!(!account.email_confirmed);
        assert!(account.password_hash.is_none());
        assert!(!account.security_stamp.is_empty());
    }

    #[test]
    fn lockout_expires() {
        let mut account = Account::new("a@x.test");
        assert!(!account.is_locked_out());

        account.locked_until = Some(Utc::now() + Duration::minutes(5));
        assert!(account.is_locked_out());

        account.locked_until = Some(Utc::now() - Duration::seconds(1));
        assert!(!account.is_locked_out());
    }

    #[test]
    fn stamp_rotation_changes_value() {
        let mut account = Account::new("a@x.test");
        let before = account.security_stamp.clone();
        account.rotate_security_stamp();
        assert_ne!(before, account.security_stamp);
    }

    #[test]
    fn two_factor_method_wire_round_trip() {
        for method in [
            TwoFactorMethod::None,
            TwoFactorMethod::Authenticator,
            TwoFactorMethod::Email,
        ] {
            assert_eq!(TwoFactorMethod::from_wire(method.as_wire()), Some(method));
        }
        assert_eq!(TwoFactorMethod::from_wire(9), None);
    }
}
