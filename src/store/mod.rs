//! Storage collaborator traits
//!
//! The authentication core never touches a database directly. Accounts and
//! passkey credentials live behind [`AccountStore`]; short-lived secrets
//! (verification codes, enrollment tokens, ceremony challenges, reset and
//! confirmation tokens) live behind [`KeyedStore`], a TTL key/value store
//! with atomic per-key operations. Expiry is lazy: an expired key reads as
//! absent.

mod memory;

pub use memory::{MemoryAccountStore, MemoryKeyedStore};

use chrono::Duration;
use uuid::Uuid;

use crate::models::{Account, PasskeyCredential};

/// Errors surfaced by the storage collaborators
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    /// Unique constraint violation (duplicate email or credential id)
    #[error("conflict: {0}")]
    Conflict(String),
    /// Record not found
    #[error("not found")]
    NotFound,
}

/// TTL key/value store with atomic per-key semantics
///
/// Single-key linearizability is all the core requires; implementations do
/// not need multi-key transactions.
pub trait KeyedStore: Send + Sync {
    /// Store a value under `key`, replacing any existing entry
    fn put(&self, key: &str, value: &str, ttl: Duration);

    /// Read a live value; expired entries read as absent
    fn get(&self, key: &str) -> Option<String>;

    /// Read and remove a live value in one step
    fn take(&self, key: &str) -> Option<String>;

    /// Remove the entry only if its live value equals `expected`
    ///
    /// Returns `true` when the entry existed, was unexpired, and matched.
    /// This is the commit point for all single-use secrets.
    fn delete_if_match(&self, key: &str, expected: &str) -> bool;

    /// Remove the entry unconditionally
    fn delete(&self, key: &str);
}

/// Durable account and passkey credential storage
pub trait AccountStore: Send + Sync {
    /// Insert a new account; fails with [`StoreError::Conflict`] when the
    /// email is already registered (case-insensitive)
    fn create(&self, account: Account) -> Result<(), StoreError>;

    /// Replace the stored record for `account.id`
    fn update(&self, account: &Account) -> Result<(), StoreError>;

    fn find_by_id(&self, id: Uuid) -> Option<Account>;

    /// Case-insensitive email lookup
    fn find_by_email(&self, email: &str) -> Option<Account>;

    /// Mutate one account atomically under the store's lock
    ///
    /// Lockout counting goes through here so concurrent failures on the
    /// same account cannot under-count.
    fn mutate(&self, id: Uuid, f: &mut dyn FnMut(&mut Account)) -> Result<(), StoreError>;

    /// Attach a credential; fails with [`StoreError::Conflict`] when the
    /// credential id is already registered to any account
    fn add_credential(&self, credential: PasskeyCredential) -> Result<(), StoreError>;

    fn credentials_for(&self, account_id: Uuid) -> Vec<PasskeyCredential>;

    /// Resolve a credential by its base64url id, across all accounts
    fn find_credential(&self, credential_id: &str) -> Option<PasskeyCredential>;

    /// Replace a stored credential (sign count and last-used updates)
    fn update_credential(&self, credential: &PasskeyCredential) -> Result<(), StoreError>;

    /// Remove a credential owned by `account_id`; returns whether it existed
    fn remove_credential(&self, account_id: Uuid, credential_id: &str) -> bool;
}
