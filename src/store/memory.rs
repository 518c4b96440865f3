//! In-memory store implementations
//!
//! Mutex-backed maps giving the atomic per-key semantics the traits
//! require. Suitable for tests and single-node deployments; production
//! deployments put a real keyed store behind the same traits.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::{AccountStore, KeyedStore, StoreError};
use crate::models::{Account, PasskeyCredential};

struct Entry {
    value: String,
    expires_at: DateTime<Utc>,
}

impl Entry {
    fn is_live(&self) -> bool {
        self.expires_at > Utc::now()
    }
}

/// TTL key/value store backed by a mutex-guarded map
#[derive(Default)]
pub struct MemoryKeyedStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryKeyedStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyedStore for MemoryKeyedStore {
    fn put(&self, key: &str, value: &str, ttl: Duration) {
        let mut entries = self.entries.lock().expect("keyed store poisoned");
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Utc::now() + ttl,
            },
        );
    }

    fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().expect("keyed store poisoned");
        let (live, value) = match entries.get(key) {
            Some(entry) => (entry.is_live(), entry.value.clone()),
            None => return None,
        };
        if live {
            Some(value)
        } else {
            entries.remove(key);
            None
        }
    }

    fn take(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().expect("keyed store poisoned");
        let entry = entries.remove(key)?;
        entry.is_live().then_some(entry.value)
    }

    fn delete_if_match(&self, key: &str, expected: &str) -> bool {
        let mut entries = self.entries.lock().expect("keyed store poisoned");
        let (live, matches) = match entries.get(key) {
            Some(entry) => (entry.is_live(), entry.value == expected),
            None => return false,
        };
        if !live {
            entries.remove(key);
            return false;
        }
        if matches {
            entries.remove(key);
        }
        matches
    }

    fn delete(&self, key: &str) {
        let mut entries = self.entries.lock().expect("keyed store poisoned");
        entries.remove(key);
    }
}

#[derive(Default)]
struct AccountsInner {
    accounts: HashMap<Uuid, Account>,
    by_email: HashMap<String, Uuid>,
    credentials: HashMap<String, PasskeyCredential>,
}

/// Account store backed by mutex-guarded maps
#[derive(Default)]
pub struct MemoryAccountStore {
    inner: Mutex<AccountsInner>,
}

impl MemoryAccountStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl AccountStore for MemoryAccountStore {
    fn create(&self, account: Account) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("account store poisoned");
        let email_key = account.email.to_ascii_lowercase();
        if inner.by_email.contains_key(&email_key) {
            return Err(StoreError::Conflict(format!(
                "email already registered: {email_key}"
            )));
        }
        inner.by_email.insert(email_key, account.id);
        inner.accounts.insert(account.id, account);
        Ok(())
    }

    fn update(&self, account: &Account) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("account store poisoned");
        let existing = inner
            .accounts
            .get(&account.id)
            .ok_or(StoreError::NotFound)?;
        let old_email = existing.email.to_ascii_lowercase();
        let new_email = account.email.to_ascii_lowercase();
        if old_email != new_email {
            if inner.by_email.contains_key(&new_email) {
                return Err(StoreError::Conflict(format!(
                    "email already registered: {new_email}"
                )));
            }
            inner.by_email.remove(&old_email);
            inner.by_email.insert(new_email, account.id);
        }
        inner.accounts.insert(account.id, account.clone());
        Ok(())
    }

    fn find_by_id(&self, id: Uuid) -> Option<Account> {
        let inner = self.inner.lock().expect("account store poisoned");
        inner.accounts.get(&id).cloned()
    }

    fn find_by_email(&self, email: &str) -> Option<Account> {
        let inner = self.inner.lock().expect("account store poisoned");
        let id = inner.by_email.get(&email.trim().to_ascii_lowercase())?;
        inner.accounts.get(id).cloned()
    }

    fn mutate(&self, id: Uuid, f: &mut dyn FnMut(&mut Account)) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("account store poisoned");
        let account = inner.accounts.get_mut(&id).ok_or(StoreError::NotFound)?;
        f(account);
        Ok(())
    }

    fn add_credential(&self, credential: PasskeyCredential) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("account store poisoned");
        if inner.credentials.contains_key(&credential.credential_id) {
            return Err(StoreError::Conflict(
                "credential id already registered".to_string(),
            ));
        }
        inner
            .credentials
            .insert(credential.credential_id.clone(), credential);
        Ok(())
    }

    fn credentials_for(&self, account_id: Uuid) -> Vec<PasskeyCredential> {
        let inner = self.inner.lock().expect("account store poisoned");
        let mut credentials: Vec<PasskeyCredential> = inner
            .credentials
            .values()
            .filter(|c| c.account_id == account_id)
            .cloned()
            .collect();
        credentials.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        credentials
    }

    fn find_credential(&self, credential_id: &str) -> Option<PasskeyCredential> {
        let inner = self.inner.lock().expect("account store poisoned");
        inner.credentials.get(credential_id).cloned()
    }

    fn update_credential(&self, credential: &PasskeyCredential) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("account store poisoned");
        if !inner.credentials.contains_key(&credential.credential_id) {
            return Err(StoreError::NotFound);
        }
        inner
            .credentials
            .insert(credential.credential_id.clone(), credential.clone());
        Ok(())
    }

    fn remove_credential(&self, account_id: Uuid, credential_id: &str) -> bool {
        let mut inner = self.inner.lock().expect("account store poisoned");
        let owned = inner
            .credentials
            .get(credential_id)
            .is_some_and(|credential| credential.account_id == account_id);
        if owned {
            inner.credentials.remove(credential_id);
        }
        owned
    }
}
