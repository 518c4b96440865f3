//! Account lockout tracking
//!
//! One failure counter per account, shared between password attempts and
//! second-factor attempts. Splitting the counters would leave whichever
//! factor is untracked open to unlimited guessing, so both paths report
//! here. Counting happens inside the account store's atomic mutation.

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::store::AccountStore;

pub struct LockoutTracker {
    accounts: Arc<dyn AccountStore>,
    threshold: u32,
    duration: Duration,
}

impl LockoutTracker {
    #[must_use]
    pub fn new(accounts: Arc<dyn AccountStore>, threshold: u32, duration_minutes: u64) -> Self {
        Self {
            accounts,
            threshold,
            duration: Duration::minutes(i64::try_from(duration_minutes).unwrap_or(5)),
        }
    }

    /// Record a failed attempt; returns `true` when this failure crossed
    /// the threshold and locked the account
    pub fn record_failure(&self, account_id: Uuid) -> bool {
        let threshold = self.threshold;
        let duration = self.duration;
        let mut now_locked = false;
        let result = self.accounts.mutate(account_id, &mut |account| {
            account.failure_count = account.failure_count.saturating_add(1);
            if account.failure_count >= threshold {
                account.locked_until = Some(Utc::now() + duration);
                now_locked = true;
            }
        });
        if result.is_err() {
            log::debug!("failure recorded for unknown account {account_id}");
        }
        now_locked
    }

    /// Reset the counter and clear any lock after a successful attempt
    pub fn record_success(&self, account_id: Uuid) {
        let _ = self.accounts.mutate(account_id, &mut |account| {
            account.failure_count = 0;
            account.locked_until = None;
        });
    }

    /// Whether the account is currently locked out
    #[must_use]
    pub fn is_locked(&self, account_id: Uuid) -> bool {
        self.accounts
            .find_by_id(account_id)
            .is_some_and(|account| account.is_locked_out())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Account;
    use crate::store::MemoryAccountStore;

    fn setup(threshold: u32) -> (LockoutTracker, Uuid) {
        let store = Arc::new(MemoryAccountStore::new());
        let account = Account::new("a@x.test");
        let id = account.id;
        store.create(account).unwrap();
        (LockoutTracker::new(store, threshold, 5), id)
    }

    #[test]
    fn locks_at_threshold() {
        let (tracker, id) = setup(3);

        assert!(!tracker.record_failure(id));
        assert!(!tracker.record_failure(id));
        assert!(!tracker.is_locked(id));

        assert!(tracker.record_failure(id));
        assert!(tracker.is_locked(id));
    }

    #[test]
    fn success_resets_counter_and_lock() {
        let (tracker, id) = setup(2);

        tracker.record_failure(id);
        tracker.record_failure(id);
        assert!(tracker.is_locked(id));

        tracker.record_success(id);
        assert!(!tracker.is_locked(id));

        // Counter restarted from zero
        assert!(!tracker.record_failure(id));
    }

    #[test]
    fn concurrent_failures_do_not_undercount() {
        let store = Arc::new(MemoryAccountStore::new());
        let account = Account::new("a@x.test");
        let id = account.id;
        store.create(account).unwrap();
        let tracker = Arc::new(LockoutTracker::new(store.clone(), 100, 5));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        tracker.record_failure(id);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.find_by_id(id).unwrap().failure_count, 80);
    }

    #[test]
    fn unknown_account_is_not_locked() {
        let (tracker, _) = setup(3);
        assert!(!tracker.is_locked(Uuid::new_v4()));
    }
}
