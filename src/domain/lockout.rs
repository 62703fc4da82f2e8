use crate::domain::degrade;
use crate::domain_model::{LockoutStatus, Operation};
use crate::domain_port::{BatchCommand, KeyValueStore, StoreError};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::warn;

const COUNTER_PREFIX: &str = "fl";
const MARKER_PREFIX: &str = "lk";

#[derive(Debug, Clone)]
pub struct LockoutConfig {
    pub max_attempts: u32,
    pub window_secs: u64,
    pub duration_secs: u64,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        LockoutConfig {
            max_attempts: 5,
            window_secs: 15 * 60,
            duration_secs: 15 * 60,
        }
    }
}

/// Tracks consecutive failed logins per account and enforces a timed
/// lockout: a counter with an attempt-window TTL, and a marker written once
/// the counter reaches the threshold. An unexpired marker is authoritative
/// over the counter. All operations fail open; lockout is defense in depth,
/// not a hard gate.
pub struct LockoutManager {
    store: Arc<dyn KeyValueStore>,
    config: LockoutConfig,
}

impl LockoutManager {
    pub fn new(store: Arc<dyn KeyValueStore>, config: LockoutConfig) -> Self {
        LockoutManager { store, config }
    }

    fn normalize(email: &str) -> String {
        email.trim().to_lowercase()
    }

    fn counter_key(email: &str) -> String {
        format!("{}:{}", COUNTER_PREFIX, email)
    }

    fn marker_key(email: &str) -> String {
        format!("{}:{}", MARKER_PREFIX, email)
    }

    /// Unexpired lock expiry held by the marker, if any. A marker that is
    /// stale or unparsable is lazily deleted.
    async fn read_marker(&self, marker_key: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let Some(raw) = self.store.get(marker_key).await? else {
            return Ok(None);
        };
        match raw.parse::<DateTime<Utc>>() {
            Ok(until) if until > Utc::now() => Ok(Some(until)),
            _ => {
                let _ = self.store.delete(marker_key).await;
                Ok(None)
            }
        }
    }

    /// Count one failed attempt. While a marker is present this is a no-op
    /// that reports locked. The counter's window TTL is set only on the
    /// first increment; reaching the threshold writes the marker.
    pub async fn record_failure(&self, email: &str) -> LockoutStatus {
        let email = Self::normalize(email);
        let counter_key = Self::counter_key(&email);
        let marker_key = Self::marker_key(&email);

        let attempt: Result<LockoutStatus, StoreError> = async {
            if let Some(until) = self.read_marker(&marker_key).await? {
                return Ok(LockoutStatus::locked_until(until));
            }

            let count = self.store.increment(&counter_key).await?;
            if count == 1 {
                // first failure opens the attempt window
                self.store
                    .expire(&counter_key, self.config.window_secs)
                    .await?;
            }

            if count >= i64::from(self.config.max_attempts) {
                let until = Utc::now() + Duration::seconds(self.config.duration_secs as i64);
                self.store
                    .set_with_ttl(&marker_key, &until.to_rfc3339(), self.config.duration_secs)
                    .await?;
                warn!(email = %email, attempts = count, "account locked after repeated failed logins");
                return Ok(LockoutStatus::locked_until(until));
            }

            Ok(LockoutStatus {
                locked: false,
                attempts_remaining: self.config.max_attempts - count as u32,
                lock_until: None,
            })
        }
        .await;

        match attempt {
            Ok(status) => status,
            Err(err) => degrade(
                Operation::RecordFailedLogin,
                err,
                LockoutStatus::unlocked(self.config.max_attempts),
            ),
        }
    }

    /// Drop counter and marker. Called on every successful login.
    pub async fn clear(&self, email: &str) -> bool {
        let email = Self::normalize(email);
        let commands = vec![
            BatchCommand::Delete {
                key: Self::counter_key(&email),
            },
            BatchCommand::Delete {
                key: Self::marker_key(&email),
            },
        ];
        match self.store.execute(commands).await {
            Ok(outcome) => match outcome.first_failure() {
                None => true,
                Some((index, err)) => {
                    warn!(email = %email, command = index, error = err, "lockout clear partially failed");
                    false
                }
            },
            Err(err) => degrade(Operation::ClearFailedLogins, err, false),
        }
    }

    /// Read-only check with the same marker-over-counter precedence as
    /// `record_failure`.
    pub async fn status(&self, email: &str) -> LockoutStatus {
        let email = Self::normalize(email);
        let counter_key = Self::counter_key(&email);
        let marker_key = Self::marker_key(&email);

        let check: Result<LockoutStatus, StoreError> = async {
            if let Some(until) = self.read_marker(&marker_key).await? {
                return Ok(LockoutStatus::locked_until(until));
            }
            let count = self
                .store
                .get(&counter_key)
                .await?
                .and_then(|raw| raw.parse::<u32>().ok())
                .unwrap_or(0);
            Ok(LockoutStatus {
                locked: false,
                attempts_remaining: self.config.max_attempts.saturating_sub(count),
                lock_until: None,
            })
        }
        .await;

        match check {
            Ok(status) => status,
            Err(err) => degrade(
                Operation::IsAccountLocked,
                err,
                LockoutStatus::unlocked(self.config.max_attempts),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra_memory::MemoryKeyValueStore;

    fn manager_with(config: LockoutConfig) -> (Arc<MemoryKeyValueStore>, LockoutManager) {
        let store = Arc::new(MemoryKeyValueStore::new());
        let manager = LockoutManager::new(store.clone(), config);
        (store, manager)
    }

    fn manager() -> (Arc<MemoryKeyValueStore>, LockoutManager) {
        manager_with(LockoutConfig {
            max_attempts: 3,
            window_secs: 60,
            duration_secs: 60,
        })
    }

    #[tokio::test]
    async fn locks_at_threshold_and_not_before() {
        let (_, manager) = manager();

        let first = manager.record_failure("user@example.com").await;
        assert!(!first.locked);
        assert_eq!(first.attempts_remaining, 2);

        let second = manager.record_failure("user@example.com").await;
        assert!(!second.locked);
        assert_eq!(second.attempts_remaining, 1);

        let third = manager.record_failure("user@example.com").await;
        assert!(third.locked);
        assert_eq!(third.attempts_remaining, 0);
        assert!(third.lock_until.is_some());
    }

    #[tokio::test]
    async fn marker_takes_precedence_and_failures_become_noops() {
        let (store, manager) = manager();
        for _ in 0..3 {
            manager.record_failure("user@example.com").await;
        }

        // counter is no longer incremented while the marker stands
        let counter_key = LockoutManager::counter_key("user@example.com");
        let before = store.get(&counter_key).await.unwrap();
        let status = manager.record_failure("user@example.com").await;
        assert!(status.locked);
        assert_eq!(store.get(&counter_key).await.unwrap(), before);
    }

    #[tokio::test]
    async fn clear_resets_counter_and_marker() {
        let (_, manager) = manager();
        for _ in 0..3 {
            manager.record_failure("user@example.com").await;
        }
        assert!(manager.clear("user@example.com").await);

        let status = manager.status("user@example.com").await;
        assert_eq!(status, LockoutStatus::unlocked(3));
    }

    #[tokio::test]
    async fn expired_marker_is_lazily_dropped() {
        let (store, manager) = manager();
        let marker_key = LockoutManager::marker_key("user@example.com");
        let stale = (Utc::now() - Duration::seconds(30)).to_rfc3339();
        store.set_with_ttl(&marker_key, &stale, 600).await.unwrap();

        let status = manager.status("user@example.com").await;
        assert!(!status.locked);
        assert!(!store.exists(&marker_key).await.unwrap());
    }

    #[tokio::test]
    async fn email_is_normalized() {
        let (_, manager) = manager();
        manager.record_failure("  User@Example.COM ").await;
        let status = manager.status("user@example.com").await;
        assert_eq!(status.attempts_remaining, 2);
    }

    #[tokio::test]
    async fn degrades_to_unlocked_when_store_is_down() {
        let (store, manager) = manager();
        manager.record_failure("user@example.com").await;
        store.set_available(false);

        let recorded = manager.record_failure("user@example.com").await;
        assert_eq!(recorded, LockoutStatus::unlocked(3));
        let status = manager.status("user@example.com").await;
        assert_eq!(status, LockoutStatus::unlocked(3));
        assert!(!manager.clear("user@example.com").await);
    }
}
