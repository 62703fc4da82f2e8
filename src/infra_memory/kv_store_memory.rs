use crate::domain_port::*;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone)]
enum Stored {
    Text(String),
    Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Stored,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-process fallback store with TTL bookkeeping. Stands in for Redis in
/// deployments without one, and doubles as the test double: availability
/// can be toggled and individual commands can be made to fail, which is how
/// partial batch failures are exercised.
pub struct MemoryKeyValueStore {
    entries: DashMap<String, Entry>,
    available: AtomicBool,
    fail_queue: Mutex<VecDeque<String>>,
    drop_ttl_once: AtomicBool,
}

impl Default for MemoryKeyValueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        MemoryKeyValueStore {
            entries: DashMap::new(),
            available: AtomicBool::new(true),
            fail_queue: Mutex::new(VecDeque::new()),
            drop_ttl_once: AtomicBool::new(false),
        }
    }

    /// Toggle reachability; while unavailable every call reports
    /// [`StoreError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Queue an injected failure for the next command with this name
    /// (`"set_with_ttl"`, `"delete"`, ...), whether issued directly or
    /// inside a batch.
    pub fn fail_next(&self, command: &str) {
        self.fail_queue
            .lock()
            .expect("fail queue poisoned")
            .push_back(command.to_string());
    }

    /// Make the next `set_with_ttl` silently drop its TTL, simulating a
    /// store that loses the expiry.
    pub fn drop_ttl_on_next_set(&self) {
        self.drop_ttl_once.store(true, Ordering::SeqCst);
    }

    fn take_failure(&self, command: &str) -> bool {
        let mut queue = self.fail_queue.lock().expect("fail queue poisoned");
        if let Some(pos) = queue.iter().position(|queued| queued == command) {
            queue.remove(pos);
            true
        } else {
            false
        }
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable(
                "memory store marked unavailable".to_string(),
            ))
        }
    }

    fn checked(&self, command: &str) -> Result<(), StoreError> {
        if self.take_failure(command) {
            return Err(StoreError::Command(format!(
                "injected failure for {}",
                command
            )));
        }
        Ok(())
    }

    fn purge_if_expired(&self, key: &str) {
        let now = Utc::now();
        let expired = self
            .entries
            .get(key)
            .map(|entry| entry.is_expired(now))
            .unwrap_or(false);
        if expired {
            self.entries.remove(key);
        }
    }

    fn do_get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.checked("get")?;
        self.purge_if_expired(key);
        match self.entries.get(key).map(|entry| entry.value.clone()) {
            Some(Stored::Text(value)) => Ok(Some(value)),
            Some(Stored::Set(_)) => Err(StoreError::Command(format!(
                "wrong type: {} holds a set",
                key
            ))),
            None => Ok(None),
        }
    }

    fn do_set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError> {
        self.checked("set_with_ttl")?;
        let expires_at = if self.drop_ttl_once.swap(false, Ordering::SeqCst) {
            None
        } else {
            Some(Utc::now() + Duration::seconds(ttl_secs as i64))
        };
        self.entries.insert(
            key.to_string(),
            Entry {
                value: Stored::Text(value.to_string()),
                expires_at,
            },
        );
        Ok(())
    }

    fn do_delete(&self, key: &str) -> Result<(), StoreError> {
        self.checked("delete")?;
        self.entries.remove(key);
        Ok(())
    }

    fn do_expire(&self, key: &str, ttl_secs: u64) -> Result<(), StoreError> {
        self.checked("expire")?;
        self.purge_if_expired(key);
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.expires_at = Some(Utc::now() + Duration::seconds(ttl_secs as i64));
        }
        Ok(())
    }

    fn do_add_to_set(&self, key: &str, member: &str) -> Result<(), StoreError> {
        self.checked("add_to_set")?;
        self.purge_if_expired(key);
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Stored::Set(HashSet::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Stored::Set(members) => {
                members.insert(member.to_string());
                Ok(())
            }
            Stored::Text(_) => Err(StoreError::Command(format!(
                "wrong type: {} holds a string",
                key
            ))),
        }
    }

    fn do_remove_from_set(&self, key: &str, member: &str) -> Result<(), StoreError> {
        self.checked("remove_from_set")?;
        self.purge_if_expired(key);
        if let Some(mut entry) = self.entries.get_mut(key)
            && let Stored::Set(members) = &mut entry.value
        {
            members.remove(member);
        }
        Ok(())
    }

    fn do_set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        self.checked("set_members")?;
        self.purge_if_expired(key);
        match self.entries.get(key).map(|entry| entry.value.clone()) {
            Some(Stored::Set(members)) => Ok(members.into_iter().collect()),
            Some(Stored::Text(_)) => Err(StoreError::Command(format!(
                "wrong type: {} holds a string",
                key
            ))),
            None => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check_available()?;
        self.do_get(key)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError> {
        self.check_available()?;
        self.do_set_with_ttl(key, value, ttl_secs)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.check_available()?;
        self.do_delete(key)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.check_available()?;
        self.checked("exists")?;
        self.purge_if_expired(key);
        Ok(self.entries.contains_key(key))
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl, StoreError> {
        self.check_available()?;
        self.checked("ttl")?;
        self.purge_if_expired(key);
        match self.entries.get(key) {
            None => Ok(KeyTtl::Absent),
            Some(entry) => match entry.expires_at {
                None => Ok(KeyTtl::NoExpiry),
                Some(at) => {
                    let secs = (at - Utc::now()).num_seconds().max(0) as u64;
                    Ok(KeyTtl::Seconds(secs))
                }
            },
        }
    }

    async fn increment(&self, key: &str) -> Result<i64, StoreError> {
        self.check_available()?;
        self.checked("increment")?;
        self.purge_if_expired(key);
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Stored::Text("0".to_string()),
            expires_at: None,
        });
        match &mut entry.value {
            Stored::Text(raw) => {
                let next = raw
                    .parse::<i64>()
                    .map_err(|_| StoreError::Command(format!("{} is not an integer", key)))?
                    + 1;
                *raw = next.to_string();
                Ok(next)
            }
            Stored::Set(_) => Err(StoreError::Command(format!(
                "wrong type: {} holds a set",
                key
            ))),
        }
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), StoreError> {
        self.check_available()?;
        self.do_expire(key, ttl_secs)
    }

    async fn add_to_set(&self, key: &str, member: &str) -> Result<(), StoreError> {
        self.check_available()?;
        self.do_add_to_set(key, member)
    }

    async fn remove_from_set(&self, key: &str, member: &str) -> Result<(), StoreError> {
        self.check_available()?;
        self.do_remove_from_set(key, member)
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        self.check_available()?;
        self.do_set_members(key)
    }

    /// Commands run in order; a failure cuts the stream and the remaining
    /// commands are not executed, matching a connection dropped
    /// mid-pipeline. This is what keeps write-before-delete orderings
    /// meaningful for callers.
    async fn execute(&self, commands: Vec<BatchCommand>) -> Result<BatchOutcome, StoreError> {
        self.check_available()?;
        let mut replies = Vec::with_capacity(commands.len());
        let mut cut = false;
        for command in &commands {
            if cut {
                replies.push(BatchReply::Failed(
                    "not executed: earlier command in batch failed".to_string(),
                ));
                continue;
            }
            let reply = match command {
                BatchCommand::SetWithTtl {
                    key,
                    value,
                    ttl_secs,
                } => self
                    .do_set_with_ttl(key, value, *ttl_secs)
                    .map(|()| BatchReply::Done),
                BatchCommand::Delete { key } => self.do_delete(key).map(|()| BatchReply::Done),
                BatchCommand::Expire { key, ttl_secs } => {
                    self.do_expire(key, *ttl_secs).map(|()| BatchReply::Done)
                }
                BatchCommand::AddToSet { key, member } => {
                    self.do_add_to_set(key, member).map(|()| BatchReply::Done)
                }
                BatchCommand::RemoveFromSet { key, member } => self
                    .do_remove_from_set(key, member)
                    .map(|()| BatchReply::Done),
                BatchCommand::SetMembers { key } => {
                    self.do_set_members(key).map(BatchReply::Members)
                }
                BatchCommand::Get { key } => self.do_get(key).map(BatchReply::Value),
            };
            match reply {
                Ok(reply) => replies.push(reply),
                Err(err) => {
                    replies.push(BatchReply::Failed(err.to_string()));
                    cut = true;
                }
            }
        }
        Ok(BatchOutcome { replies })
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn ensure_connected(&self) -> Result<(), StoreError> {
        self.check_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn expired_entries_read_as_absent() {
        let store = MemoryKeyValueStore::new();
        store.set_with_ttl("k", "v", 60).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        // force-expire by rewriting with a zero TTL
        store.set_with_ttl("k", "v", 0).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.ttl("k").await.unwrap(), KeyTtl::Absent);
    }

    #[tokio::test]
    async fn injected_failure_hits_only_the_named_command() {
        let store = MemoryKeyValueStore::new();
        store.fail_next("delete");
        store.set_with_ttl("k", "v", 60).await.unwrap();
        assert!(store.delete("k").await.is_err());
        // the failure is consumed
        store.delete("k").await.unwrap();
    }

    #[tokio::test]
    async fn batch_reports_per_command_results_and_cuts_on_failure() {
        let store = MemoryKeyValueStore::new();
        store.fail_next("add_to_set");
        let outcome = store
            .execute(vec![
                BatchCommand::SetWithTtl {
                    key: "a".to_string(),
                    value: "1".to_string(),
                    ttl_secs: 60,
                },
                BatchCommand::Get {
                    key: "a".to_string(),
                },
                BatchCommand::AddToSet {
                    key: "s".to_string(),
                    member: "m".to_string(),
                },
                BatchCommand::Delete {
                    key: "a".to_string(),
                },
            ])
            .await
            .unwrap();

        assert!(outcome.failure(0).is_none());
        assert_eq!(outcome.value(1), Some("1"));
        assert!(outcome.failure(2).is_some());
        // the delete after the failure never ran
        assert!(outcome.failure(3).is_some());
        assert!(store.exists("a").await.unwrap());
    }

    #[tokio::test]
    async fn increment_starts_at_one() {
        let store = MemoryKeyValueStore::new();
        assert_eq!(store.increment("count").await.unwrap(), 1);
        assert_eq!(store.increment("count").await.unwrap(), 2);
    }
}
