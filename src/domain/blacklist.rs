use crate::domain::{degrade, hash_secret};
use crate::domain_model::Operation;
use crate::domain_port::KeyValueStore;
use std::sync::Arc;

const BLACKLIST_PREFIX: &str = "bl";

/// Denylist of access tokens rejected before their natural expiry.
/// Entries expire with the token they mark; nothing deletes them early.
/// Both operations fail open: the token's own expiry is the backstop when
/// the store is down.
pub struct BlacklistManager {
    store: Arc<dyn KeyValueStore>,
}

impl BlacklistManager {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        BlacklistManager { store }
    }

    fn key(token_hash: &str) -> String {
        format!("{}:{}", BLACKLIST_PREFIX, token_hash)
    }

    /// Mark `access_token` unusable for its remaining lifetime. The entry
    /// TTL never exceeds `remaining_secs`, so the denylist cannot outlive
    /// or outgrow the tokens it rejects.
    pub async fn blacklist(&self, access_token: &str, remaining_secs: u64) -> bool {
        if access_token.is_empty() {
            return false;
        }
        let key = Self::key(&hash_secret(access_token));
        match self
            .store
            .set_with_ttl(&key, "1", remaining_secs.max(1))
            .await
        {
            Ok(()) => true,
            Err(err) => degrade(Operation::Blacklist, err, false),
        }
    }

    pub async fn is_blacklisted(&self, access_token: &str) -> bool {
        if access_token.is_empty() {
            return false;
        }
        let key = Self::key(&hash_secret(access_token));
        match self.store.exists(&key).await {
            Ok(found) => found,
            Err(err) => degrade(Operation::IsBlacklisted, err, false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_port::KeyTtl;
    use crate::infra_memory::MemoryKeyValueStore;

    fn manager() -> (Arc<MemoryKeyValueStore>, BlacklistManager) {
        let store = Arc::new(MemoryKeyValueStore::new());
        let manager = BlacklistManager::new(store.clone());
        (store, manager)
    }

    #[tokio::test]
    async fn blacklisted_token_is_reported() {
        let (_, manager) = manager();
        assert!(manager.blacklist("some-access-token", 120).await);
        assert!(manager.is_blacklisted("some-access-token").await);
        assert!(!manager.is_blacklisted("another-token").await);
    }

    #[tokio::test]
    async fn entry_ttl_is_capped_by_remaining_lifetime() {
        let (store, manager) = manager();
        assert!(manager.blacklist("expiring-token", 90).await);
        let key = BlacklistManager::key(&hash_secret("expiring-token"));
        match store.ttl(&key).await.unwrap() {
            KeyTtl::Seconds(secs) => assert!(secs <= 90),
            other => panic!("expected a finite TTL, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn zero_remaining_still_gets_a_positive_ttl() {
        let (store, manager) = manager();
        assert!(manager.blacklist("stale-token", 0).await);
        let key = BlacklistManager::key(&hash_secret("stale-token"));
        assert!(matches!(
            store.ttl(&key).await.unwrap(),
            KeyTtl::Seconds(_)
        ));
    }

    #[tokio::test]
    async fn fails_open_when_store_is_down() {
        let (store, manager) = manager();
        assert!(manager.blacklist("doomed-token", 60).await);
        store.set_available(false);
        assert!(!manager.blacklist("other-token", 60).await);
        // previously blacklisted token now passes: availability wins
        assert!(!manager.is_blacklisted("doomed-token").await);
    }

    #[tokio::test]
    async fn empty_token_is_rejected() {
        let (_, manager) = manager();
        assert!(!manager.blacklist("", 60).await);
        assert!(!manager.is_blacklisted("").await);
    }
}
