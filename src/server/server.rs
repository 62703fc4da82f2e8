use crate::domain::*;
use crate::domain_model::*;
use crate::domain_port::KeyValueStore;
use crate::infra_memory::MemoryKeyValueStore;
use crate::infra_redis::RedisKeyValueStore;
use crate::settings::Settings;
use std::sync::Arc;

/// Wires the store into the managers and exposes the subsystem's public
/// operation set. The store handle is injected here at construction; its
/// lifecycle (connect at startup, close at shutdown) belongs to the host
/// process, not to the managers.
pub struct SessionBackend {
    store: Arc<dyn KeyValueStore>,
    blacklist: BlacklistManager,
    refresh: RefreshTokenManager,
    lockout: LockoutManager,
}

impl SessionBackend {
    pub async fn try_new(settings: &Settings) -> anyhow::Result<Self> {
        let store: Arc<dyn KeyValueStore> = match settings.store.backend.as_str() {
            "memory" => Arc::new(MemoryKeyValueStore::new()),
            "redis" => {
                let client = redis::Client::open(settings.store.redis_url.as_str())?;
                let manager = client.get_connection_manager().await?;
                Arc::new(RedisKeyValueStore::new(
                    manager,
                    settings.store.key_prefix.clone(),
                ))
            }
            other => return Err(anyhow::anyhow!("Unknown store backend: {}", other)),
        };

        let refresh_config = RefreshTokenConfig {
            refresh_ttl_secs: settings.session.refresh_ttl_secs,
            max_sessions: settings.session.max_sessions,
        };
        let lockout_config = LockoutConfig {
            max_attempts: settings.lockout.max_attempts,
            window_secs: settings.lockout.window_secs,
            duration_secs: settings.lockout.duration_secs,
        };

        Ok(Self::with_store(store, refresh_config, lockout_config))
    }

    pub fn with_store(
        store: Arc<dyn KeyValueStore>,
        refresh_config: RefreshTokenConfig,
        lockout_config: LockoutConfig,
    ) -> Self {
        SessionBackend {
            blacklist: BlacklistManager::new(store.clone()),
            refresh: RefreshTokenManager::new(store.clone(), refresh_config),
            lockout: LockoutManager::new(store.clone(), lockout_config),
            store,
        }
    }
}

#[async_trait::async_trait]
impl SessionService for SessionBackend {
    async fn blacklist(&self, access_token: &str, remaining_secs: u64) -> bool {
        self.blacklist.blacklist(access_token, remaining_secs).await
    }

    async fn is_blacklisted(&self, access_token: &str) -> bool {
        self.blacklist.is_blacklisted(access_token).await
    }

    async fn issue_refresh_token(
        &self,
        user: UserId,
        device: &str,
        ip: &str,
    ) -> Result<(RefreshToken, RefreshTokenRecord), SessionError> {
        self.refresh.issue(user, device, ip).await
    }

    async fn validate_refresh_token(
        &self,
        user: UserId,
        token: &RefreshToken,
    ) -> Result<Option<RefreshTokenRecord>, SessionError> {
        self.refresh.validate(user, token).await
    }

    async fn rotate_refresh_token(
        &self,
        user: UserId,
        old_token: &RefreshToken,
        device: &str,
        ip: &str,
    ) -> Result<Option<(RefreshToken, RefreshTokenRecord)>, SessionError> {
        self.refresh.rotate(user, old_token, device, ip).await
    }

    async fn revoke_refresh_token(&self, user: UserId, token: &RefreshToken) -> bool {
        self.refresh.revoke(user, token).await
    }

    async fn revoke_all_refresh_tokens(&self, user: UserId) -> bool {
        self.refresh.revoke_all(user).await
    }

    async fn list_sessions(&self, user: UserId) -> Result<Vec<SessionMeta>, SessionError> {
        self.refresh.list_sessions(user).await
    }

    async fn record_failed_login(&self, email: &str) -> LockoutStatus {
        self.lockout.record_failure(email).await
    }

    async fn clear_failed_logins(&self, email: &str) -> bool {
        self.lockout.clear(email).await
    }

    async fn is_account_locked(&self, email: &str) -> LockoutStatus {
        self.lockout.status(email).await
    }

    async fn is_available(&self) -> bool {
        self.store.is_available().await
    }
}
