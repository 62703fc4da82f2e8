use crate::domain::{SessionError, degrade, hash_secret};
use crate::domain_model::*;
use crate::domain_port::*;
use chrono::{DateTime, Duration, Utc};
use nanoid::nanoid;
use std::sync::Arc;
use tracing::warn;

const RECORD_PREFIX: &str = "rt";
const INDEX_PREFIX: &str = "si";
/// 43 characters of the default nanoid alphabet, ~256 bits of entropy.
const TOKEN_LEN: usize = 43;

#[derive(Debug, Clone)]
pub struct RefreshTokenConfig {
    pub refresh_ttl_secs: u64,
    pub max_sessions: usize,
}

impl Default for RefreshTokenConfig {
    fn default() -> Self {
        RefreshTokenConfig {
            refresh_ttl_secs: 7 * 24 * 60 * 60,
            max_sessions: 5,
        }
    }
}

/// Issues, validates, rotates and revokes refresh tokens, and maintains the
/// per-user session index (a set of token hashes capped at
/// `max_sessions`).
///
/// Every multi-step mutation goes through one non-atomic batch and branches
/// on the per-command result vector. The ordering rule for rotation is that
/// the new credential is written before the old one is deleted, so no
/// partial failure can leave a user with zero valid refresh tokens.
pub struct RefreshTokenManager {
    store: Arc<dyn KeyValueStore>,
    config: RefreshTokenConfig,
}

impl RefreshTokenManager {
    pub fn new(store: Arc<dyn KeyValueStore>, config: RefreshTokenConfig) -> Self {
        RefreshTokenManager { store, config }
    }

    /// Record keys are scoped per user so a leaked hash cannot be probed
    /// across accounts.
    fn record_key(user: UserId, token_hash: &str) -> String {
        format!("{}:{}:{}", RECORD_PREFIX, user, token_hash)
    }

    fn index_key(user: UserId) -> String {
        format!("{}:{}", INDEX_PREFIX, user)
    }

    fn generate_token() -> String {
        nanoid!(TOKEN_LEN)
    }

    fn build_record(&self, user: UserId, device: &str, ip: &str) -> RefreshTokenRecord {
        let now = Utc::now();
        RefreshTokenRecord {
            user_id: user,
            device: device.to_string(),
            ip: ip.to_string(),
            created_at: now,
            expires_at: now + Duration::seconds(self.config.refresh_ttl_secs as i64),
        }
    }

    /// Issue a fresh token: store the record, index its hash, refresh the
    /// index TTL and read back the membership, all in one batch. Any failed
    /// command aborts issuance. If the membership now exceeds the cap, the
    /// oldest excess sessions are evicted best-effort.
    pub async fn issue(
        &self,
        user: UserId,
        device: &str,
        ip: &str,
    ) -> Result<(RefreshToken, RefreshTokenRecord), SessionError> {
        let token = Self::generate_token();
        let token_hash = hash_secret(&token);
        let record = self.build_record(user, device, ip);
        let payload =
            serde_json::to_string(&record).map_err(|e| SessionError::Internal(e.to_string()))?;
        let record_key = Self::record_key(user, &token_hash);
        let index_key = Self::index_key(user);

        let outcome = self
            .store
            .execute(vec![
                BatchCommand::SetWithTtl {
                    key: record_key.clone(),
                    value: payload,
                    ttl_secs: self.config.refresh_ttl_secs,
                },
                BatchCommand::AddToSet {
                    key: index_key.clone(),
                    member: token_hash.clone(),
                },
                BatchCommand::Expire {
                    key: index_key,
                    ttl_secs: self.config.refresh_ttl_secs,
                },
                BatchCommand::SetMembers {
                    key: Self::index_key(user),
                },
            ])
            .await?;

        if let Some((index, err)) = outcome.first_failure() {
            return Err(SessionError::Store(format!(
                "issuance batch command {} failed: {}",
                index, err
            )));
        }

        let members: Vec<String> = outcome
            .members(3)
            .map(|members| members.to_vec())
            .unwrap_or_default();
        if members.len() > self.config.max_sessions {
            let excess = members.len() - self.config.max_sessions;
            self.evict_oldest(user, &members, &token_hash, excess).await;
        }

        self.verify_record_ttl(&record_key).await?;

        Ok((RefreshToken(token), record))
    }

    /// Evict exactly `excess` sessions, oldest first by record creation
    /// time. Index members whose record is missing count as oldest: evicting
    /// them reconciles the index with the records. The freshly issued hash
    /// is never a candidate. Best effort: issuance already succeeded, so
    /// failures are logged and swallowed.
    async fn evict_oldest(&self, user: UserId, members: &[String], keep_hash: &str, excess: usize) {
        let reads: Vec<BatchCommand> = members
            .iter()
            .map(|member| BatchCommand::Get {
                key: Self::record_key(user, member),
            })
            .collect();
        let outcome = match self.store.execute(reads).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(user = %user, error = %err, "session cap eviction skipped, record read failed");
                return;
            }
        };

        let mut by_age: Vec<(DateTime<Utc>, &String)> = Vec::new();
        for (i, member) in members.iter().enumerate() {
            if member == keep_hash {
                continue;
            }
            let created_at = outcome
                .value(i)
                .and_then(|raw| serde_json::from_str::<RefreshTokenRecord>(raw).ok())
                .map(|record| record.created_at)
                .unwrap_or(DateTime::<Utc>::MIN_UTC);
            by_age.push((created_at, member));
        }
        by_age.sort_by_key(|(created_at, _)| *created_at);

        let mut deletes = Vec::with_capacity(excess * 2);
        for (_, member) in by_age.into_iter().take(excess) {
            deletes.push(BatchCommand::Delete {
                key: Self::record_key(user, member),
            });
            deletes.push(BatchCommand::RemoveFromSet {
                key: Self::index_key(user),
                member: member.clone(),
            });
        }
        match self.store.execute(deletes).await {
            Ok(outcome) => {
                if let Some((index, err)) = outcome.first_failure() {
                    warn!(
                        user = %user,
                        command = index,
                        error = err,
                        "session cap eviction partially failed"
                    );
                }
            }
            Err(err) => {
                warn!(user = %user, error = %err, "session cap eviction batch failed");
            }
        }
    }

    /// Confirm the record actually carries an expiry after a batched write.
    /// A silently dropped TTL is set again and re-checked once; a record
    /// that is altogether missing means the issuance failed.
    async fn verify_record_ttl(&self, record_key: &str) -> Result<(), SessionError> {
        match self.store.ttl(record_key).await? {
            KeyTtl::Seconds(_) => Ok(()),
            KeyTtl::Absent => Err(SessionError::Store(
                "refresh record missing after write".to_string(),
            )),
            KeyTtl::NoExpiry => {
                warn!(key = record_key, "store dropped record TTL, setting it again");
                self.store
                    .expire(record_key, self.config.refresh_ttl_secs)
                    .await?;
                match self.store.ttl(record_key).await? {
                    KeyTtl::Seconds(_) => Ok(()),
                    KeyTtl::NoExpiry => Err(SessionError::Store(
                        "refresh record TTL could not be restored".to_string(),
                    )),
                    KeyTtl::Absent => Err(SessionError::Store(
                        "refresh record vanished while restoring TTL".to_string(),
                    )),
                }
            }
        }
    }

    /// Look up a token. Fail-closed: a store outage raises
    /// [`SessionError::Unavailable`] so callers can retry, and is never
    /// reported as "invalid credential". A record past its own expiry is
    /// treated as absent and proactively reaped from record and index.
    pub async fn validate(
        &self,
        user: UserId,
        token: &RefreshToken,
    ) -> Result<Option<RefreshTokenRecord>, SessionError> {
        if token.0.is_empty() {
            return Err(SessionError::Validation("empty refresh token".to_string()));
        }
        // one reconnect attempt before the read; a second failure is an outage
        if self.store.ensure_connected().await.is_err() {
            self.store.ensure_connected().await?;
        }

        let token_hash = hash_secret(&token.0);
        let record_key = Self::record_key(user, &token_hash);
        let Some(raw) = self.store.get(&record_key).await? else {
            return Ok(None);
        };
        let record: RefreshTokenRecord =
            serde_json::from_str(&raw).map_err(|e| SessionError::Internal(e.to_string()))?;

        if record.is_expired(Utc::now()) {
            let reap = self
                .store
                .execute(vec![
                    BatchCommand::Delete { key: record_key },
                    BatchCommand::RemoveFromSet {
                        key: Self::index_key(user),
                        member: token_hash,
                    },
                ])
                .await;
            if let Err(err) = reap {
                warn!(user = %user, error = %err, "failed to reap expired refresh record");
            }
            return Ok(None);
        }

        Ok(Some(record))
    }

    /// Replace `old_token` with a fresh one. The batch writes the new
    /// credential before deleting the old one and each reply is checked:
    ///
    /// - new-record write failed: abort, return `None`, old token untouched;
    /// - new record stored but the old delete failed: rotation still
    ///   succeeds (the old token outlives its single use, logged as a
    ///   security-relevant anomaly) because availability wins.
    ///
    /// Two concurrent rotations of the same old token can both pass
    /// validation in the window before the winner's delete lands; the
    /// session cap bounds the fallout. Callers needing strict single use
    /// would need a conditional delete-if-equal at the store.
    pub async fn rotate(
        &self,
        user: UserId,
        old_token: &RefreshToken,
        device: &str,
        ip: &str,
    ) -> Result<Option<(RefreshToken, RefreshTokenRecord)>, SessionError> {
        if self.validate(user, old_token).await?.is_none() {
            return Ok(None);
        }

        let token = Self::generate_token();
        let token_hash = hash_secret(&token);
        let record = self.build_record(user, device, ip);
        let payload =
            serde_json::to_string(&record).map_err(|e| SessionError::Internal(e.to_string()))?;
        let record_key = Self::record_key(user, &token_hash);
        let old_hash = hash_secret(&old_token.0);
        let index_key = Self::index_key(user);

        let outcome = self
            .store
            .execute(vec![
                // 0: new record, 1: new index member, 2: index TTL,
                // 3: old record delete, 4: old index member removal
                BatchCommand::SetWithTtl {
                    key: record_key.clone(),
                    value: payload,
                    ttl_secs: self.config.refresh_ttl_secs,
                },
                BatchCommand::AddToSet {
                    key: index_key.clone(),
                    member: token_hash,
                },
                BatchCommand::Expire {
                    key: index_key.clone(),
                    ttl_secs: self.config.refresh_ttl_secs,
                },
                BatchCommand::Delete {
                    key: Self::record_key(user, &old_hash),
                },
                BatchCommand::RemoveFromSet {
                    key: index_key,
                    member: old_hash,
                },
            ])
            .await?;

        if let Some(err) = outcome.failure(0) {
            warn!(
                user = %user,
                error = err,
                "rotation aborted: new record write failed, old token stays valid"
            );
            return Ok(None);
        }
        for index in [1usize, 2] {
            if let Some(err) = outcome.failure(index) {
                warn!(user = %user, command = index, error = err, "session index update failed during rotation");
            }
        }
        if outcome.failure(3).is_some() || outcome.failure(4).is_some() {
            warn!(
                user = %user,
                "security anomaly: old refresh token outlived rotation, its removal failed after the new token was stored"
            );
        }

        self.verify_record_ttl(&record_key).await?;

        Ok(Some((RefreshToken(token), record)))
    }

    /// Best effort: deletes the record and its index member, reports
    /// failure as `false` without raising.
    pub async fn revoke(&self, user: UserId, token: &RefreshToken) -> bool {
        if token.0.is_empty() {
            return false;
        }
        let token_hash = hash_secret(&token.0);
        let commands = vec![
            BatchCommand::Delete {
                key: Self::record_key(user, &token_hash),
            },
            BatchCommand::RemoveFromSet {
                key: Self::index_key(user),
                member: token_hash,
            },
        ];
        match self.store.execute(commands).await {
            Ok(outcome) => match outcome.first_failure() {
                None => true,
                Some((index, err)) => {
                    warn!(user = %user, command = index, error = err, "revoke partially failed");
                    false
                }
            },
            Err(err) => degrade(Operation::RevokeRefreshToken, err, false),
        }
    }

    /// Delete every indexed record, then the index itself.
    pub async fn revoke_all(&self, user: UserId) -> bool {
        let index_key = Self::index_key(user);
        let members = match self.store.set_members(&index_key).await {
            Ok(members) => members,
            Err(err) => return degrade(Operation::RevokeAllRefreshTokens, err, false),
        };

        let mut commands: Vec<BatchCommand> = members
            .iter()
            .map(|member| BatchCommand::Delete {
                key: Self::record_key(user, member),
            })
            .collect();
        commands.push(BatchCommand::Delete { key: index_key });

        match self.store.execute(commands).await {
            Ok(outcome) => match outcome.first_failure() {
                None => true,
                Some((index, err)) => {
                    warn!(user = %user, command = index, error = err, "revoke-all partially failed");
                    false
                }
            },
            Err(err) => degrade(Operation::RevokeAllRefreshTokens, err, false),
        }
    }

    /// Active sessions for a user: device, origin address and timestamps,
    /// with the secret hash stripped. Absent or expired index members are
    /// simply omitted.
    pub async fn list_sessions(&self, user: UserId) -> Result<Vec<SessionMeta>, SessionError> {
        let members = self.store.set_members(&Self::index_key(user)).await?;
        if members.is_empty() {
            return Ok(Vec::new());
        }

        let reads: Vec<BatchCommand> = members
            .iter()
            .map(|member| BatchCommand::Get {
                key: Self::record_key(user, member),
            })
            .collect();
        let outcome = self.store.execute(reads).await?;

        let now = Utc::now();
        let mut sessions = Vec::new();
        for i in 0..members.len() {
            let Some(raw) = outcome.value(i) else {
                continue;
            };
            let Ok(record) = serde_json::from_str::<RefreshTokenRecord>(raw) else {
                continue;
            };
            if record.is_expired(now) {
                continue;
            }
            sessions.push(SessionMeta::from(record));
        }
        Ok(sessions)
    }
}
