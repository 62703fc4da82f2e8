use crate::domain_model::*;
use crate::domain_port::StoreError;

// region session service

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The store cannot be reached. Callers must map this to a retryable
    /// outcome (e.g. 503), never to "invalid credential".
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store error: {0}")]
    Store(String),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for SessionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(e) => SessionError::Unavailable(e),
            StoreError::Command(e) => SessionError::Store(e),
        }
    }
}

/// Full operation set of the session and credential lifecycle subsystem.
/// "Not found" outcomes are values (`None`/`false`), never errors; the
/// fail-open operations return booleans or neutral defaults instead of
/// raising. See [`Operation::fail_policy`] for the per-operation split.
#[async_trait::async_trait]
pub trait SessionService: Send + Sync {
    /// Fail-open, best effort.
    async fn blacklist(&self, access_token: &str, remaining_secs: u64) -> bool;
    /// Fail-open: a store outage reports "not blacklisted"; the access
    /// token's own expiry is the backstop.
    async fn is_blacklisted(&self, access_token: &str) -> bool;

    async fn issue_refresh_token(
        &self,
        user: UserId,
        device: &str,
        ip: &str,
    ) -> Result<(RefreshToken, RefreshTokenRecord), SessionError>;
    /// Fail-closed: raises [`SessionError::Unavailable`] during an outage.
    async fn validate_refresh_token(
        &self,
        user: UserId,
        token: &RefreshToken,
    ) -> Result<Option<RefreshTokenRecord>, SessionError>;
    async fn rotate_refresh_token(
        &self,
        user: UserId,
        old_token: &RefreshToken,
        device: &str,
        ip: &str,
    ) -> Result<Option<(RefreshToken, RefreshTokenRecord)>, SessionError>;
    /// Fail-open, best effort.
    async fn revoke_refresh_token(&self, user: UserId, token: &RefreshToken) -> bool;
    /// Fail-open, best effort.
    async fn revoke_all_refresh_tokens(&self, user: UserId) -> bool;
    async fn list_sessions(&self, user: UserId) -> Result<Vec<SessionMeta>, SessionError>;

    /// Fail-open: degrades to "not locked, full attempts remaining".
    async fn record_failed_login(&self, email: &str) -> LockoutStatus;
    /// Fail-open, best effort. Called on every successful login.
    async fn clear_failed_logins(&self, email: &str) -> bool;
    /// Fail-open: degrades to "not locked, full attempts remaining".
    async fn is_account_locked(&self, email: &str) -> LockoutStatus;

    /// Capability probe; callers use it to skip refresh-token issuance
    /// gracefully when the store is down.
    async fn is_available(&self) -> bool;
}

/// Swallow a store failure under the fail-open policy and return the
/// operation's neutral default.
pub(crate) fn degrade<T>(operation: Operation, err: StoreError, default: T) -> T {
    debug_assert_eq!(operation.fail_policy(), FailPolicy::FailOpen);
    tracing::warn!(
        operation = ?operation,
        error = %err,
        "store failure degraded by fail-open policy"
    );
    default
}

// endregion
