use morsel_auth::domain::*;
use morsel_auth::domain_model::*;
use morsel_auth::infra_memory::MemoryKeyValueStore;
use morsel_auth::server::SessionBackend;
use std::sync::Arc;
use uuid::Uuid;

fn backend() -> (Arc<MemoryKeyValueStore>, SessionBackend) {
    let store = Arc::new(MemoryKeyValueStore::new());
    let backend = SessionBackend::with_store(
        store.clone(),
        RefreshTokenConfig::default(),
        LockoutConfig::default(),
    );
    (store, backend)
}

#[tokio::test]
async fn blacklist_fails_open_while_validate_fails_closed() {
    let (store, backend) = backend();
    let user = UserId(Uuid::new_v4());
    let (token, _) = backend
        .issue_refresh_token(user, "chrome", "1.2.3.4")
        .await
        .unwrap();
    backend.blacklist("some-access-token", 300).await;

    store.set_available(false);

    // fail open: the service stays up, the token expiry is the backstop
    assert!(!backend.is_blacklisted("some-access-token").await);

    // fail closed: an outage is never reported as an invalid credential
    let err = backend
        .validate_refresh_token(user, &token)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Unavailable(_)));
}

#[tokio::test]
async fn best_effort_operations_degrade_to_false() {
    let (store, backend) = backend();
    let user = UserId(Uuid::new_v4());
    let (token, _) = backend
        .issue_refresh_token(user, "chrome", "1.2.3.4")
        .await
        .unwrap();

    store.set_available(false);

    assert!(!backend.blacklist("some-access-token", 300).await);
    assert!(!backend.revoke_refresh_token(user, &token).await);
    assert!(!backend.revoke_all_refresh_tokens(user).await);
    assert!(!backend.clear_failed_logins("user@example.com").await);
    assert!(!backend.is_available().await);
}

#[tokio::test]
async fn lockout_degrades_to_unlocked_during_an_outage() {
    let (store, backend) = backend();
    let max_attempts = LockoutConfig::default().max_attempts;

    backend.record_failed_login("user@example.com").await;
    store.set_available(false);

    let recorded = backend.record_failed_login("user@example.com").await;
    assert_eq!(recorded, LockoutStatus::unlocked(max_attempts));
    let status = backend.is_account_locked("user@example.com").await;
    assert_eq!(status, LockoutStatus::unlocked(max_attempts));
}

#[tokio::test]
async fn issuance_fails_closed_during_an_outage() {
    let (store, backend) = backend();
    store.set_available(false);

    let err = backend
        .issue_refresh_token(UserId(Uuid::new_v4()), "chrome", "1.2.3.4")
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Unavailable(_)));
}

#[test]
fn fail_policy_table_matches_the_documented_split() {
    use FailPolicy::*;
    use Operation::*;

    for operation in [
        IssueRefreshToken,
        ValidateRefreshToken,
        RotateRefreshToken,
        ListSessions,
    ] {
        assert_eq!(operation.fail_policy(), FailClosed, "{:?}", operation);
    }
    for operation in [
        Blacklist,
        IsBlacklisted,
        RevokeRefreshToken,
        RevokeAllRefreshTokens,
        RecordFailedLogin,
        ClearFailedLogins,
        IsAccountLocked,
    ] {
        assert_eq!(operation.fail_policy(), FailOpen, "{:?}", operation);
    }
}
