use morsel_auth::domain::*;
use morsel_auth::domain_model::*;
use morsel_auth::infra_memory::MemoryKeyValueStore;
use morsel_auth::server::SessionBackend;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn backend_with(
    max_sessions: usize,
) -> (Arc<MemoryKeyValueStore>, SessionBackend) {
    let store = Arc::new(MemoryKeyValueStore::new());
    let backend = SessionBackend::with_store(
        store.clone(),
        RefreshTokenConfig {
            refresh_ttl_secs: 3600,
            max_sessions,
        },
        LockoutConfig::default(),
    );
    (store, backend)
}

fn backend() -> (Arc<MemoryKeyValueStore>, SessionBackend) {
    backend_with(5)
}

fn user() -> UserId {
    UserId(Uuid::new_v4())
}

#[tokio::test]
async fn issued_token_validates_for_its_user() {
    let (_, backend) = backend();
    let user = user();

    let (token, record) = backend
        .issue_refresh_token(user, "chrome", "1.2.3.4")
        .await
        .unwrap();
    assert_eq!(record.user_id, user);

    let found = backend
        .validate_refresh_token(user, &token)
        .await
        .unwrap()
        .expect("freshly issued token validates");
    assert_eq!(found.user_id, user);
    assert_eq!(found.device, "chrome");
    assert_eq!(found.ip, "1.2.3.4");
}

#[tokio::test]
async fn token_is_scoped_to_its_user() {
    let (_, backend) = backend();
    let owner = user();
    let (token, _) = backend
        .issue_refresh_token(owner, "chrome", "1.2.3.4")
        .await
        .unwrap();

    let other = user();
    assert!(
        backend
            .validate_refresh_token(other, &token)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn rotation_replaces_the_old_token() {
    let (_, backend) = backend();
    let user = user();

    let (t1, _) = backend
        .issue_refresh_token(user, "chrome", "1.2.3.4")
        .await
        .unwrap();
    let (t2, _) = backend
        .rotate_refresh_token(user, &t1, "chrome", "1.2.3.4")
        .await
        .unwrap()
        .expect("valid token rotates");

    assert!(
        backend
            .validate_refresh_token(user, &t1)
            .await
            .unwrap()
            .is_none()
    );
    assert!(
        backend
            .validate_refresh_token(user, &t2)
            .await
            .unwrap()
            .is_some()
    );

    let sessions = backend.list_sessions(user).await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].device, "chrome");
    assert_eq!(sessions[0].ip, "1.2.3.4");
}

#[tokio::test]
async fn failed_new_token_write_keeps_the_old_token() {
    let (store, backend) = backend();
    let user = user();

    let (old, _) = backend
        .issue_refresh_token(user, "chrome", "1.2.3.4")
        .await
        .unwrap();

    // the rotation batch opens with the new-record write; make it fail
    store.fail_next("set_with_ttl");
    let rotated = backend
        .rotate_refresh_token(user, &old, "chrome", "1.2.3.4")
        .await
        .unwrap();
    assert!(rotated.is_none());

    // nothing was lost: the old token still validates
    assert!(
        backend
            .validate_refresh_token(user, &old)
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn failed_old_token_delete_still_rotates() {
    let (store, backend) = backend();
    let user = user();

    let (old, _) = backend
        .issue_refresh_token(user, "chrome", "1.2.3.4")
        .await
        .unwrap();

    // new record and index writes land, the old-record delete fails
    store.fail_next("delete");
    let (new, _) = backend
        .rotate_refresh_token(user, &old, "chrome", "1.2.3.4")
        .await
        .unwrap()
        .expect("rotation succeeds despite the failed delete");

    // availability won: the new token works, the old one lingers
    assert!(
        backend
            .validate_refresh_token(user, &new)
            .await
            .unwrap()
            .is_some()
    );
    assert!(
        backend
            .validate_refresh_token(user, &old)
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn rotating_an_unknown_token_returns_none() {
    let (_, backend) = backend();
    let rotated = backend
        .rotate_refresh_token(user(), &RefreshToken("never-issued".into()), "chrome", "1.2.3.4")
        .await
        .unwrap();
    assert!(rotated.is_none());
}

#[tokio::test]
async fn session_cap_evicts_the_oldest() {
    let (_, backend) = backend_with(3);
    let user = user();

    let mut tokens = Vec::new();
    for i in 0..4 {
        let (token, _) = backend
            .issue_refresh_token(user, &format!("device-{}", i), "1.2.3.4")
            .await
            .unwrap();
        tokens.push(token);
        // distinct creation timestamps so eviction order is deterministic
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let sessions = backend.list_sessions(user).await.unwrap();
    assert_eq!(sessions.len(), 3);

    // the first-issued token was evicted, the rest survive
    assert!(
        backend
            .validate_refresh_token(user, &tokens[0])
            .await
            .unwrap()
            .is_none()
    );
    for token in &tokens[1..] {
        assert!(
            backend
                .validate_refresh_token(user, token)
                .await
                .unwrap()
                .is_some()
        );
    }
    assert!(!sessions.iter().any(|s| s.device == "device-0"));
}

#[tokio::test]
async fn revoke_removes_a_single_session() {
    let (_, backend) = backend();
    let user = user();

    let (t1, _) = backend
        .issue_refresh_token(user, "chrome", "1.2.3.4")
        .await
        .unwrap();
    let (t2, _) = backend
        .issue_refresh_token(user, "firefox", "1.2.3.5")
        .await
        .unwrap();

    assert!(backend.revoke_refresh_token(user, &t1).await);
    assert!(
        backend
            .validate_refresh_token(user, &t1)
            .await
            .unwrap()
            .is_none()
    );
    assert!(
        backend
            .validate_refresh_token(user, &t2)
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn revoke_all_clears_every_session() {
    let (_, backend) = backend();
    let user = user();

    let mut tokens = Vec::new();
    for _ in 0..3 {
        let (token, _) = backend
            .issue_refresh_token(user, "chrome", "1.2.3.4")
            .await
            .unwrap();
        tokens.push(token);
    }

    assert!(backend.revoke_all_refresh_tokens(user).await);
    assert!(backend.list_sessions(user).await.unwrap().is_empty());
    for token in &tokens {
        assert!(
            backend
                .validate_refresh_token(user, token)
                .await
                .unwrap()
                .is_none()
        );
    }
}

#[tokio::test]
async fn listing_a_user_without_sessions_is_empty() {
    let (_, backend) = backend();
    assert!(backend.list_sessions(user()).await.unwrap().is_empty());
}

#[tokio::test]
async fn full_scenario_issue_rotate_list() {
    let (_, backend) = backend();
    let user_a = user();

    let (t1, _) = backend
        .issue_refresh_token(user_a, "chrome", "1.2.3.4")
        .await
        .unwrap();
    let (t2, record2) = backend
        .rotate_refresh_token(user_a, &t1, "chrome", "1.2.3.4")
        .await
        .unwrap()
        .expect("rotation succeeds");

    assert!(
        backend
            .validate_refresh_token(user_a, &t1)
            .await
            .unwrap()
            .is_none()
    );
    let validated = backend
        .validate_refresh_token(user_a, &t2)
        .await
        .unwrap()
        .expect("new token validates");
    assert_eq!(validated.user_id, user_a);

    let sessions = backend.list_sessions(user_a).await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].device, record2.device);
    assert_eq!(sessions[0].ip, record2.ip);
    assert_eq!(sessions[0].created_at, record2.created_at);
    assert_eq!(sessions[0].expires_at, record2.expires_at);
}
