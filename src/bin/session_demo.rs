/// Example demonstrating the session lifecycle against the configured
/// store backend: lockout tracking around a failed-login burst, refresh
/// token issuance up to the session cap, rotation, listing and revocation,
/// and access-token blacklisting.
use morsel_auth::domain::SessionService;
use morsel_auth::logger::*;
use morsel_auth::server::SessionBackend;
use morsel_auth::settings::*;
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let logger = Logger::new_bootstrap();
    let project_settings = parse_settings(cli.settings.as_deref())?;
    info!(?project_settings);
    logger.reload_from_config(&LogConfig {
        filter: project_settings.log.filter.clone(),
    })?;

    let backend = SessionBackend::try_new(&project_settings).await?;
    info!(available = backend.is_available().await, "session backend up");

    // lockout: burn through the attempt budget, then clear
    let email = "demo@morsel.dev";
    for _ in 0..project_settings.lockout.max_attempts {
        let status = backend.record_failed_login(email).await;
        info!(?status, "failed login recorded");
    }
    info!(status = ?backend.is_account_locked(email).await, "after the burst");
    backend.clear_failed_logins(email).await;
    info!(status = ?backend.is_account_locked(email).await, "after clear");

    // sessions: one more than the cap, the oldest gets evicted
    let user = morsel_auth::domain_model::UserId(Uuid::new_v4());
    let mut tokens = Vec::new();
    for i in 0..=project_settings.session.max_sessions {
        let (token, record) = backend
            .issue_refresh_token(user, &format!("device-{}", i), "203.0.113.7")
            .await?;
        debug!(device = %record.device, "issued");
        tokens.push(token);
    }
    info!(
        sessions = backend.list_sessions(user).await?.len(),
        cap = project_settings.session.max_sessions,
        "after overflow"
    );

    // rotation consumes the old token
    let latest = tokens.pop().expect("issued at least one token");
    let (rotated, _) = backend
        .rotate_refresh_token(user, &latest, "device-rotated", "203.0.113.7")
        .await?
        .expect("fresh token rotates");
    info!(
        old_still_valid = backend
            .validate_refresh_token(user, &latest)
            .await?
            .is_some(),
        new_valid = backend
            .validate_refresh_token(user, &rotated)
            .await?
            .is_some(),
        "after rotation"
    );

    // blacklist an access token for its remaining lifetime
    let access_token = "demo-access-token";
    backend.blacklist(access_token, 300).await;
    info!(
        blacklisted = backend.is_blacklisted(access_token).await,
        "after blacklist"
    );

    backend.revoke_all_refresh_tokens(user).await;
    info!(
        sessions = backend.list_sessions(user).await?.len(),
        "after revoke-all"
    );

    Ok(())
}
