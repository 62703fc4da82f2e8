use anyhow::{Result, anyhow};
use config::{Config, File};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub store: Store,
    pub session: Session,
    pub lockout: Lockout,
    pub log: Log,
}

#[derive(Debug, Deserialize)]
pub struct Store {
    pub backend: String, // "memory" or "redis"
    pub redis_url: String,
    pub key_prefix: String,
}

#[derive(Debug, Deserialize)]
pub struct Session {
    pub max_sessions: usize,
    pub refresh_ttl_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct Lockout {
    pub max_attempts: u32,
    pub window_secs: u64,
    pub duration_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct Log {
    pub filter: String,
}

#[cfg(debug_assertions)]
const SETTINGS_PATH: &str = "settings/dev.toml";
#[cfg(not(debug_assertions))]
const SETTINGS_PATH: &str = "settings/release.toml";

pub fn parse_settings(path: Option<&str>) -> Result<Settings> {
    let path = path.unwrap_or(SETTINGS_PATH);

    let settings: Settings = Config::builder()
        .add_source(File::with_name(path))
        .build()
        .map_err(|e| anyhow!(e))?
        .try_deserialize()
        .map_err(|e| anyhow!(e))?;

    Ok(settings)
}
