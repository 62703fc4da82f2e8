use crate::domain_model::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque high-entropy refresh secret handed to the client. Only its hash
/// ever reaches the store.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshToken(pub String);

/// Stored refresh-token document, keyed per user by the token hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    pub user_id: UserId,
    pub device: String,
    pub ip: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Session listing projection: record metadata with the secret hash stripped.
#[derive(Debug, Clone, Serialize)]
pub struct SessionMeta {
    pub device: String,
    pub ip: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<RefreshTokenRecord> for SessionMeta {
    fn from(record: RefreshTokenRecord) -> Self {
        SessionMeta {
            device: record.device,
            ip: record.ip,
            created_at: record.created_at,
            expires_at: record.expires_at,
        }
    }
}
