use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LockoutStatus {
    pub locked: bool,
    pub attempts_remaining: u32,
    pub lock_until: Option<DateTime<Utc>>,
}

impl LockoutStatus {
    /// Neutral status: not locked, full attempt budget. Also what lockout
    /// operations degrade to when the store cannot be reached.
    pub fn unlocked(max_attempts: u32) -> Self {
        LockoutStatus {
            locked: false,
            attempts_remaining: max_attempts,
            lock_until: None,
        }
    }

    pub fn locked_until(until: DateTime<Utc>) -> Self {
        LockoutStatus {
            locked: true,
            attempts_remaining: 0,
            lock_until: Some(until),
        }
    }
}
