use async_trait::async_trait;

/// TTL state of a key as reported by the store.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum KeyTtl {
    /// Key exists and expires in this many seconds.
    Seconds(u64),
    /// Key exists but carries no expiry.
    NoExpiry,
    /// Key does not exist.
    Absent,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Connectivity or timeout. Never conflated with a missing key.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store command failed: {0}")]
    Command(String),
}

impl StoreError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// One queued command of a non-atomic batch.
#[derive(Debug, Clone)]
pub enum BatchCommand {
    SetWithTtl {
        key: String,
        value: String,
        ttl_secs: u64,
    },
    Delete {
        key: String,
    },
    Expire {
        key: String,
        ttl_secs: u64,
    },
    AddToSet {
        key: String,
        member: String,
    },
    RemoveFromSet {
        key: String,
        member: String,
    },
    SetMembers {
        key: String,
    },
    Get {
        key: String,
    },
}

/// Per-command reply of a batch.
#[derive(Debug, Clone)]
pub enum BatchReply {
    Done,
    Members(Vec<String>),
    Value(Option<String>),
    Failed(String),
}

/// Result vector of a batch round trip. Batches carry no cross-command
/// atomicity, so every reply must be inspected individually; a caller that
/// assumes all-or-nothing here is wrong.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub replies: Vec<BatchReply>,
}

impl BatchOutcome {
    pub fn all_failed(len: usize, error: &str) -> Self {
        BatchOutcome {
            replies: vec![BatchReply::Failed(error.to_string()); len],
        }
    }

    /// Error message of the command at `index`, if it failed (a missing
    /// reply counts as failed).
    pub fn failure(&self, index: usize) -> Option<&str> {
        match self.replies.get(index) {
            Some(BatchReply::Failed(e)) => Some(e.as_str()),
            Some(_) => None,
            None => Some("no reply for queued command"),
        }
    }

    pub fn first_failure(&self) -> Option<(usize, &str)> {
        (0..self.replies.len()).find_map(|i| self.failure(i).map(|e| (i, e)))
    }

    /// Set members returned by the command at `index`, if it was a
    /// successful `SetMembers`.
    pub fn members(&self, index: usize) -> Option<&[String]> {
        match self.replies.get(index) {
            Some(BatchReply::Members(m)) => Some(m.as_slice()),
            _ => None,
        }
    }

    /// Value returned by the command at `index`, if it was a successful
    /// `Get` that found the key.
    pub fn value(&self, index: usize) -> Option<&str> {
        match self.replies.get(index) {
            Some(BatchReply::Value(Some(v))) => Some(v.as_str()),
            _ => None,
        }
    }
}

/// Port over a TTL-capable key-value store (Redis, or the in-process
/// fallback map). Connectivity failures surface as
/// [`StoreError::Unavailable`]; a missing key is a value, not an error.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError>;
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;
    async fn ttl(&self, key: &str) -> Result<KeyTtl, StoreError>;
    async fn increment(&self, key: &str) -> Result<i64, StoreError>;
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), StoreError>;
    async fn add_to_set(&self, key: &str, member: &str) -> Result<(), StoreError>;
    async fn remove_from_set(&self, key: &str, member: &str) -> Result<(), StoreError>;
    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError>;

    /// Execute queued commands in one round trip, without atomicity.
    /// `Err` means the round trip itself could not happen; otherwise each
    /// reply reports its own success or failure.
    async fn execute(&self, commands: Vec<BatchCommand>) -> Result<BatchOutcome, StoreError>;

    /// Whether the store currently looks reachable.
    async fn is_available(&self) -> bool;

    /// Ping the store, reconnecting if needed.
    async fn ensure_connected(&self) -> Result<(), StoreError>;
}
