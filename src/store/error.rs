use crate::outbox::RecordId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("store lock poisoned during {0}")]
    LockPoisoned(&'static str),

    #[error("concurrent write detected for aggregate {aggregate_id} (expected version {expected}, got {actual})")]
    Conflict {
        aggregate_id: String,
        expected: u64,
        actual: u64,
    },

    #[error("outbox record not found: {0}")]
    NotFound(RecordId),

    #[error("lease on outbox record {0} is no longer held")]
    LeaseLost(RecordId),

    #[error("duplicate outbox record id: {0}")]
    DuplicateRecord(RecordId),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
