use crate::outbox::PayloadError;
use crate::store::StoreError;

/// A business mutation refused to apply.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("mutation rejected: {reason}")]
pub struct MutationError {
    pub reason: String,
}

impl MutationError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        MutationError {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// Another writer committed the aggregate first. Safe to resubmit.
    #[error("concurrent write detected for aggregate {aggregate_id} (expected version {expected}, got {actual})")]
    Conflict {
        aggregate_id: String,
        expected: u64,
        actual: u64,
    },

    #[error("storage failure: {0}")]
    Storage(StoreError),

    #[error(transparent)]
    Rejected(#[from] MutationError),

    #[error("payload build failed: {0}")]
    Payload(#[from] PayloadError),

    #[error("aggregate state codec failed: {0}")]
    State(String),

    #[error("record id generation failed: {0}")]
    IdGeneration(String),
}

impl SubmitError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SubmitError::Conflict { .. })
    }
}

impl From<StoreError> for SubmitError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict {
                aggregate_id,
                expected,
                actual,
            } => SubmitError::Conflict {
                aggregate_id,
                expected,
                actual,
            },
            other => SubmitError::Storage(other),
        }
    }
}

impl From<serde_json::Error> for SubmitError {
    fn from(err: serde_json::Error) -> Self {
        SubmitError::State(err.to_string())
    }
}
