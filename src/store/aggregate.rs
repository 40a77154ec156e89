use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Current state of a business aggregate as persisted next to the outbox.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredAggregate {
    pub id: String,
    /// Optimistic concurrency version; the first committed write is version 1.
    pub version: u64,
    pub state: Value,
    pub updated_at: SystemTime,
}

/// A write of one aggregate, applied only if the stored version still matches.
#[derive(Clone, Debug, PartialEq)]
pub struct AggregateWrite {
    pub aggregate_id: String,
    /// Version the mutation was computed against; 0 for an aggregate that does not exist yet.
    pub expected_version: u64,
    pub state: Value,
}

impl AggregateWrite {
    pub fn new(aggregate_id: impl Into<String>, expected_version: u64, state: Value) -> Self {
        AggregateWrite {
            aggregate_id: aggregate_id.into(),
            expected_version,
            state,
        }
    }
}
