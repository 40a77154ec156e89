use serde::de::DeserializeOwned;
use serde::Serialize;

use super::error::MutationError;
use crate::outbox::RecordId;

/// A change to one business aggregate.
///
/// The coordinator loads the stored state (or `State::default()` when the
/// aggregate does not exist yet), calls `apply`, and persists the result
/// together with the outbox records of the submission.
pub trait Mutation {
    type State: Serialize + DeserializeOwned + Default;
    type Output;

    fn aggregate_id(&self) -> &str;

    fn apply(&self, state: &mut Self::State) -> Result<Self::Output, MutationError>;
}

/// Outcome of a committed submission.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationResult<O> {
    pub output: O,
    /// Aggregate version after the commit.
    pub version: u64,
    /// One id per notification, in submission order.
    pub record_ids: Vec<RecordId>,
}
