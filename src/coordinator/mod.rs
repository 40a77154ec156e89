//! Transaction Coordinator - commit a mutation and its notifications together.

mod coordinator;
mod error;
mod mutation;

pub use coordinator::TransactionCoordinator;
pub use error::{MutationError, SubmitError};
pub use mutation::{Mutation, MutationResult};
