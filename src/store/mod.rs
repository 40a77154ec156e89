//! Outbox Store - the only shared mutable state on the producing side.
//!
//! - `TransactionalStore` - atomic aggregate write + outbox insert (used by the coordinator)
//! - `OutboxStore` - lease / mark / inspect operations (used by the dispatcher and operators)
//! - `InMemoryStore` - in-process implementation of both
//!
//! Logical layout: an `outbox_records` table ordered by `(created_at, id)` and
//! an `aggregates` table keyed by aggregate id with an optimistic version.

mod aggregate;
mod error;
mod in_memory;
mod lease;
mod outbox_store;

pub use aggregate::{AggregateWrite, StoredAggregate};
pub use error::StoreError;
pub use in_memory::InMemoryStore;
pub use lease::{Lane, LeaseRequest, LeaseToken};
pub use outbox_store::{OutboxStore, TransactionalStore};
