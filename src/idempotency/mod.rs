//! Idempotency Guard - consumer-side deduplication by message id.
//!
//! - `IdempotencyGuard` - `should_process` / `mark_processed` / `handle` / `sweep`
//! - `ProcessedIdStore` - storage of processed ids with `seen_at`
//! - `SweeperThread` - periodic TTL eviction

mod error;
mod guard;
mod in_memory;
mod store;
mod sweeper;

pub use error::{GuardError, HandleError, ProcessedIdStoreError};
pub use guard::{IdempotencyGuard, Outcome};
pub use in_memory::InMemoryProcessedIds;
pub use store::ProcessedIdStore;
pub use sweeper::{SweepStats, SweeperThread};
