//! Reliable outbox relay for an order-processing platform.
//!
//! A business mutation and its downstream notifications (work-queue message,
//! event-stream record) are committed together, then published by a
//! dispatcher with at-least-once semantics; consumers deduplicate by message
//! id.
//!
//! ```text
//! request ─► TransactionCoordinator ─► OutboxStore ─► Dispatcher ─► DeliveryClient
//!            (mutation + records,                     (lease, publish,   │
//!             one atomic commit)                       retry, fail)      ▼
//!                                            handler ◄─ IdempotencyGuard ◄─ consumer
//! ```

pub mod background;
pub mod clock;
pub mod config;
pub mod consumer;
pub mod coordinator;
pub mod delivery;
pub mod dispatch;
pub mod idempotency;
pub mod outbox;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, DispatcherConfig, GuardConfig, RelayConfig};
pub use consumer::{ConsumeReport, IdempotentConsumer};
pub use coordinator::{Mutation, MutationError, MutationResult, SubmitError, TransactionCoordinator};
pub use delivery::{
    DeliveryClient, DeliveryError, Envelope, InMemoryBroker, LogTransport, Publisher, Source,
    Transport,
};
pub use dispatch::{
    AlertSink, Backoff, DispatchReport, Dispatcher, DispatcherPool, FailureReason, Lane,
    WorkerStats,
};
pub use idempotency::{IdempotencyGuard, InMemoryProcessedIds, Outcome, ProcessedIdStore};
pub use outbox::{Destination, NotificationSpec, OutboxRecord, OutboxStatus, RecordId};
pub use store::{InMemoryStore, OutboxStore, StoreError, TransactionalStore};
