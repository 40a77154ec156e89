//! Dispatcher - lease outbox records, publish them, record the outcome.
//!
//! Per record: `Pending -> InFlight -> Published | Pending (retry) | Failed`.
//!
//! - [`Dispatcher::run_cycle`] handles one leased batch of a lane
//! - [`DispatcherPool`] runs one background thread per lane
//! - [`AlertSink`] receives every record that ends up `Failed`

mod alert;
mod backoff;
mod dispatcher;
mod pool;

#[cfg(feature = "emitter")]
pub use alert::EmitterAlertSink;
pub use alert::{Alert, AlertSink, BufferAlertSink, FailureReason, TracingAlertSink};
pub use backoff::Backoff;
pub use dispatcher::{DispatchReport, Dispatcher, RecordOutcome};
pub use pool::{DispatcherPool, WorkerStats};

pub use crate::store::Lane;
