//! Outbox records and the notification specs they are built from.
//!
//! The outbox pattern has two distinct phases:
//! 1. **Commit phase** (see `coordinator`) - atomically commit the mutation and
//!    one record per notification
//! 2. **Dispatch phase** (see `dispatch`) - lease records and publish them to
//!    the broker or event stream

mod notification;
mod record;

pub use notification::{BuiltNotification, NotificationSpec, PayloadError, EMAIL_QUEUE, EVENTS_TOPIC};
pub use record::{Destination, OutboxRecord, OutboxStatus, RecordId};
