//! Idempotent Consumer - transport deliveries run through the idempotency guard.

mod consumer;

pub use consumer::{ConsumeReport, IdempotentConsumer};
