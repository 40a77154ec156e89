use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::delivery::{DeliveryClient, DeliveryError, Disposition, Envelope, Source, Transport};
use crate::idempotency::{HandleError, IdempotencyGuard, Outcome, ProcessedIdStore};

/// Result of one [`IdempotentConsumer::poll`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConsumeReport {
    pub delivered: usize,
    pub processed: usize,
    pub duplicates: usize,
    /// Handler or guard failures; these deliveries were rejected for redelivery.
    pub failed: usize,
    /// Same id already being handled by another caller; rejected for redelivery.
    pub in_progress: usize,
}

/// Pulls deliveries from a transport and runs a handler through the guard.
///
/// Processed and duplicate deliveries are acked; anything else is rejected
/// so the transport redelivers it.
///
/// ```ignore
/// let consumer = IdempotentConsumer::new(client.clone(), guard.clone());
/// let report = consumer.poll(&Source::queue(EMAIL_QUEUE), |envelope| {
///     let order: Order = envelope.decode_json().map_err(|e| e.to_string())?;
///     mailer.send_confirmation(&order)
/// })?;
/// ```
pub struct IdempotentConsumer<T: Transport, S> {
    client: Arc<DeliveryClient<T>>,
    guard: Arc<IdempotencyGuard<S>>,
}

impl<T: Transport, S: ProcessedIdStore> IdempotentConsumer<T, S> {
    pub fn new(client: Arc<DeliveryClient<T>>, guard: Arc<IdempotencyGuard<S>>) -> Self {
        IdempotentConsumer { client, guard }
    }

    pub fn guard(&self) -> &IdempotencyGuard<S> {
        &self.guard
    }

    /// Consume every delivery currently available on `source`.
    pub fn poll<F, E>(&self, source: &Source, mut handler: F) -> Result<ConsumeReport, DeliveryError>
    where
        F: FnMut(&Envelope) -> Result<(), E>,
        E: fmt::Display,
    {
        let mut report = ConsumeReport::default();
        let guard = &self.guard;

        let delivered = self.client.consume(source, &mut |envelope: &Envelope| {
            let id = envelope.message_id.as_str();
            match guard.handle(id, || handler(envelope)) {
                Ok(Outcome::Processed(())) => {
                    report.processed += 1;
                    Disposition::Ack
                }
                Ok(Outcome::Duplicate) => {
                    debug!(message_id = id, channel = %envelope.channel, "duplicate acked");
                    report.duplicates += 1;
                    Disposition::Ack
                }
                Ok(Outcome::InProgress) => {
                    report.in_progress += 1;
                    Disposition::Reject
                }
                Err(HandleError::Handler(err)) => {
                    warn!(message_id = id, event_type = %envelope.event_type, error = %err, "handler failed");
                    report.failed += 1;
                    Disposition::Reject
                }
                Err(HandleError::Guard(err)) => {
                    error!(message_id = id, error = %err, "idempotency guard failed");
                    report.failed += 1;
                    Disposition::Reject
                }
            }
        })?;

        report.delivered = delivered;
        Ok(report)
    }
}
