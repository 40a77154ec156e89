use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::alert::{Alert, AlertSink, FailureReason, TracingAlertSink};
use super::backoff::Backoff;
use crate::clock::{Clock, SystemClock};
use crate::config::DispatcherConfig;
use crate::delivery::{DeliveryError, Envelope, Publisher};
use crate::outbox::OutboxRecord;
use crate::store::{Lane, LeaseRequest, LeaseToken, OutboxStore, StoreError};

/// Result of dispatching a single leased record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Published,
    /// Transient failure, pending again after backoff.
    Retried,
    /// Marked failed and alerted.
    Failed,
    /// The store could not record the outcome, or the lease was lost to
    /// another worker. The record stays with whoever holds it now, or is
    /// leased again once the lease expires.
    Unconfirmed,
}

/// Result of one dispatch cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub leased: usize,
    pub published: usize,
    pub retried: usize,
    pub failed: usize,
    pub unconfirmed: usize,
}

impl DispatchReport {
    pub fn is_idle(&self) -> bool {
        self.leased == 0
    }

    pub fn merge(&mut self, other: DispatchReport) {
        self.leased += other.leased;
        self.published += other.published;
        self.retried += other.retried;
        self.failed += other.failed;
        self.unconfirmed += other.unconfirmed;
    }

    fn record(&mut self, outcome: RecordOutcome) {
        match outcome {
            RecordOutcome::Published => self.published += 1,
            RecordOutcome::Retried => self.retried += 1,
            RecordOutcome::Failed => self.failed += 1,
            RecordOutcome::Unconfirmed => self.unconfirmed += 1,
        }
    }
}

/// Leases outbox records and publishes them.
///
/// The store is responsible for lease visibility and per-aggregate ordering;
/// the dispatcher decides what happens to each leased record:
/// published, retried with backoff, or failed with an operator alert.
pub struct Dispatcher<S, P, A = TracingAlertSink> {
    store: S,
    publisher: P,
    alerts: A,
    clock: Arc<dyn Clock>,
    worker_id: String,
    batch_size: usize,
    lease: Duration,
    max_attempts: u32,
    backoff: Backoff,
}

impl<S, P> Dispatcher<S, P> {
    /// Create a dispatcher with default settings and tracing alerts.
    pub fn new(store: S, publisher: P) -> Self {
        Self::from_config(store, publisher, &DispatcherConfig::default())
    }

    pub fn from_config(store: S, publisher: P, config: &DispatcherConfig) -> Self {
        Dispatcher {
            store,
            publisher,
            alerts: TracingAlertSink,
            clock: Arc::new(SystemClock),
            worker_id: config.worker_id.clone(),
            batch_size: config.batch_size,
            lease: config.lease_duration,
            max_attempts: config.max_attempts,
            backoff: config.backoff(),
        }
    }
}

impl<S, P, A> Dispatcher<S, P, A> {
    /// Set the worker ID (recorded as `leased_by`).
    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    /// Set the batch size (max records leased per cycle).
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Set the lease duration for leased records.
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Set the number of attempts per retry budget.
    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Clock used to timestamp alerts.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the alert sink.
    pub fn with_alert_sink<B>(self, alerts: B) -> Dispatcher<S, P, B> {
        Dispatcher {
            store: self.store,
            publisher: self.publisher,
            alerts,
            clock: self.clock,
            worker_id: self.worker_id,
            batch_size: self.batch_size,
            lease: self.lease,
            max_attempts: self.max_attempts,
            backoff: self.backoff,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    pub fn alert_sink(&self) -> &A {
        &self.alerts
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }
}

impl<S: OutboxStore, P: Publisher, A: AlertSink> Dispatcher<S, P, A> {
    /// Lease one batch from `lane` and dispatch every record in it.
    ///
    /// Only a lease failure is returned as an error; a failure on one record
    /// is recorded in the report and never stops the rest of the batch.
    pub fn run_cycle(&self, lane: Lane) -> Result<DispatchReport, StoreError> {
        let request =
            LeaseRequest::new(self.worker_id.as_str(), self.batch_size, self.lease).in_lane(lane);
        let records = self.store.lease_pending(&request)?;

        let mut report = DispatchReport {
            leased: records.len(),
            ..Default::default()
        };
        for record in &records {
            report.record(self.process_record(record));
        }

        if !report.is_idle() {
            debug!(
                worker_id = %self.worker_id,
                lane = lane.index,
                leased = report.leased,
                published = report.published,
                retried = report.retried,
                failed = report.failed,
                "dispatch cycle finished"
            );
        }
        Ok(report)
    }

    /// Run cycles until one leases nothing or `max_cycles` is reached.
    ///
    /// Records waiting out a backoff are not leasable, so this returns once
    /// everything currently due has been dispatched.
    pub fn drain(&self, lane: Lane, max_cycles: usize) -> Result<DispatchReport, StoreError> {
        let mut total = DispatchReport::default();
        for _ in 0..max_cycles {
            let report = self.run_cycle(lane)?;
            if report.is_idle() {
                break;
            }
            total.merge(report);
        }
        Ok(total)
    }

    /// Publish one leased record and record the outcome in the store.
    ///
    /// The outcome is written under the lease `record` was handed out with.
    /// If another worker has taken the record over since, nothing is written
    /// and the outcome is [`RecordOutcome::Unconfirmed`].
    pub fn process_record(&self, record: &OutboxRecord) -> RecordOutcome {
        let Some(lease) = LeaseToken::of(record) else {
            warn!(record_id = %record.id, status = ?record.status, "record is not leased; skipping");
            return RecordOutcome::Unconfirmed;
        };
        let envelope = Envelope::from(record);

        match self.publisher.publish(&envelope) {
            Ok(ack) => match self.store.mark_published(record.id, &lease) {
                Ok(()) => {
                    debug!(
                        record_id = %record.id,
                        aggregate_id = %record.aggregate_id,
                        channel = %ack.channel,
                        sequence = ack.sequence,
                        attempts = record.attempts,
                        "outbox record published"
                    );
                    RecordOutcome::Published
                }
                Err(err) => {
                    unconfirmed(record, err, "published but not marked; will republish after lease expiry")
                }
            },
            Err(DeliveryError::Permanent(reason)) => {
                self.fail(record, &lease, FailureReason::Permanent(reason))
            }
            Err(DeliveryError::Transient(error)) => {
                let used = record.budget_used();
                if used >= self.max_attempts {
                    return self.fail(
                        record,
                        &lease,
                        FailureReason::BudgetExhausted {
                            attempts: record.attempts,
                            last_error: error,
                        },
                    );
                }

                let delay = self.backoff.delay(used);
                match self.store.schedule_retry(record.id, &lease, &error, delay) {
                    Ok(()) => {
                        info!(
                            record_id = %record.id,
                            aggregate_id = %record.aggregate_id,
                            attempts = record.attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %error,
                            "publish failed, retry scheduled"
                        );
                        RecordOutcome::Retried
                    }
                    Err(err) => unconfirmed(record, err, "could not schedule retry"),
                }
            }
        }
    }

    fn fail(&self, record: &OutboxRecord, lease: &LeaseToken, reason: FailureReason) -> RecordOutcome {
        if let Err(err) = self.store.mark_failed(record.id, lease, &reason.message()) {
            return unconfirmed(record, err, "could not mark record failed");
        }
        self.alerts
            .alert(&Alert::for_record(record, reason, self.clock.now()));
        RecordOutcome::Failed
    }
}

fn unconfirmed(record: &OutboxRecord, err: StoreError, message: &str) -> RecordOutcome {
    match err {
        StoreError::LeaseLost(_) => warn!(
            record_id = %record.id,
            attempts = record.attempts,
            "lease lost to another worker; outcome not recorded"
        ),
        err => warn!(record_id = %record.id, error = %err, "{}", message),
    }
    RecordOutcome::Unconfirmed
}
