use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};
use ulid::Generator;

use super::error::SubmitError;
use super::mutation::{Mutation, MutationResult};
use crate::clock::{Clock, SystemClock};
use crate::outbox::{BuiltNotification, NotificationSpec, OutboxRecord, RecordId};
use crate::store::{AggregateWrite, TransactionalStore};

/// Wraps a business mutation and its outbox inserts in one atomic commit.
///
/// ## Example
///
/// ```ignore
/// let coordinator = TransactionCoordinator::new(store.clone());
/// let result = coordinator.submit(
///     &PlaceOrder::new("order-1", 3),
///     vec![
///         NotificationSpec::json(Destination::Queue, EMAIL_QUEUE, "order-created", &order),
///         NotificationSpec::domain_event(EVENTS_TOPIC, "order-created", &order),
///     ],
/// )?;
/// assert_eq!(result.record_ids.len(), 2);
/// ```
pub struct TransactionCoordinator<S> {
    store: S,
    clock: Arc<dyn Clock>,
    ids: Mutex<Generator>,
}

impl<S: TransactionalStore> TransactionCoordinator<S> {
    pub fn new(store: S) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: S, clock: Arc<dyn Clock>) -> Self {
        TransactionCoordinator {
            store,
            clock,
            ids: Mutex::new(Generator::new()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Apply `mutation` and create one pending record per notification,
    /// all or nothing.
    ///
    /// Payload builders run first; a builder failure, a rejected mutation or
    /// a failed commit leaves no trace in the store.
    pub fn submit<M: Mutation>(
        &self,
        mutation: &M,
        notifications: Vec<NotificationSpec>,
    ) -> Result<MutationResult<M::Output>, SubmitError> {
        let aggregate_id = mutation.aggregate_id().to_string();

        let built = notifications
            .into_iter()
            .map(NotificationSpec::build_payload)
            .collect::<Result<Vec<_>, _>>()?;

        let (mut state, expected_version) = match self.store.load_aggregate(&aggregate_id)? {
            Some(stored) => (serde_json::from_value::<M::State>(stored.state)?, stored.version),
            None => (M::State::default(), 0),
        };

        let output = mutation.apply(&mut state)?;
        let state = serde_json::to_value(&state)?;

        let now = self.clock.now();
        let records = self.records_for(&aggregate_id, built, now)?;
        let record_ids: Vec<RecordId> = records.iter().map(|record| record.id).collect();

        let write = AggregateWrite::new(aggregate_id.clone(), expected_version, state);
        let stored = match self.store.commit(write, records) {
            Ok(stored) => stored,
            Err(err) => {
                let err = SubmitError::from(err);
                if err.is_retryable() {
                    warn!(aggregate_id = %aggregate_id, error = %err, "submission lost a version race");
                } else {
                    warn!(aggregate_id = %aggregate_id, error = %err, "submission commit failed");
                }
                return Err(err);
            }
        };

        info!(
            aggregate_id = %aggregate_id,
            version = stored.version,
            records = record_ids.len(),
            "mutation committed"
        );

        Ok(MutationResult {
            output,
            version: stored.version,
            record_ids,
        })
    }

    /// Like [`submit`](Self::submit), re-running the whole submission on a
    /// version conflict up to `max_attempts` times.
    ///
    /// `notifications` is called once per attempt because payload builders
    /// are consumed by a submission.
    pub fn submit_with_retry<M, F>(
        &self,
        mutation: &M,
        max_attempts: u32,
        mut notifications: F,
    ) -> Result<MutationResult<M::Output>, SubmitError>
    where
        M: Mutation,
        F: FnMut() -> Vec<NotificationSpec>,
    {
        let mut attempt = 1;
        loop {
            match self.submit(mutation, notifications()) {
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    debug!(
                        aggregate_id = mutation.aggregate_id(),
                        attempt,
                        "retrying submission after conflict"
                    );
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    fn records_for(
        &self,
        aggregate_id: &str,
        notifications: Vec<BuiltNotification>,
        now: std::time::SystemTime,
    ) -> Result<Vec<OutboxRecord>, SubmitError> {
        if notifications.is_empty() {
            return Ok(Vec::new());
        }

        let mut ids = self
            .ids
            .lock()
            .map_err(|_| SubmitError::IdGeneration("id generator lock poisoned".into()))?;

        notifications
            .into_iter()
            .map(|notification| {
                let id = ids
                    .generate_from_datetime(now)
                    .map_err(|err| SubmitError::IdGeneration(err.to_string()))?;
                let mut record = OutboxRecord::pending(
                    RecordId::from_ulid(id),
                    aggregate_id,
                    notification.event_type,
                    notification.destination,
                    notification.channel,
                    notification.payload,
                    now,
                );
                record.metadata = notification.metadata;
                Ok(record)
            })
            .collect()
    }
}
