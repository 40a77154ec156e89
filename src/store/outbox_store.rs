use std::sync::Arc;
use std::time::Duration;

use super::aggregate::{AggregateWrite, StoredAggregate};
use super::error::StoreError;
use super::lease::{LeaseRequest, LeaseToken};
use crate::outbox::{OutboxRecord, OutboxStatus, RecordId};

/// Lease and mark operations over the `outbox_records` table.
///
/// The dispatcher only ever leases and marks; records are never deleted.
pub trait OutboxStore: Send + Sync {
    /// Lease up to `request.limit` records in `(created_at, id)` order.
    ///
    /// A record is eligible when it is pending and past its backoff gate, or
    /// in flight with an expired lease, and it is the earliest unfinished
    /// record of its aggregate. Leased records are invisible to other lease
    /// calls until `request.lease` elapses. Each lease counts one attempt.
    fn lease_pending(&self, request: &LeaseRequest) -> Result<Vec<OutboxRecord>, StoreError>;

    /// Mark a record as published. No-op if `lease` already settled it.
    ///
    /// Fails with [`StoreError::LeaseLost`] when `lease` no longer holds the
    /// record, i.e. it expired and another lease call took it over.
    fn mark_published(&self, id: RecordId, lease: &LeaseToken) -> Result<(), StoreError>;

    /// Mark a record as permanently failed. No-op if `lease` already settled
    /// it; [`StoreError::LeaseLost`] when `lease` no longer holds it.
    fn mark_failed(&self, id: RecordId, lease: &LeaseToken, reason: &str) -> Result<(), StoreError>;

    /// Return an in-flight record to pending, leasable again after `delay`.
    /// No-op if `lease` already settled it; [`StoreError::LeaseLost`] when
    /// `lease` no longer holds it.
    fn schedule_retry(
        &self,
        id: RecordId,
        lease: &LeaseToken,
        error: &str,
        delay: Duration,
    ) -> Result<(), StoreError>;

    /// Operator action: move a failed record back to pending with a fresh retry budget.
    /// Returns `false` when the record was not failed.
    fn requeue_failed(&self, id: RecordId) -> Result<bool, StoreError>;

    fn get(&self, id: RecordId) -> Result<Option<OutboxRecord>, StoreError>;

    /// Records with the given status, in dispatch order.
    fn records_by_status(&self, status: OutboxStatus) -> Result<Vec<OutboxRecord>, StoreError>;

    fn pending_records(&self) -> Result<Vec<OutboxRecord>, StoreError> {
        self.records_by_status(OutboxStatus::Pending)
    }

    fn failed_records(&self) -> Result<Vec<OutboxRecord>, StoreError> {
        self.records_by_status(OutboxStatus::Failed)
    }
}

/// Storage that can commit an aggregate write and its outbox records atomically.
pub trait TransactionalStore: OutboxStore {
    fn load_aggregate(&self, aggregate_id: &str) -> Result<Option<StoredAggregate>, StoreError>;

    /// Apply `write` and insert every record in one atomic unit.
    ///
    /// Fails with [`StoreError::Conflict`] when the stored version no longer
    /// matches `write.expected_version`; nothing is written in that case.
    fn commit(
        &self,
        write: AggregateWrite,
        records: Vec<OutboxRecord>,
    ) -> Result<StoredAggregate, StoreError>;
}

impl<S: OutboxStore + ?Sized> OutboxStore for Arc<S> {
    fn lease_pending(&self, request: &LeaseRequest) -> Result<Vec<OutboxRecord>, StoreError> {
        (**self).lease_pending(request)
    }

    fn mark_published(&self, id: RecordId, lease: &LeaseToken) -> Result<(), StoreError> {
        (**self).mark_published(id, lease)
    }

    fn mark_failed(&self, id: RecordId, lease: &LeaseToken, reason: &str) -> Result<(), StoreError> {
        (**self).mark_failed(id, lease, reason)
    }

    fn schedule_retry(
        &self,
        id: RecordId,
        lease: &LeaseToken,
        error: &str,
        delay: Duration,
    ) -> Result<(), StoreError> {
        (**self).schedule_retry(id, lease, error, delay)
    }

    fn requeue_failed(&self, id: RecordId) -> Result<bool, StoreError> {
        (**self).requeue_failed(id)
    }

    fn get(&self, id: RecordId) -> Result<Option<OutboxRecord>, StoreError> {
        (**self).get(id)
    }

    fn records_by_status(&self, status: OutboxStatus) -> Result<Vec<OutboxRecord>, StoreError> {
        (**self).records_by_status(status)
    }
}

impl<S: TransactionalStore + ?Sized> TransactionalStore for Arc<S> {
    fn load_aggregate(&self, aggregate_id: &str) -> Result<Option<StoredAggregate>, StoreError> {
        (**self).load_aggregate(aggregate_id)
    }

    fn commit(
        &self,
        write: AggregateWrite,
        records: Vec<OutboxRecord>,
    ) -> Result<StoredAggregate, StoreError> {
        (**self).commit(write, records)
    }
}
