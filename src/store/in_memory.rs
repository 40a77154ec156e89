use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

use super::aggregate::{AggregateWrite, StoredAggregate};
use super::error::StoreError;
use super::lease::{LeaseRequest, LeaseToken};
use super::outbox_store::{OutboxStore, TransactionalStore};
use crate::clock::{Clock, SystemClock};
use crate::outbox::{OutboxRecord, OutboxStatus, RecordId};

/// Dispatch order of the outbox table.
type OutboxKey = (SystemTime, RecordId);

#[derive(Default)]
struct Tables {
    aggregates: HashMap<String, StoredAggregate>,
    outbox: BTreeMap<OutboxKey, OutboxRecord>,
    index: HashMap<RecordId, OutboxKey>,
    /// Keys of records not yet published or failed, in dispatch order.
    open: BTreeSet<OutboxKey>,
}

impl Tables {
    fn record_mut(&mut self, id: RecordId) -> Result<&mut OutboxRecord, StoreError> {
        let key = self.index.get(&id).ok_or(StoreError::NotFound(id))?;
        self.outbox.get_mut(key).ok_or(StoreError::NotFound(id))
    }

    /// The record if `lease` still holds it; `None` once this lease has
    /// already settled it.
    fn held_mut(
        &mut self,
        id: RecordId,
        lease: &LeaseToken,
        operation: &'static str,
    ) -> Result<Option<&mut OutboxRecord>, StoreError> {
        let record = self.record_mut(id)?;
        if lease.settled(record) {
            debug!(record_id = %id, status = ?record.status, operation, "ignored on terminal record");
            return Ok(None);
        }
        if !lease.holds(record) {
            warn!(
                record_id = %id,
                worker_id = %lease.worker_id,
                attempt = lease.attempt,
                leased_by = ?record.leased_by,
                operation,
                "lease no longer held"
            );
            return Err(StoreError::LeaseLost(id));
        }
        Ok(Some(record))
    }

    /// Drop a record that became terminal from the lease scan.
    fn settle(&mut self, id: RecordId) {
        if let Some(key) = self.index.get(&id) {
            self.open.remove(key);
        }
    }

    fn reopen(&mut self, id: RecordId) {
        if let Some(key) = self.index.get(&id) {
            self.open.insert(*key);
        }
    }
}

/// In-process store holding the aggregate table and the outbox table behind
/// one lock, so a commit is all-or-nothing.
///
/// Cloning creates another handle to the same storage.
#[derive(Clone)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        InMemoryStore {
            tables: Arc::new(RwLock::new(Tables::default())),
            clock,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Every outbox record in dispatch order.
    pub fn records(&self) -> Result<Vec<OutboxRecord>, StoreError> {
        Ok(self.read("outbox read")?.outbox.values().cloned().collect())
    }

    /// Records belonging to one aggregate, in dispatch order.
    pub fn records_for(&self, aggregate_id: &str) -> Result<Vec<OutboxRecord>, StoreError> {
        Ok(self
            .read("outbox read")?
            .outbox
            .values()
            .filter(|record| record.aggregate_id == aggregate_id)
            .cloned()
            .collect())
    }

    pub fn outbox_len(&self) -> Result<usize, StoreError> {
        Ok(self.read("outbox read")?.outbox.len())
    }

    /// Records still waiting to be published or failed.
    pub fn open_len(&self) -> Result<usize, StoreError> {
        Ok(self.read("outbox read")?.open.len())
    }

    fn read(&self, operation: &'static str) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables
            .read()
            .map_err(|_| StoreError::LockPoisoned(operation))
    }

    fn write(&self, operation: &'static str) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables
            .write()
            .map_err(|_| StoreError::LockPoisoned(operation))
    }
}

impl OutboxStore for InMemoryStore {
    fn lease_pending(&self, request: &LeaseRequest) -> Result<Vec<OutboxRecord>, StoreError> {
        if request.limit == 0 {
            return Ok(Vec::new());
        }

        let mut tables = self.write("outbox lease")?;
        let now = self.clock.now();
        let until = now.checked_add(request.lease).unwrap_or(now);

        // Aggregates whose earliest unfinished record has already been visited.
        let mut heads: HashSet<String> = HashSet::new();
        let mut leased = Vec::new();

        let Tables { outbox, open, .. } = &mut *tables;
        for key in open.iter() {
            if leased.len() >= request.limit {
                break;
            }
            let Some(record) = outbox.get_mut(key) else {
                continue;
            };
            if !heads.insert(record.aggregate_id.clone()) {
                continue;
            }
            if !request.lane.owns(&record.aggregate_id) || !record.is_leasable_at(now) {
                continue;
            }

            record.claim(&request.worker_id, now, until);
            leased.push(record.clone());
        }

        if !leased.is_empty() {
            debug!(
                worker_id = %request.worker_id,
                lane = request.lane.index,
                count = leased.len(),
                "leased outbox records"
            );
        }

        Ok(leased)
    }

    fn mark_published(&self, id: RecordId, lease: &LeaseToken) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut tables = self.write("outbox mark published")?;
        let Some(record) = tables.held_mut(id, lease, "mark published")? else {
            return Ok(());
        };
        record.complete(now);
        tables.settle(id);
        Ok(())
    }

    fn mark_failed(&self, id: RecordId, lease: &LeaseToken, reason: &str) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut tables = self.write("outbox mark failed")?;
        let Some(record) = tables.held_mut(id, lease, "mark failed")? else {
            return Ok(());
        };
        record.fail(reason, now);
        tables.settle(id);
        Ok(())
    }

    fn schedule_retry(
        &self,
        id: RecordId,
        lease: &LeaseToken,
        error: &str,
        delay: Duration,
    ) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut tables = self.write("outbox schedule retry")?;
        let Some(record) = tables.held_mut(id, lease, "schedule retry")? else {
            return Ok(());
        };
        record.release(error, now.checked_add(delay).unwrap_or(now));
        Ok(())
    }

    fn requeue_failed(&self, id: RecordId) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut tables = self.write("outbox requeue")?;
        let record = tables.record_mut(id)?;
        if !record.is_failed() {
            return Ok(false);
        }
        record.requeue(now);
        tables.reopen(id);
        Ok(true)
    }

    fn get(&self, id: RecordId) -> Result<Option<OutboxRecord>, StoreError> {
        let tables = self.read("outbox read")?;
        Ok(tables
            .index
            .get(&id)
            .and_then(|key| tables.outbox.get(key))
            .cloned())
    }

    fn records_by_status(&self, status: OutboxStatus) -> Result<Vec<OutboxRecord>, StoreError> {
        Ok(self
            .read("outbox read")?
            .outbox
            .values()
            .filter(|record| record.status == status)
            .cloned()
            .collect())
    }
}

impl TransactionalStore for InMemoryStore {
    fn load_aggregate(&self, aggregate_id: &str) -> Result<Option<StoredAggregate>, StoreError> {
        Ok(self.read("aggregate read")?.aggregates.get(aggregate_id).cloned())
    }

    fn commit(
        &self,
        write: AggregateWrite,
        records: Vec<OutboxRecord>,
    ) -> Result<StoredAggregate, StoreError> {
        let now = self.clock.now();
        let mut tables = self.write("commit")?;

        let actual = tables
            .aggregates
            .get(&write.aggregate_id)
            .map(|aggregate| aggregate.version)
            .unwrap_or(0);
        if actual != write.expected_version {
            return Err(StoreError::Conflict {
                aggregate_id: write.aggregate_id,
                expected: write.expected_version,
                actual,
            });
        }

        let mut seen = HashSet::with_capacity(records.len());
        for record in &records {
            if tables.index.contains_key(&record.id) || !seen.insert(record.id) {
                return Err(StoreError::DuplicateRecord(record.id));
            }
        }

        let stored = StoredAggregate {
            id: write.aggregate_id.clone(),
            version: actual + 1,
            state: write.state,
            updated_at: now,
        };
        tables.aggregates.insert(write.aggregate_id, stored.clone());

        for record in records {
            let key = (record.created_at, record.id);
            tables.index.insert(record.id, key);
            tables.open.insert(key);
            tables.outbox.insert(key, record);
        }

        Ok(stored)
    }
}
