use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::outbox::OutboxRecord;

/// A dispatcher partition. Aggregates are routed to lanes by a stable hash so
/// every dispatcher instance agrees on which lane owns an aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Lane {
    pub index: u32,
    pub count: u32,
}

impl Lane {
    /// The single global lane: every aggregate routes here.
    pub const GLOBAL: Lane = Lane { index: 0, count: 1 };

    /// Returns `None` when `index` is out of range or `count` is zero.
    pub fn new(index: u32, count: u32) -> Option<Self> {
        if count == 0 || index >= count {
            return None;
        }
        Some(Lane { index, count })
    }

    /// All lanes of a partitioning with `count` lanes.
    pub fn all(count: u32) -> impl Iterator<Item = Lane> {
        let count = count.max(1);
        (0..count).map(move |index| Lane { index, count })
    }

    /// Lane index owning `aggregate_id` when partitioned `count` ways.
    pub fn route(aggregate_id: &str, count: u32) -> u32 {
        if count <= 1 {
            return 0;
        }
        let digest = Sha256::digest(aggregate_id.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        (u64::from_be_bytes(prefix) % u64::from(count)) as u32
    }

    pub fn owns(&self, aggregate_id: &str) -> bool {
        Lane::route(aggregate_id, self.count) == self.index
    }
}

impl Default for Lane {
    fn default() -> Self {
        Lane::GLOBAL
    }
}

/// Parameters for [`OutboxStore::lease_pending`](super::OutboxStore::lease_pending).
#[derive(Debug, Clone)]
pub struct LeaseRequest {
    pub worker_id: String,
    pub limit: usize,
    pub lease: Duration,
    pub lane: Lane,
}

impl LeaseRequest {
    pub fn new(worker_id: impl Into<String>, limit: usize, lease: Duration) -> Self {
        LeaseRequest {
            worker_id: worker_id.into(),
            limit,
            lease,
            lane: Lane::GLOBAL,
        }
    }

    pub fn in_lane(mut self, lane: Lane) -> Self {
        self.lane = lane;
        self
    }
}

/// Proof of a lease taken by [`OutboxStore::lease_pending`](super::OutboxStore::lease_pending).
///
/// Each lease bumps `attempts`, so a worker whose lease expired and was
/// taken over no longer matches the record even if it reuses its worker id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseToken {
    pub worker_id: String,
    pub attempt: u32,
}

impl LeaseToken {
    pub fn new(worker_id: impl Into<String>, attempt: u32) -> Self {
        LeaseToken {
            worker_id: worker_id.into(),
            attempt,
        }
    }

    /// The lease a record was handed out with, if it is in flight.
    pub fn of(record: &OutboxRecord) -> Option<Self> {
        if !record.is_in_flight() {
            return None;
        }
        record
            .leased_by
            .as_ref()
            .map(|worker_id| LeaseToken::new(worker_id.as_str(), record.attempts))
    }

    /// Whether `record` is still held under this lease.
    pub fn holds(&self, record: &OutboxRecord) -> bool {
        record.is_in_flight()
            && record.attempts == self.attempt
            && record.leased_by.as_deref() == Some(self.worker_id.as_str())
    }

    /// Whether `record` was published or failed under this lease.
    ///
    /// Terminal records no longer carry `leased_by`; the attempt number alone
    /// tells this lease apart from a later one.
    pub fn settled(&self, record: &OutboxRecord) -> bool {
        record.is_terminal() && record.attempts == self.attempt
    }
}
