use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Identifier of an outbox record. Doubles as the message id seen by consumers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Ulid);

impl RecordId {
    pub fn from_ulid(ulid: Ulid) -> Self {
        RecordId(ulid)
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(RecordId)
    }
}

/// Which transport a record is delivered through.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    /// Point-to-point work queue (competing consumers).
    Queue,
    /// Append-only event stream (fan-out to consumer groups).
    EventStream,
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Queue => write!(f, "queue"),
            Destination::EventStream => write!(f, "event_stream"),
        }
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    InFlight,
    Published,
    Failed,
}

impl OutboxStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OutboxStatus::Published | OutboxStatus::Failed)
    }
}

/// Durable notification written in the same atomic unit as the mutation that triggers it.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct OutboxRecord {
    pub id: RecordId,
    pub aggregate_id: String,
    pub event_type: String,
    pub destination: Destination,
    /// Queue or topic name the record is delivered to.
    pub channel: String,
    #[serde(with = "payload_serde")]
    pub payload: Vec<u8>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    pub status: OutboxStatus,
    pub attempts: u32,
    /// Attempts already spent when an operator last requeued the record.
    #[serde(default)]
    pub budget_floor: u32,
    pub created_at: SystemTime,
    pub last_attempt_at: Option<SystemTime>,
    /// Earliest time the record may be leased again (retry backoff).
    pub available_at: SystemTime,
    pub leased_by: Option<String>,
    pub leased_until: Option<SystemTime>,
    pub published_at: Option<SystemTime>,
    pub failed_at: Option<SystemTime>,
    pub last_error: Option<String>,
}

mod payload_serde {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(payload: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(payload).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

impl OutboxRecord {
    /// Create a fresh pending record.
    pub fn pending(
        id: RecordId,
        aggregate_id: impl Into<String>,
        event_type: impl Into<String>,
        destination: Destination,
        channel: impl Into<String>,
        payload: Vec<u8>,
        created_at: SystemTime,
    ) -> Self {
        OutboxRecord {
            id,
            aggregate_id: aggregate_id.into(),
            event_type: event_type.into(),
            destination,
            channel: channel.into(),
            payload,
            metadata: BTreeMap::new(),
            status: OutboxStatus::Pending,
            attempts: 0,
            budget_floor: 0,
            created_at,
            last_attempt_at: None,
            available_at: created_at,
            leased_by: None,
            leased_until: None,
            published_at: None,
            failed_at: None,
            last_error: None,
        }
    }

    /// Attempts counted against the current retry budget.
    pub fn budget_used(&self) -> u32 {
        self.attempts.saturating_sub(self.budget_floor)
    }

    pub fn is_pending(&self) -> bool {
        self.status == OutboxStatus::Pending
    }

    pub fn is_in_flight(&self) -> bool {
        self.status == OutboxStatus::InFlight
    }

    pub fn is_published(&self) -> bool {
        self.status == OutboxStatus::Published
    }

    pub fn is_failed(&self) -> bool {
        self.status == OutboxStatus::Failed
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether a lease call at `now` may pick this record up.
    pub fn is_leasable_at(&self, now: SystemTime) -> bool {
        match self.status {
            OutboxStatus::Pending => self.available_at <= now,
            OutboxStatus::InFlight => self.leased_until.map(|until| until <= now).unwrap_or(true),
            OutboxStatus::Published | OutboxStatus::Failed => false,
        }
    }

    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(|s| s.as_str())
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.meta("correlation_id")
    }

    pub(crate) fn claim(&mut self, worker_id: &str, now: SystemTime, until: SystemTime) {
        self.status = OutboxStatus::InFlight;
        self.attempts = self.attempts.saturating_add(1);
        self.last_attempt_at = Some(now);
        self.leased_by = Some(worker_id.to_string());
        self.leased_until = Some(until);
    }

    pub(crate) fn complete(&mut self, now: SystemTime) {
        self.status = OutboxStatus::Published;
        self.published_at = Some(now);
        self.leased_by = None;
        self.leased_until = None;
        self.last_error = None;
    }

    pub(crate) fn release(&mut self, error: &str, available_at: SystemTime) {
        self.status = OutboxStatus::Pending;
        self.available_at = available_at;
        self.leased_by = None;
        self.leased_until = None;
        self.last_error = if error.is_empty() { None } else { Some(error.to_string()) };
    }

    pub(crate) fn fail(&mut self, reason: &str, now: SystemTime) {
        self.status = OutboxStatus::Failed;
        self.failed_at = Some(now);
        self.leased_by = None;
        self.leased_until = None;
        self.last_error = if reason.is_empty() { None } else { Some(reason.to_string()) };
    }

    pub(crate) fn requeue(&mut self, now: SystemTime) {
        self.status = OutboxStatus::Pending;
        self.budget_floor = self.attempts;
        self.available_at = now;
        self.failed_at = None;
    }
}
