use std::collections::BTreeMap;

use serde::de::DeserializeOwned;

use crate::outbox::{Destination, OutboxRecord};

/// A message as it travels over a transport.
///
/// `message_id` is the outbox record id, stable across redeliveries, and is
/// the key consumers deduplicate on.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    pub message_id: String,
    pub aggregate_id: String,
    /// Logical event name (e.g. "order-created")
    pub event_type: String,
    pub destination: Destination,
    /// Queue or topic name
    pub channel: String,
    /// Serialized payload (JSON or bitcode)
    pub payload: Vec<u8>,
    /// Headers such as correlation ids
    pub metadata: BTreeMap<String, String>,
}

impl Envelope {
    pub fn new(
        message_id: impl Into<String>,
        event_type: impl Into<String>,
        destination: Destination,
        channel: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Envelope {
            message_id: message_id.into(),
            aggregate_id: String::new(),
            event_type: event_type.into(),
            destination,
            channel: channel.into(),
            payload,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_aggregate_id(mut self, aggregate_id: impl Into<String>) -> Self {
        self.aggregate_id = aggregate_id.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Get the payload as a string (if valid UTF-8).
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    /// Decode a JSON payload.
    pub fn decode_json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }

    /// Decode a bitcode payload.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, bitcode::Error> {
        bitcode::deserialize(&self.payload)
    }
}

impl From<&OutboxRecord> for Envelope {
    fn from(record: &OutboxRecord) -> Self {
        Envelope {
            message_id: record.id.to_string(),
            aggregate_id: record.aggregate_id.clone(),
            event_type: record.event_type.clone(),
            destination: record.destination,
            channel: record.channel.clone(),
            payload: record.payload.clone(),
            metadata: record.metadata.clone(),
        }
    }
}
