use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use super::record::Destination;

/// Default queue used by the order service for transactional email.
pub const EMAIL_QUEUE: &str = "email_queue";

/// Default topic carrying domain events.
pub const EVENTS_TOPIC: &str = "events";

/// Error raised by a payload builder.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("payload error: {message}")]
pub struct PayloadError {
    pub message: String,
}

impl PayloadError {
    pub fn new(message: impl Into<String>) -> Self {
        PayloadError {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for PayloadError {
    fn from(err: serde_json::Error) -> Self {
        PayloadError::new(err.to_string())
    }
}

impl From<bitcode::Error> for PayloadError {
    fn from(err: bitcode::Error) -> Self {
        PayloadError::new(err.to_string())
    }
}

#[derive(Serialize)]
struct TypedEvent<'a, T> {
    #[serde(rename = "type")]
    event_type: &'a str,
    data: &'a T,
}

type DeferredBuilder = Box<dyn FnOnce() -> Result<Vec<u8>, PayloadError> + Send>;

enum PayloadBuilder {
    Ready(Result<Vec<u8>, PayloadError>),
    Deferred(DeferredBuilder),
}

/// A notification to be written to the outbox alongside a mutation.
///
/// Payloads are built before the storage transaction opens; a failing
/// builder aborts the whole submission.
///
/// ```ignore
/// let email = NotificationSpec::json(Destination::Queue, EMAIL_QUEUE, "order-created", &order);
/// let event = NotificationSpec::domain_event(EVENTS_TOPIC, "order-created", &order);
/// coordinator.submit(PlaceOrder::new(order), vec![email, event])?;
/// ```
pub struct NotificationSpec {
    pub destination: Destination,
    pub channel: String,
    pub event_type: String,
    pub metadata: BTreeMap<String, String>,
    payload: PayloadBuilder,
}

impl NotificationSpec {
    /// Raw bytes payload.
    pub fn bytes(
        destination: Destination,
        channel: impl Into<String>,
        event_type: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self::with_builder(
            destination,
            channel,
            event_type,
            PayloadBuilder::Ready(Ok(payload)),
        )
    }

    /// JSON payload via serde_json.
    pub fn json<T: Serialize>(
        destination: Destination,
        channel: impl Into<String>,
        event_type: impl Into<String>,
        payload: &T,
    ) -> Self {
        let bytes = serde_json::to_vec(payload).map_err(PayloadError::from);
        Self::with_builder(destination, channel, event_type, PayloadBuilder::Ready(bytes))
    }

    /// Binary payload via bitcode.
    pub fn encode<T: Serialize>(
        destination: Destination,
        channel: impl Into<String>,
        event_type: impl Into<String>,
        payload: &T,
    ) -> Self {
        let bytes = bitcode::serialize(payload).map_err(PayloadError::from);
        Self::with_builder(destination, channel, event_type, PayloadBuilder::Ready(bytes))
    }

    /// Event-stream record whose value is `{"type": .., "data": ..}`.
    pub fn domain_event<T: Serialize>(
        topic: impl Into<String>,
        event_type: impl Into<String>,
        data: &T,
    ) -> Self {
        let event_type = event_type.into();
        let bytes = serde_json::to_vec(&TypedEvent {
            event_type: &event_type,
            data,
        })
        .map_err(PayloadError::from);
        Self::with_builder(
            Destination::EventStream,
            topic,
            event_type,
            PayloadBuilder::Ready(bytes),
        )
    }

    /// Payload produced lazily by `build`, invoked once during submission.
    pub fn build<F>(
        destination: Destination,
        channel: impl Into<String>,
        event_type: impl Into<String>,
        build: F,
    ) -> Self
    where
        F: FnOnce() -> Result<Vec<u8>, PayloadError> + Send + 'static,
    {
        Self::with_builder(
            destination,
            channel,
            event_type,
            PayloadBuilder::Deferred(Box::new(build)),
        )
    }

    fn with_builder(
        destination: Destination,
        channel: impl Into<String>,
        event_type: impl Into<String>,
        payload: PayloadBuilder,
    ) -> Self {
        NotificationSpec {
            destination,
            channel: channel.into(),
            event_type: event_type.into(),
            metadata: BTreeMap::new(),
            payload,
        }
    }

    /// Attach a metadata entry propagated to the published envelope.
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_correlation_id(self, id: impl Into<String>) -> Self {
        self.with_meta("correlation_id", id)
    }

    /// Run the payload builder.
    pub fn build_payload(self) -> Result<BuiltNotification, PayloadError> {
        let payload = match self.payload {
            PayloadBuilder::Ready(result) => result?,
            PayloadBuilder::Deferred(build) => build()?,
        };
        Ok(BuiltNotification {
            destination: self.destination,
            channel: self.channel,
            event_type: self.event_type,
            metadata: self.metadata,
            payload,
        })
    }
}

impl fmt::Debug for NotificationSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationSpec")
            .field("destination", &self.destination)
            .field("channel", &self.channel)
            .field("event_type", &self.event_type)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// A notification whose payload has been materialized.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltNotification {
    pub destination: Destination,
    pub channel: String,
    pub event_type: String,
    pub metadata: BTreeMap<String, String>,
    pub payload: Vec<u8>,
}
