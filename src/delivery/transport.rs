//! Transport traits over the broker and event-stream wire clients.

use std::sync::Arc;

use super::envelope::Envelope;
use super::error::DeliveryError;

/// Broker confirmation of a publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub channel: String,
    /// Position assigned by the broker (queue sequence or topic offset).
    pub sequence: u64,
}

/// Where a consumer reads from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Source {
    /// Named work queue; each message goes to one consumer.
    Queue { name: String },
    /// Topic read by a consumer group with its own offset.
    Stream { topic: String, group: String },
}

impl Source {
    pub fn queue(name: impl Into<String>) -> Self {
        Source::Queue { name: name.into() }
    }

    pub fn stream(topic: impl Into<String>, group: impl Into<String>) -> Self {
        Source::Stream {
            topic: topic.into(),
            group: group.into(),
        }
    }

    pub fn channel(&self) -> &str {
        match self {
            Source::Queue { name } => name,
            Source::Stream { topic, .. } => topic,
        }
    }
}

/// What a consumer decided about one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Handled (or deliberately skipped); remove from the source.
    Ack,
    /// Not handled; the transport delivers it again later.
    Reject,
}

/// Wire client for a broker or event stream.
///
/// Implementations might include:
/// - `InMemoryBroker` - For testing and single-process scenarios
/// - `LogTransport` - For development, logs every publish
/// - AMQP / Kafka clients living outside this crate
pub trait Transport: Send + Sync {
    type Connection: Send + Sync;

    fn connect(&self) -> Result<Self::Connection, DeliveryError>;

    /// Send one envelope to `envelope.channel` on `envelope.destination`.
    fn publish(&self, conn: &Self::Connection, envelope: &Envelope) -> Result<Ack, DeliveryError>;

    /// Hand every delivery currently available on `source` to `handler`.
    ///
    /// Rejected deliveries stay on the source and are delivered again by a
    /// later call. Returns the number of deliveries handed out.
    fn consume(
        &self,
        conn: &Self::Connection,
        source: &Source,
        handler: &mut dyn FnMut(&Envelope) -> Disposition,
    ) -> Result<usize, DeliveryError>;

    fn close(&self, conn: Self::Connection);
}

/// Anything the dispatcher can publish through.
pub trait Publisher: Send + Sync {
    fn publish(&self, envelope: &Envelope) -> Result<Ack, DeliveryError>;
}

impl<P: Publisher + ?Sized> Publisher for Arc<P> {
    fn publish(&self, envelope: &Envelope) -> Result<Ack, DeliveryError> {
        (**self).publish(envelope)
    }
}
