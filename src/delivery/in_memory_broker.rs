//! In-memory broker for testing and single-process scenarios.
//!
//! Models both transports the dispatcher publishes to:
//! - named queues with competing consumers and redelivery on reject
//! - topics as append-only logs read by consumer groups with their own offsets
//!
//! A fault script lets tests make the next publishes fail.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use super::envelope::Envelope;
use super::error::DeliveryError;
use super::transport::{Ack, Disposition, Source, Transport};
use crate::outbox::Destination;

/// Handle to one open broker connection.
#[derive(Debug)]
pub struct BrokerConnection {
    id: u64,
}

impl BrokerConnection {
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, VecDeque<Envelope>>,
    topics: HashMap<String, Vec<Envelope>>,
    offsets: HashMap<(String, String), usize>,
    sequence: u64,
    faults: VecDeque<DeliveryError>,
    unreachable: bool,
    next_connection: u64,
    open: HashSet<u64>,
    acked: Vec<String>,
    rejected: Vec<String>,
}

impl BrokerState {
    fn check_connection(&self, conn: &BrokerConnection) -> Result<(), DeliveryError> {
        if self.unreachable {
            return Err(DeliveryError::transient("broker unreachable"));
        }
        if !self.open.contains(&conn.id) {
            return Err(DeliveryError::transient("connection closed by broker"));
        }
        Ok(())
    }
}

/// Thread-safe in-memory broker. Cloning creates another handle to the same broker.
///
/// ## Example
///
/// ```
/// use outbox_relay::delivery::{DeliveryClient, Envelope, InMemoryBroker, Publisher};
/// use outbox_relay::outbox::Destination;
///
/// let broker = InMemoryBroker::new();
/// let client = DeliveryClient::new(broker.clone());
///
/// let envelope = Envelope::new("m-1", "order-created", Destination::Queue, "email_queue", b"{}".to_vec());
/// client.publish(&envelope).unwrap();
///
/// assert_eq!(broker.queue_len("email_queue"), 1);
/// ```
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make the next publish fail with `err`.
    pub fn fail_next(&self, err: DeliveryError) {
        self.state().faults.push_back(err);
    }

    /// Make the next `count` publishes fail with `err`.
    pub fn fail_next_n(&self, count: usize, err: DeliveryError) {
        let mut state = self.state();
        for _ in 0..count {
            state.faults.push_back(err.clone());
        }
    }

    pub fn pending_faults(&self) -> usize {
        self.state().faults.len()
    }

    /// While unreachable, connects and calls on open connections fail transiently.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state().unreachable = unreachable;
    }

    /// Drop every open connection, as a broker restart would.
    pub fn disconnect_all(&self) {
        self.state().open.clear();
    }

    pub fn open_connections(&self) -> usize {
        self.state().open.len()
    }

    /// Put an envelope straight onto its queue or topic, bypassing faults.
    ///
    /// Used to simulate broker-side redelivery of an already delivered message.
    pub fn inject(&self, envelope: Envelope) {
        let mut state = self.state();
        Self::append(&mut state, envelope);
    }

    /// Messages waiting on a queue.
    pub fn queue_len(&self, name: &str) -> usize {
        self.state().queues.get(name).map_or(0, VecDeque::len)
    }

    pub fn queue_messages(&self, name: &str) -> Vec<Envelope> {
        self.state()
            .queues
            .get(name)
            .map(|queue| queue.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Full log of a topic, regardless of consumer offsets.
    pub fn topic_log(&self, topic: &str) -> Vec<Envelope> {
        self.state().topics.get(topic).cloned().unwrap_or_default()
    }

    /// Message ids acknowledged by consumers, in ack order.
    pub fn acknowledged(&self) -> Vec<String> {
        self.state().acked.clone()
    }

    /// Message ids rejected by consumers, in reject order.
    pub fn rejected(&self) -> Vec<String> {
        self.state().rejected.clone()
    }

    fn append(state: &mut BrokerState, envelope: Envelope) -> Ack {
        state.sequence += 1;
        let channel = envelope.channel.clone();
        match envelope.destination {
            Destination::Queue => {
                state
                    .queues
                    .entry(channel.clone())
                    .or_default()
                    .push_back(envelope);
                Ack {
                    channel,
                    sequence: state.sequence,
                }
            }
            Destination::EventStream => {
                let log = state.topics.entry(channel.clone()).or_default();
                log.push(envelope);
                Ack {
                    channel,
                    sequence: log.len() as u64 - 1,
                }
            }
        }
    }

    fn consume_queue(
        &self,
        conn: &BrokerConnection,
        name: &str,
        handler: &mut dyn FnMut(&Envelope) -> Disposition,
    ) -> Result<usize, DeliveryError> {
        // Only deliveries present at the start; rejects go to the back for a later call.
        let available = {
            let state = self.state();
            state.check_connection(conn)?;
            state.queues.get(name).map_or(0, VecDeque::len)
        };

        let mut delivered = 0;
        for _ in 0..available {
            let envelope = {
                let mut state = self.state();
                state.check_connection(conn)?;
                match state.queues.get_mut(name).and_then(VecDeque::pop_front) {
                    Some(envelope) => envelope,
                    None => break,
                }
            };
            delivered += 1;

            let disposition = handler(&envelope);
            let mut state = self.state();
            match disposition {
                Disposition::Ack => state.acked.push(envelope.message_id),
                Disposition::Reject => {
                    debug!(message_id = %envelope.message_id, queue = name, "delivery rejected, requeueing");
                    state.rejected.push(envelope.message_id.clone());
                    state
                        .queues
                        .entry(name.to_string())
                        .or_default()
                        .push_back(envelope);
                }
            }
        }
        Ok(delivered)
    }

    fn consume_stream(
        &self,
        conn: &BrokerConnection,
        topic: &str,
        group: &str,
        handler: &mut dyn FnMut(&Envelope) -> Disposition,
    ) -> Result<usize, DeliveryError> {
        let key = (topic.to_string(), group.to_string());
        let (start, batch) = {
            let state = self.state();
            state.check_connection(conn)?;
            let start = state.offsets.get(&key).copied().unwrap_or(0);
            let batch: Vec<Envelope> = state
                .topics
                .get(topic)
                .map(|log| log.iter().skip(start).cloned().collect())
                .unwrap_or_default();
            (start, batch)
        };

        let mut delivered = 0;
        for envelope in batch {
            delivered += 1;
            let disposition = handler(&envelope);
            let mut state = self.state();
            match disposition {
                Disposition::Ack => {
                    state.acked.push(envelope.message_id);
                    state.offsets.insert(key.clone(), start + delivered);
                }
                Disposition::Reject => {
                    // The group resumes from this offset on its next read.
                    debug!(message_id = %envelope.message_id, topic, group, "delivery rejected, offset held");
                    state.rejected.push(envelope.message_id);
                    break;
                }
            }
        }
        Ok(delivered)
    }
}

impl Transport for InMemoryBroker {
    type Connection = BrokerConnection;

    fn connect(&self) -> Result<BrokerConnection, DeliveryError> {
        let mut state = self.state();
        if state.unreachable {
            return Err(DeliveryError::transient("broker unreachable"));
        }
        state.next_connection += 1;
        let id = state.next_connection;
        state.open.insert(id);
        Ok(BrokerConnection { id })
    }

    fn publish(&self, conn: &BrokerConnection, envelope: &Envelope) -> Result<Ack, DeliveryError> {
        let mut state = self.state();
        state.check_connection(conn)?;
        if let Some(fault) = state.faults.pop_front() {
            return Err(fault);
        }
        Ok(Self::append(&mut state, envelope.clone()))
    }

    fn consume(
        &self,
        conn: &BrokerConnection,
        source: &Source,
        handler: &mut dyn FnMut(&Envelope) -> Disposition,
    ) -> Result<usize, DeliveryError> {
        match source {
            Source::Queue { name } => self.consume_queue(conn, name, handler),
            Source::Stream { topic, group } => self.consume_stream(conn, topic, group, handler),
        }
    }

    fn close(&self, conn: BrokerConnection) {
        self.state().open.remove(&conn.id);
    }
}
