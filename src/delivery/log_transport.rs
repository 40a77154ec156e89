use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::info;

use super::envelope::Envelope;
use super::error::DeliveryError;
use super::transport::{Ack, Disposition, Source, Transport};

/// A transport that logs every publish, for development and demos.
///
/// With a buffer attached, each publish is also recorded as a line of the
/// form `[destination] channel event_type payload`. Nothing can be consumed.
#[derive(Default)]
pub struct LogTransport {
    buffer: Option<Arc<Mutex<Vec<String>>>>,
    sequence: AtomicU64,
}

impl LogTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_buffer(buffer: Arc<Mutex<Vec<String>>>) -> Self {
        LogTransport {
            buffer: Some(buffer),
            sequence: AtomicU64::new(0),
        }
    }
}

impl Transport for LogTransport {
    type Connection = ();

    fn connect(&self) -> Result<(), DeliveryError> {
        Ok(())
    }

    fn publish(&self, _conn: &(), envelope: &Envelope) -> Result<Ack, DeliveryError> {
        let payload = String::from_utf8_lossy(&envelope.payload);
        info!(
            message_id = %envelope.message_id,
            destination = %envelope.destination,
            channel = %envelope.channel,
            event_type = %envelope.event_type,
            payload = %payload,
            "published"
        );
        if let Some(buffer) = &self.buffer {
            let mut buffer = buffer
                .lock()
                .map_err(|_| DeliveryError::transient("log buffer poisoned"))?;
            buffer.push(format!(
                "[{}] {} {} {}",
                envelope.destination, envelope.channel, envelope.event_type, payload
            ));
        }
        Ok(Ack {
            channel: envelope.channel.clone(),
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
        })
    }

    fn consume(
        &self,
        _conn: &(),
        _source: &Source,
        _handler: &mut dyn FnMut(&Envelope) -> Disposition,
    ) -> Result<usize, DeliveryError> {
        Ok(0)
    }

    fn close(&self, _conn: ()) {}
}
