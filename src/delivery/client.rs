use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{debug, info, warn};

use super::envelope::Envelope;
use super::error::DeliveryError;
use super::transport::{Ack, Disposition, Publisher, Source, Transport};

/// An open transport connection, closed when the last holder lets go.
struct LiveConnection<T: Transport> {
    transport: Arc<T>,
    conn: Option<T::Connection>,
}

impl<T: Transport> LiveConnection<T> {
    fn call<R>(
        &self,
        f: impl FnOnce(&T, &T::Connection) -> Result<R, DeliveryError>,
    ) -> Result<R, DeliveryError> {
        match &self.conn {
            Some(conn) => f(&self.transport, conn),
            None => Err(DeliveryError::transient("connection already closed")),
        }
    }
}

impl<T: Transport> Drop for LiveConnection<T> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.transport.close(conn);
            debug!("delivery connection closed");
        }
    }
}

/// Process-wide delivery client owning a single transport connection.
///
/// The connection is opened lazily on first use, shared by every caller, and
/// replaced after a transient failure. A replaced connection is closed once
/// the last call still using it returns. `shutdown` retires the connection;
/// afterwards every call fails with a transient error so in-flight records
/// are retried by another process.
///
/// Share it across dispatcher lanes and consumers behind an `Arc`.
pub struct DeliveryClient<T: Transport> {
    transport: Arc<T>,
    connection: RwLock<Option<Arc<LiveConnection<T>>>>,
    shut_down: AtomicBool,
    connects: AtomicUsize,
}

impl<T: Transport> DeliveryClient<T> {
    pub fn new(transport: T) -> Self {
        DeliveryClient {
            transport: Arc::new(transport),
            connection: RwLock::new(None),
            shut_down: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Number of connections opened so far.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.connection
            .read()
            .map(|conn| conn.is_some())
            .unwrap_or(false)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Consume every available delivery on `source`.
    pub fn consume(
        &self,
        source: &Source,
        handler: &mut dyn FnMut(&Envelope) -> Disposition,
    ) -> Result<usize, DeliveryError> {
        let live = self.connection()?;
        let result = live.call(|transport, conn| transport.consume(conn, source, handler));
        self.after_call(&live, result)
    }

    /// Retire the shared connection. Idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        drop(self.take_connection());
        info!("delivery client shut down");
    }

    fn connection(&self) -> Result<Arc<LiveConnection<T>>, DeliveryError> {
        if self.is_shut_down() {
            return Err(DeliveryError::transient("delivery client is shut down"));
        }

        {
            let guard = self
                .connection
                .read()
                .map_err(|_| DeliveryError::transient("connection lock poisoned"))?;
            if let Some(live) = guard.as_ref() {
                return Ok(Arc::clone(live));
            }
        }

        let mut guard = self
            .connection
            .write()
            .map_err(|_| DeliveryError::transient("connection lock poisoned"))?;
        if let Some(live) = guard.as_ref() {
            return Ok(Arc::clone(live));
        }

        let live = Arc::new(LiveConnection {
            transport: Arc::clone(&self.transport),
            conn: Some(self.transport.connect()?),
        });
        let opened = self.connects.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(connects = opened, "delivery connection opened");
        *guard = Some(Arc::clone(&live));
        Ok(live)
    }

    /// After a transient failure, retire `used` unless it was already replaced.
    fn after_call<R>(
        &self,
        used: &Arc<LiveConnection<T>>,
        result: Result<R, DeliveryError>,
    ) -> Result<R, DeliveryError> {
        if let Err(err) = &result {
            if err.is_transient() {
                let retired = {
                    let mut guard = match self.connection.write() {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    match guard.as_ref() {
                        Some(current) if Arc::ptr_eq(current, used) => guard.take(),
                        _ => None,
                    }
                };
                if retired.is_some() {
                    warn!(error = %err, "dropping delivery connection after transient failure");
                }
            }
        }
        result
    }

    fn take_connection(&self) -> Option<Arc<LiveConnection<T>>> {
        match self.connection.write() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

impl<T: Transport> Publisher for DeliveryClient<T> {
    fn publish(&self, envelope: &Envelope) -> Result<Ack, DeliveryError> {
        let live = self.connection()?;
        let result = live.call(|transport, conn| transport.publish(conn, envelope));
        self.after_call(&live, result)
    }
}

impl<T: Transport> Drop for DeliveryClient<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
