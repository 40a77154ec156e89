//! Operator alerts for records that reached `Failed`.

use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use serde::Serialize;
use tracing::error;

use crate::outbox::{Destination, OutboxRecord, RecordId};

/// Why a record was failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// The transport refused the message outright.
    Permanent(String),
    /// Transient failures used up the retry budget.
    BudgetExhausted { attempts: u32, last_error: String },
}

impl FailureReason {
    pub fn message(&self) -> String {
        match self {
            FailureReason::Permanent(error) => format!("permanent: {}", error),
            FailureReason::BudgetExhausted {
                attempts,
                last_error,
            } => format!("retry budget exhausted after {} attempts: {}", attempts, last_error),
        }
    }
}

/// A record that needs operator attention.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub record_id: RecordId,
    pub aggregate_id: String,
    pub event_type: String,
    pub destination: Destination,
    pub channel: String,
    pub reason: FailureReason,
    pub raised_at: SystemTime,
}

impl Alert {
    pub fn for_record(record: &OutboxRecord, reason: FailureReason, raised_at: SystemTime) -> Self {
        Alert {
            record_id: record.id,
            aggregate_id: record.aggregate_id.clone(),
            event_type: record.event_type.clone(),
            destination: record.destination,
            channel: record.channel.clone(),
            reason,
            raised_at,
        }
    }
}

/// Receives an alert for every record the dispatcher fails.
pub trait AlertSink: Send + Sync {
    fn alert(&self, alert: &Alert);
}

impl<A: AlertSink + ?Sized> AlertSink for Arc<A> {
    fn alert(&self, alert: &Alert) {
        (**self).alert(alert)
    }
}

/// Logs alerts at error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn alert(&self, alert: &Alert) {
        error!(
            record_id = %alert.record_id,
            aggregate_id = %alert.aggregate_id,
            event_type = %alert.event_type,
            channel = %alert.channel,
            reason = %alert.reason.message(),
            "outbox record failed"
        );
    }
}

/// Collects alerts in memory. Clones share the buffer.
#[derive(Debug, Default, Clone)]
pub struct BufferAlertSink {
    alerts: Arc<Mutex<Vec<Alert>>>,
}

impl BufferAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts
            .lock()
            .map(|alerts| alerts.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn len(&self) -> usize {
        self.alerts().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AlertSink for BufferAlertSink {
    fn alert(&self, alert: &Alert) {
        let mut alerts = self
            .alerts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        alerts.push(alert.clone());
    }
}

#[cfg(feature = "emitter")]
pub use emitter::EmitterAlertSink;

#[cfg(feature = "emitter")]
mod emitter {
    use std::sync::Mutex;

    use event_emitter_rs::EventEmitter;
    use tracing::warn;

    use super::{Alert, AlertSink};

    /// Emits each alert as a JSON string through an `EventEmitter`, so
    /// in-process listeners (pagers, dashboards) can subscribe.
    pub struct EmitterAlertSink {
        emitter: Mutex<EventEmitter>,
        event: String,
    }

    impl EmitterAlertSink {
        pub const DEFAULT_EVENT: &'static str = "outbox.record_failed";

        pub fn new() -> Self {
            Self::with_event(Self::DEFAULT_EVENT)
        }

        pub fn with_event(event: impl Into<String>) -> Self {
            EmitterAlertSink {
                emitter: Mutex::new(EventEmitter::new()),
                event: event.into(),
            }
        }

        /// Register a listener receiving the alert JSON.
        pub fn on<F>(&self, listener: F)
        where
            F: Fn(String) + Send + Sync + 'static,
        {
            let mut emitter = self
                .emitter
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            emitter.on(&self.event, listener);
        }
    }

    impl Default for EmitterAlertSink {
        fn default() -> Self {
            Self::new()
        }
    }

    impl AlertSink for EmitterAlertSink {
        fn alert(&self, alert: &Alert) {
            let json = match serde_json::to_string(alert) {
                Ok(json) => json,
                Err(err) => {
                    warn!(record_id = %alert.record_id, error = %err, "alert not serializable");
                    return;
                }
            };
            let mut emitter = self
                .emitter
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            emitter.emit(&self.event, json);
        }
    }
}
