use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info};

use super::error::{GuardError, HandleError};
use super::store::ProcessedIdStore;
use crate::clock::{Clock, SystemClock};
use crate::config::GuardConfig;

/// Result of [`IdempotencyGuard::handle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// First delivery: the handler ran and the id was recorded.
    Processed(T),
    /// Already processed; the handler was not called.
    Duplicate,
    /// Another caller in this process is handling the same id right now.
    InProgress,
}

impl<T> Outcome<T> {
    pub fn is_processed(&self) -> bool {
        matches!(self, Outcome::Processed(_))
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Outcome::Duplicate)
    }

    pub fn into_processed(self) -> Option<T> {
        match self {
            Outcome::Processed(value) => Some(value),
            _ => None,
        }
    }
}

/// Consumer-side dedup filter keyed by message id.
///
/// An id is recorded only after its handler succeeded, so presence means the
/// message was fully handled. Entries are evicted after `retention`, which
/// must exceed the broker's maximum redelivery delay.
///
/// ```
/// use std::time::Duration;
/// use outbox_relay::idempotency::{IdempotencyGuard, InMemoryProcessedIds, Outcome};
///
/// let guard = IdempotencyGuard::new(InMemoryProcessedIds::new(), Duration::from_secs(3600));
///
/// let first = guard.handle("m-1", || Ok::<_, String>("email sent")).unwrap();
/// let again = guard.handle("m-1", || Ok::<_, String>("email sent")).unwrap();
///
/// assert_eq!(first, Outcome::Processed("email sent"));
/// assert_eq!(again, Outcome::Duplicate);
/// ```
pub struct IdempotencyGuard<S> {
    store: S,
    retention: Duration,
    clock: Arc<dyn Clock>,
    claims: Mutex<HashSet<String>>,
}

impl<S: ProcessedIdStore> IdempotencyGuard<S> {
    pub fn new(store: S, retention: Duration) -> Self {
        IdempotencyGuard {
            store,
            retention,
            clock: Arc::new(SystemClock),
            claims: Mutex::new(HashSet::new()),
        }
    }

    pub fn from_config(store: S, config: &GuardConfig) -> Self {
        Self::new(store, config.retention)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// `true` if `message_id` has not been processed yet.
    ///
    /// A store failure is returned as an error, never as `true`.
    pub fn should_process(&self, message_id: &str) -> Result<bool, GuardError> {
        if message_id.is_empty() {
            return Err(GuardError::EmptyMessageId);
        }
        Ok(!self.store.contains(message_id)?)
    }

    /// Record `message_id` as fully handled. Idempotent.
    pub fn mark_processed(&self, message_id: &str) -> Result<(), GuardError> {
        if message_id.is_empty() {
            return Err(GuardError::EmptyMessageId);
        }
        let inserted = self.store.insert(message_id, self.clock.now())?;
        if !inserted {
            debug!(message_id, "message id already recorded");
        }
        Ok(())
    }

    /// Evict every id seen before `now - retention`.
    pub fn sweep(&self) -> Result<usize, GuardError> {
        let now = self.clock.now();
        let Some(cutoff) = now.checked_sub(self.retention) else {
            return Ok(0);
        };
        let evicted = self.store.evict_before(cutoff)?;
        if evicted > 0 {
            info!(evicted, "processed ids evicted");
        }
        Ok(evicted)
    }

    /// Run `handler` at most once for `message_id`.
    ///
    /// The id is claimed in-process for the duration of the call, checked
    /// against the store, and recorded only when `handler` succeeds. A failed
    /// handler leaves nothing behind, so a redelivery runs it again.
    pub fn handle<T, E, F>(&self, message_id: &str, handler: F) -> Result<Outcome<T>, HandleError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let Some(_claim) = Claim::acquire(&self.claims, message_id)? else {
            debug!(message_id, "message already being handled");
            return Ok(Outcome::InProgress);
        };

        if !self.should_process(message_id)? {
            debug!(message_id, "duplicate delivery skipped");
            return Ok(Outcome::Duplicate);
        }

        let value = handler().map_err(HandleError::Handler)?;
        self.mark_processed(message_id)?;
        Ok(Outcome::Processed(value))
    }
}

/// In-process claim on a message id, released on drop (including unwinding).
struct Claim<'a> {
    claims: &'a Mutex<HashSet<String>>,
    message_id: String,
}

impl<'a> Claim<'a> {
    fn acquire(
        claims: &'a Mutex<HashSet<String>>,
        message_id: &str,
    ) -> Result<Option<Self>, GuardError> {
        let mut held = claims.lock().map_err(|_| GuardError::ClaimsPoisoned)?;
        if !held.insert(message_id.to_string()) {
            return Ok(None);
        }
        Ok(Some(Claim {
            claims,
            message_id: message_id.to_string(),
        }))
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        let mut held = self
            .claims
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        held.remove(&self.message_id);
    }
}
