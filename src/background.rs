//! Periodic background threads stopped through a channel.
//!
//! Dispatcher lanes and the processed-id sweeper both run as a
//! `BackgroundTask`: a named thread calling `tick` every `interval` until
//! `stop` (or drop) signals it.

use std::io;
use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

pub struct BackgroundTask<T> {
    name: String,
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<T>>,
}

impl<T: Send + 'static> BackgroundTask<T> {
    /// Spawn a thread that calls `tick(&mut state)` immediately and then after
    /// every `interval`, returning `state` when stopped.
    pub fn spawn<F>(
        name: impl Into<String>,
        interval: Duration,
        mut state: T,
        mut tick: F,
    ) -> io::Result<Self>
    where
        F: FnMut(&mut T) + Send + 'static,
    {
        let name = name.into();
        let (stop_tx, stop_rx) = channel::<()>();
        let thread_name = name.clone();

        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            debug!(task = %thread_name, "background task started");
            loop {
                tick(&mut state);

                match stop_rx.recv_timeout(interval) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }
            }
            debug!(task = %thread_name, "background task stopped");
            state
        })?;

        Ok(BackgroundTask {
            name,
            stop_tx,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Signal the task to stop without waiting.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(());
    }

    /// Signal the task to stop and wait for it to finish.
    /// Returns the final state, or `None` if the thread panicked.
    pub fn stop(mut self) -> Option<T> {
        self.signal_stop();
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(state) => Some(state),
            Err(_) => {
                warn!(task = %self.name, "background task panicked");
                None
            }
        }
    }
}

impl<T> Drop for BackgroundTask<T> {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
        // Don't join on drop - let the thread finish naturally
    }
}
