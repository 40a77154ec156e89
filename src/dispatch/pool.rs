use std::io;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::alert::AlertSink;
use super::dispatcher::{DispatchReport, Dispatcher};
use crate::background::BackgroundTask;
use crate::delivery::Publisher;
use crate::store::{Lane, OutboxStore};

/// Statistics from the dispatcher lane threads.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub polls: usize,
    pub messages_published: usize,
    pub messages_retried: usize,
    pub messages_failed: usize,
    pub unconfirmed: usize,
    pub store_errors: usize,
}

impl WorkerStats {
    fn absorb(&mut self, report: &DispatchReport) {
        self.messages_published += report.published;
        self.messages_retried += report.retried;
        self.messages_failed += report.failed;
        self.unconfirmed += report.unconfirmed;
    }

    fn merge(&mut self, other: WorkerStats) {
        self.polls += other.polls;
        self.messages_published += other.messages_published;
        self.messages_retried += other.messages_retried;
        self.messages_failed += other.messages_failed;
        self.unconfirmed += other.unconfirmed;
        self.store_errors += other.store_errors;
    }
}

/// Background threads running a shared dispatcher, one per lane.
///
/// ## Example
///
/// ```ignore
/// let dispatcher = Arc::new(Dispatcher::from_config(store.clone(), client.clone(), &config));
/// let pool = DispatcherPool::spawn(dispatcher, config.lanes, config.poll_interval)?;
///
/// // ... serve requests ...
///
/// let stats = pool.stop();
/// println!("Published {} messages", stats.messages_published);
/// ```
pub struct DispatcherPool {
    lanes: Vec<BackgroundTask<WorkerStats>>,
}

impl DispatcherPool {
    /// Spawn `lanes` threads (at least one), each running dispatch cycles on
    /// its own lane with `poll_interval` between cycles.
    ///
    /// A lane keeps cycling without sleeping while it finds work.
    pub fn spawn<S, P, A>(
        dispatcher: Arc<Dispatcher<S, P, A>>,
        lanes: u32,
        poll_interval: Duration,
    ) -> io::Result<Self>
    where
        S: OutboxStore + 'static,
        P: Publisher + 'static,
        A: AlertSink + 'static,
    {
        let mut tasks = Vec::new();
        for lane in Lane::all(lanes) {
            let dispatcher = Arc::clone(&dispatcher);
            let name = format!("{}-lane-{}", dispatcher.worker_id(), lane.index);
            let task = BackgroundTask::spawn(
                name,
                poll_interval,
                WorkerStats::default(),
                move |stats: &mut WorkerStats| loop {
                    stats.polls += 1;
                    match dispatcher.run_cycle(lane) {
                        Ok(report) => {
                            stats.absorb(&report);
                            if report.is_idle() {
                                break;
                            }
                        }
                        Err(err) => {
                            stats.store_errors += 1;
                            warn!(lane = lane.index, error = %err, "lease failed");
                            break;
                        }
                    }
                },
            )?;
            tasks.push(task);
        }

        info!(lanes = tasks.len(), "dispatcher pool started");
        Ok(DispatcherPool { lanes: tasks })
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// Signal every lane to stop, wait for them, and return the combined stats.
    pub fn stop(self) -> WorkerStats {
        for lane in &self.lanes {
            lane.signal_stop();
        }
        let mut total = WorkerStats::default();
        for lane in self.lanes {
            if let Some(stats) = lane.stop() {
                total.merge(stats);
            }
        }
        info!(
            published = total.messages_published,
            failed = total.messages_failed,
            "dispatcher pool stopped"
        );
        total
    }
}
