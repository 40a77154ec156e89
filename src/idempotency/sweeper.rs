use std::io;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use super::guard::IdempotencyGuard;
use super::store::ProcessedIdStore;
use crate::background::BackgroundTask;

/// Statistics from the sweeper thread.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub sweeps: usize,
    pub evicted: usize,
    pub errors: usize,
}

/// A background thread that evicts expired processed ids.
pub struct SweeperThread {
    task: BackgroundTask<SweepStats>,
}

impl SweeperThread {
    /// Sweep immediately and then every `interval`.
    pub fn spawn<S>(guard: Arc<IdempotencyGuard<S>>, interval: Duration) -> io::Result<Self>
    where
        S: ProcessedIdStore + 'static,
    {
        let task = BackgroundTask::spawn(
            "processed-id-sweeper",
            interval,
            SweepStats::default(),
            move |stats: &mut SweepStats| {
                stats.sweeps += 1;
                match guard.sweep() {
                    Ok(evicted) => stats.evicted += evicted,
                    Err(err) => {
                        stats.errors += 1;
                        warn!(error = %err, "processed-id sweep failed");
                    }
                }
            },
        )?;
        Ok(SweeperThread { task })
    }

    /// Signal the sweeper to stop and wait for it to finish.
    pub fn stop(self) -> SweepStats {
        self.task.stop().unwrap_or_default()
    }
}
