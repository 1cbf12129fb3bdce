//! Engine start and cooperative shutdown

use std::thread;

use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::scheduler::dispatcher::Dispatcher;
use crate::scheduler::worker::WorkerHandle;
use crate::scheduler::Scheduler;

const NO_AUTHOR: &str = "<NoAuthorGiven>";

/// Outcome of [`Scheduler::shutdown`].
#[derive(Debug, Clone, Default)]
pub struct ShutdownReport {
    /// Workers still running when the drain window closed
    pub overdue: Vec<WorkerHandle>,
    /// Number of polls spent waiting for workers
    pub polls: u32,
}

impl ShutdownReport {
    /// True if every async worker finished inside the drain window
    pub fn is_clean(&self) -> bool {
        self.overdue.is_empty()
    }
}

impl Scheduler {
    /// Create a scheduler with the periodic runner-table cleanup registered.
    pub fn start(config: SchedulerConfig) -> (Scheduler, Dispatcher) {
        let (scheduler, dispatcher) = Scheduler::new(config);
        scheduler.register_cleanup();
        info!(
            tick = scheduler.current_tick(),
            ticks_per_second = scheduler.config().ticks_per_second,
            "Scheduler started"
        );
        (scheduler, dispatcher)
    }

    fn register_cleanup(&self) {
        let interval = self.config().cleanup_interval_ticks;
        let grace = self.config().cleanup_grace();
        let registered = self.repeat_async(self.system_owner(), interval, interval, move |handle| {
            let purged = handle.scheduler().inner.runners.purge_idle(grace);
            debug!(purged, "runner table cleanup");
            Ok(())
        });
        if let Err(err) = registered {
            warn!("Unable to register runner cleanup: {}", err);
        }
    }

    /// Cancel everything, then wait a bounded time for async workers.
    ///
    /// Workers still running afterwards are logged against their owner and
    /// returned; the engine does not interrupt them.
    pub fn shutdown(&self) -> ShutdownReport {
        info!("Scheduler shutting down");
        self.cancel_all();

        let attempts = self.config().shutdown_poll_attempts;
        let interval = self.config().shutdown_poll_interval();
        let mut polls = 0;
        while polls < attempts && !self.active_workers().is_empty() {
            thread::sleep(interval);
            polls += 1;
        }

        let overdue = self.active_workers();
        for worker in &overdue {
            let owner = worker.owner();
            let author = owner.authors().first().map_or(NO_AUTHOR, String::as_str);
            error!(
                task_id = %worker.task_id(),
                thread = worker.thread_name().unwrap_or("<unnamed>"),
                "Nag author: '{}' of '{}' about the following: This owner is not properly shutting down its async tasks when it is being stopped. This may cause conflicts with a newly started instance.",
                author,
                owner.name()
            );
        }
        if overdue.is_empty() {
            info!(polls, "Scheduler stopped");
        }
        ShutdownReport { overdue, polls }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::owner::Owner;

    #[test]
    fn test_start_registers_cleanup_task() {
        let (scheduler, _dispatcher) = Scheduler::start(SchedulerConfig::default());
        let pending = scheduler.pending_tasks();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].owner, *scheduler.system_owner());
        assert_eq!(pending[0].next_run, 12_000);
    }

    #[test]
    fn test_shutdown_without_workers_is_clean() {
        let (scheduler, mut dispatcher) = Scheduler::start(SchedulerConfig::default());
        let owner = Owner::new("idle");
        scheduler.repeat_sync(&owner, 1, 1, |_| Ok(())).unwrap();
        dispatcher.heartbeat(1);

        let report = scheduler.shutdown();
        assert!(report.is_clean());
        assert_eq!(report.polls, 0);
        assert!(scheduler.pending_tasks().is_empty());
    }
}
