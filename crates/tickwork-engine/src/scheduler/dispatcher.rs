//! The tick-driven dispatch loop.
//!
//! The dispatcher exclusively owns the pending queue and the staging buffer;
//! every structural change to either happens inside [`Dispatcher::heartbeat`],
//! including the cancellation commands drained from the submission chain.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::Local;
use tracing::{trace, warn};

use crate::error::{SchedulerError, TaskFailure};
use crate::owner::Owner;
use crate::scheduler::activity::RecentActivityLog;
use crate::scheduler::channel::Submission;
use crate::scheduler::handle::TaskHandle;
use crate::scheduler::pending::PendingQueue;
use crate::scheduler::pool::WorkerPool;
use crate::scheduler::runners::RunnerTable;
use crate::scheduler::task::{ExecutionMode, TaskId, TaskRecord, TaskState};
use crate::scheduler::worker;
use crate::scheduler::Scheduler;

/// Single consumer of the submission chain; drive it once per tick.
pub struct Dispatcher {
    scheduler: Scheduler,
    pending: PendingQueue,
    /// Repeating tasks handled in the current heartbeat, merged at its end
    staged: Vec<Arc<TaskRecord>>,
    activity: RecentActivityLog,
    pool: WorkerPool,
}

impl Dispatcher {
    pub(crate) fn new(scheduler: Scheduler) -> Self {
        let config = &scheduler.inner.config;
        let activity = RecentActivityLog::new(config.recent_window_ticks);
        let pool = WorkerPool::new(
            config.worker_name_prefix.clone(),
            config.worker_keep_alive(),
        );
        Self {
            scheduler,
            pending: PendingQueue::new(),
            staged: Vec::new(),
            activity,
            pool,
        }
    }

    /// Producer-side handle of the scheduler this dispatcher drives
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Diagnostic log of recent async dispatches
    pub fn recent_activity(&self) -> &RecentActivityLog {
        &self.activity
    }

    /// Tasks waiting in the pending queue (drained submissions only)
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Worker pool executing async task bodies
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Run one dispatch pass for `tick`.
    ///
    /// Every task whose next run is at or before `tick` is attempted exactly
    /// once. Sync bodies run inline and their failures are logged, never
    /// propagated. Never blocks on a lock held by a worker.
    ///
    /// A task bound to a wall-clock time that has not arrived yet is
    /// restaged for the next tick instead of running.
    pub fn heartbeat(&mut self, tick: u64) {
        self.scheduler
            .inner
            .current_tick
            .store(tick, Ordering::Release);
        self.drain();
        let now = Local::now();

        while let Some(record) = self.pending.pop_ready(tick) {
            if record.is_cancelled() {
                record.release_if_idle(&self.scheduler.inner.runners);
                self.drain();
                continue;
            }

            if record.awaits_deadline(now) {
                record.set_next_run(tick.saturating_add(1));
                self.staged.push(record);
                continue;
            }

            match record.mode() {
                ExecutionMode::Sync => {
                    self.run_sync(&record);
                    self.drain();
                }
                ExecutionMode::Async => {
                    self.activity
                        .record(tick, record.owner(), record.action_type());
                    self.dispatch_async(&record);
                }
            }

            match record.state() {
                TaskState::Scheduled(Some(interval)) => {
                    record.set_next_run(tick.saturating_add(interval.get()));
                    self.staged.push(record);
                }
                _ if record.is_sync() => {
                    self.scheduler.inner.runners.remove(record.id());
                }
                _ => {}
            }
        }

        for record in self.staged.drain(..) {
            self.pending.push(record);
        }
        self.activity.advance(tick);
    }

    fn run_sync(&self, record: &Arc<TaskRecord>) {
        trace!(task_id = %record.id(), owner = %record.owner(), "running sync task");
        let handle = TaskHandle::new(Arc::clone(record), self.scheduler.clone());
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| record.invoke(&handle)));
        record.mark_completed();

        let failure = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(err)) => TaskFailure::Error(err),
            Err(payload) => TaskFailure::from_panic(payload),
        };
        let err = SchedulerError::SyncExecution {
            task_id: record.id(),
            owner: record.owner().name().to_string(),
            failure,
        };
        warn!(task_id = %record.id(), owner = %record.owner(), "{}", err);
    }

    fn dispatch_async(&self, record: &Arc<TaskRecord>) {
        trace!(task_id = %record.id(), owner = %record.owner(), "dispatching async task");
        let job = Arc::clone(record);
        let scheduler = self.scheduler.clone();
        let spawned = self.pool.execute(move || {
            let handle = TaskHandle::new(Arc::clone(&job), scheduler.clone());
            if let Err(fault) = worker::run_async(&job, &scheduler.inner.runners, &handle) {
                scheduler.report_fault(fault);
            }
        });
        if let Err(err) = spawned {
            self.abandon_async(record, err);
        }
    }

    /// No thread could be started for this occurrence. It is skipped; a
    /// one-shot is retired so it does not stay listed as pending.
    fn abandon_async(&self, record: &TaskRecord, source: io::Error) {
        if record.interval().is_none() {
            record.mark_completed();
            record.release_if_idle(&self.scheduler.inner.runners);
        }
        self.scheduler.report_fault(SchedulerError::WorkerSpawn {
            task_id: record.id(),
            owner: record.owner().name().to_string(),
            source,
        });
    }

    /// Move new submissions into the pending queue and execute commands.
    fn drain(&mut self) {
        let Dispatcher {
            scheduler,
            pending,
            staged,
            ..
        } = self;
        let runners = &scheduler.inner.runners;

        scheduler.inner.submissions.drain(|submission| match submission {
            Submission::Run(record) => {
                if !record.is_cancelled() {
                    runners.insert(Arc::clone(record));
                    pending.push(Arc::clone(record));
                }
            }
            Submission::CancelId(id) => cancel_id(*id, pending, staged, runners),
            Submission::CancelOwner(owner) => cancel_owner(owner, pending, staged, runners),
            Submission::CancelAll => cancel_all(pending, staged, runners),
        });
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("tick", &self.scheduler.current_tick())
            .field("pending", &self.pending.len())
            .field("staged", &self.staged.len())
            .finish()
    }
}

fn retire(record: &TaskRecord, runners: &RunnerTable) {
    record.mark_cancelled();
    record.release_if_idle(runners);
}

fn cancel_id(
    id: TaskId,
    pending: &mut PendingQueue,
    staged: &mut Vec<Arc<TaskRecord>>,
    runners: &RunnerTable,
) {
    let found = match staged.iter().position(|record| record.id() == id) {
        Some(index) => Some(staged.swap_remove(index)),
        None => pending
            .remove_where(|record| record.id() == id)
            .into_iter()
            .next(),
    };
    if let Some(record) = found {
        retire(&record, runners);
    }
}

fn cancel_owner(
    owner: &Owner,
    pending: &mut PendingQueue,
    staged: &mut Vec<Arc<TaskRecord>>,
    runners: &RunnerTable,
) {
    let (removed, kept): (Vec<_>, Vec<_>) = staged
        .drain(..)
        .partition(|record| record.owner() == owner);
    *staged = kept;

    for record in removed
        .iter()
        .chain(pending.remove_where(|record| record.owner() == owner).iter())
    {
        retire(record, runners);
    }
}

fn cancel_all(
    pending: &mut PendingQueue,
    staged: &mut Vec<Arc<TaskRecord>>,
    runners: &RunnerTable,
) {
    for record in staged.drain(..).chain(pending.remove_where(|_| true)) {
        retire(&record, runners);
    }
    for record in runners.snapshot() {
        retire(&record, runners);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    #[test]
    fn test_heartbeat_runs_due_sync_task_once() {
        let (scheduler, mut dispatcher) = Scheduler::new(SchedulerConfig::default());
        let owner = Owner::new("alpha");
        let runs = counter();
        let seen = Arc::clone(&runs);
        scheduler
            .run_sync(&owner, 2, move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        dispatcher.heartbeat(1);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.pending_len(), 1);

        dispatcher.heartbeat(2);
        dispatcher.heartbeat(3);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.pending_len(), 0);
        assert_eq!(scheduler.inner.runners.len(), 0);
    }

    #[test]
    fn test_restaged_task_not_revisited_in_same_heartbeat() {
        let (scheduler, mut dispatcher) = Scheduler::new(SchedulerConfig::default());
        let owner = Owner::new("alpha");
        let runs = counter();
        let seen = Arc::clone(&runs);
        let handle = scheduler
            .repeat_sync(&owner, 0, 1, move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        dispatcher.heartbeat(10);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(handle.next_run(), 11);
    }

    #[test]
    fn test_cancel_command_from_sync_body_applies_before_next_task() {
        let (scheduler, mut dispatcher) = Scheduler::new(SchedulerConfig::default());
        let owner = Owner::new("alpha");
        let runs = counter();

        let victim_runs = Arc::clone(&runs);
        let victim = scheduler
            .run_sync(&owner, 1, move |_| {
                victim_runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        let victim_id = victim.id();
        dispatcher.heartbeat(0);

        scheduler
            .run_sync(&owner, 0, move |handle| {
                handle.scheduler().cancel_task(victim_id);
                Ok(())
            })
            .unwrap();
        dispatcher.heartbeat(1);

        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.pending_len(), 0);
    }

    #[test]
    fn test_sync_panic_does_not_stop_dispatch() {
        let (scheduler, mut dispatcher) = Scheduler::new(SchedulerConfig::default());
        let owner = Owner::new("alpha");
        let runs = counter();
        scheduler
            .run_sync(&owner, 0, |_| panic!("boom"))
            .unwrap();
        let seen = Arc::clone(&runs);
        scheduler
            .run_sync(&owner, 0, move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        dispatcher.heartbeat(0);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_all_clears_pending() {
        let (scheduler, mut dispatcher) = Scheduler::new(SchedulerConfig::default());
        let owner = Owner::new("alpha");
        for delay in 1..=3 {
            scheduler.repeat_sync(&owner, delay, 5, |_| Ok(())).unwrap();
        }
        dispatcher.heartbeat(0);
        assert_eq!(dispatcher.pending_len(), 3);

        scheduler.cancel_all();
        dispatcher.heartbeat(1);
        assert_eq!(dispatcher.pending_len(), 0);
        assert!(scheduler.pending_tasks().is_empty());
        assert_eq!(scheduler.inner.runners.len(), 0);
    }

    /// The victim runs first at tick 0 and sits in the staging buffer when
    /// the second sync body issues `cancel`.
    fn cancel_staged_victim<C>(cancel: C)
    where
        C: Fn(&Scheduler, TaskId, &Owner) + Send + Sync + 'static,
    {
        let (scheduler, mut dispatcher) = Scheduler::new(SchedulerConfig::default());
        let victim_owner = Owner::new("victim");
        let runs = counter();
        let seen = Arc::clone(&runs);
        let victim = scheduler
            .repeat_sync(&victim_owner, 0, 1, move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        let victim_id = victim.id();
        let target = victim_owner.clone();
        scheduler
            .run_sync(&Owner::new("canceller"), 0, move |handle| {
                cancel(handle.scheduler(), victim_id, &target);
                Ok(())
            })
            .unwrap();

        dispatcher.heartbeat(0);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.pending_len(), 0);
        assert!(scheduler.pending_tasks().is_empty());

        for tick in 1..=4 {
            dispatcher.heartbeat(tick);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!victim.is_queued());
        assert_eq!(scheduler.inner.runners.len(), 0);
    }

    #[test]
    fn test_cancel_id_removes_staged_task() {
        cancel_staged_victim(|scheduler, id, _| scheduler.cancel_task(id));
    }

    #[test]
    fn test_cancel_owner_removes_staged_task() {
        cancel_staged_victim(|scheduler, _, owner| scheduler.cancel_tasks(owner));
    }

    #[test]
    fn test_cancel_all_removes_staged_task() {
        cancel_staged_victim(|scheduler, _, _| scheduler.cancel_all());
    }

    #[test]
    fn test_worker_spawn_failure_retires_one_shot() {
        let (scheduler, mut dispatcher) = Scheduler::new(SchedulerConfig::default());
        let owner = Owner::new("alpha");
        let once = scheduler.run_async(&owner, 5, |_| Ok(())).unwrap();
        let repeating = scheduler.repeat_async(&owner, 5, 5, |_| Ok(())).unwrap();
        dispatcher.heartbeat(0);
        assert_eq!(scheduler.pending_tasks().len(), 2);

        let no_threads = || io::Error::new(io::ErrorKind::WouldBlock, "no threads left");
        dispatcher.abandon_async(once.record(), no_threads());
        dispatcher.abandon_async(repeating.record(), no_threads());

        assert!(!once.is_queued());
        assert!(repeating.is_queued());
        let pending = scheduler.pending_tasks();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, repeating.id());

        let faults = scheduler.faults();
        for expected in [once.id(), repeating.id()] {
            match faults.try_recv().unwrap() {
                SchedulerError::WorkerSpawn { task_id, source, .. } => {
                    assert_eq!(task_id, expected);
                    assert_eq!(source.kind(), io::ErrorKind::WouldBlock);
                }
                other => panic!("unexpected fault: {other}"),
            }
        }
    }
}
