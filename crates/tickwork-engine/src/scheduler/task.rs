//! Task records and their lifecycle state

use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use crossbeam::atomic::AtomicCell;
use parking_lot::{Mutex, MutexGuard};

use crate::owner::Owner;
use crate::scheduler::runners::RunnerTable;
use crate::scheduler::worker::WorkerHandle;
use crate::scheduler::TaskHandle;

/// Unique identifier for a scheduled task.
///
/// Ids are positive, allocated monotonically per scheduler, and never reused.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Create a TaskId from a u64 value
    pub fn from_u64(id: u64) -> Self {
        TaskId(id)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a task body runs.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ExecutionMode {
    /// Inline on the dispatcher thread
    Sync,
    /// On a worker pool thread
    Async,
}

/// Lifecycle state of a task.
///
/// `Scheduled` may restage into `Scheduled` again; `Cancelled` is terminal.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TaskState {
    /// Waiting for (or between) runs; `None` means one-shot
    Scheduled(Option<NonZeroU64>),
    /// Will never run again
    Cancelled,
}

/// When a task first runs and whether it repeats, in ticks.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Schedule {
    pub(crate) delay: u64,
    pub(crate) interval: Option<NonZeroU64>,
}

impl Schedule {
    /// Run once, `delay` ticks from now
    pub fn once(delay: u64) -> Self {
        Self {
            delay,
            interval: None,
        }
    }

    /// Run `delay` ticks from now, then every `period` ticks until cancelled.
    ///
    /// A period of zero is treated as one tick.
    pub fn repeating(delay: u64, period: u64) -> Self {
        Self {
            delay,
            interval: NonZeroU64::new(period.max(1)),
        }
    }

    /// Initial delay in ticks
    pub fn delay(&self) -> u64 {
        self.delay
    }

    /// Repeat interval, if any
    pub fn interval(&self) -> Option<NonZeroU64> {
        self.interval
    }
}

/// Result returned by task bodies.
pub type TaskResult = anyhow::Result<()>;

/// Boxed task body.
pub(crate) type Action = Box<dyn Fn(&TaskHandle) -> TaskResult + Send + Sync>;

/// A unit of scheduled work.
///
/// `id`, `owner`, `mode`, `interval` and `deadline` never change. `next_run`
/// is written by the dispatcher thread only. The worker set is only ever
/// populated for async tasks; `running` mirrors its length and is only
/// written while the worker-set lock is held.
pub struct TaskRecord {
    id: TaskId,
    owner: Owner,
    mode: ExecutionMode,
    interval: Option<NonZeroU64>,
    cancelled: AtomicBool,
    next_run: AtomicU64,
    /// Wall-clock time before which the task must not run
    deadline: Option<DateTime<Local>>,
    action: Action,
    action_type: &'static str,
    workers: Mutex<Vec<WorkerHandle>>,
    running: AtomicUsize,
    created_at: Instant,
    last_completed: AtomicCell<Option<Instant>>,
}

impl TaskRecord {
    pub(crate) fn new(
        id: TaskId,
        owner: Owner,
        mode: ExecutionMode,
        schedule: Schedule,
        next_run: u64,
        action: Action,
        action_type: &'static str,
    ) -> Self {
        Self {
            id,
            owner,
            mode,
            interval: schedule.interval,
            cancelled: AtomicBool::new(false),
            next_run: AtomicU64::new(next_run),
            deadline: None,
            action,
            action_type,
            workers: Mutex::new(Vec::new()),
            running: AtomicUsize::new(0),
            created_at: Instant::now(),
            last_completed: AtomicCell::new(None),
        }
    }

    /// Bind the first run to a wall-clock time as well as a tick.
    pub(crate) fn with_deadline(mut self, deadline: DateTime<Local>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Get the task's unique ID
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Get the owning module
    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    /// Get the execution mode
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// True for tasks that run on the dispatcher thread
    pub fn is_sync(&self) -> bool {
        self.mode == ExecutionMode::Sync
    }

    /// Repeat interval (`None` for one-shot tasks)
    pub fn interval(&self) -> Option<NonZeroU64> {
        self.interval
    }

    /// Current lifecycle state
    pub fn state(&self) -> TaskState {
        if self.is_cancelled() {
            TaskState::Cancelled
        } else {
            TaskState::Scheduled(self.interval)
        }
    }

    /// Whether the task has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// One-shot or cancelled: no further occurrence will be staged
    pub(crate) fn is_terminal(&self) -> bool {
        self.interval.is_none() || self.is_cancelled()
    }

    /// Tick at which the next occurrence becomes eligible
    pub fn next_run(&self) -> u64 {
        self.next_run.load(Ordering::Acquire)
    }

    pub(crate) fn set_next_run(&self, tick: u64) {
        self.next_run.store(tick, Ordering::Release);
    }

    /// Wall-clock time the task is bound to, if any
    pub fn deadline(&self) -> Option<DateTime<Local>> {
        self.deadline
    }

    /// Eligible by tick but its wall-clock time has not arrived yet
    pub(crate) fn awaits_deadline(&self, now: DateTime<Local>) -> bool {
        self.deadline.is_some_and(|deadline| now < deadline)
    }

    /// Type name of the action, used as a diagnostic tag
    pub fn action_type(&self) -> &'static str {
        self.action_type
    }

    pub(crate) fn invoke(&self, handle: &TaskHandle) -> TaskResult {
        (self.action)(handle)
    }

    pub(crate) fn workers(&self) -> MutexGuard<'_, Vec<WorkerHandle>> {
        self.workers.lock()
    }

    pub(crate) fn try_workers(&self) -> Option<MutexGuard<'_, Vec<WorkerHandle>>> {
        self.workers.try_lock()
    }

    /// Number of live invocations; readable without the worker-set lock
    pub(crate) fn running(&self) -> usize {
        self.running.load(Ordering::Acquire)
    }

    /// Publish the worker count; caller holds the worker-set guard
    pub(crate) fn sync_running(&self, workers: &[WorkerHandle]) {
        self.running.store(workers.len(), Ordering::Release);
    }

    pub(crate) fn mark_completed(&self) {
        self.last_completed.store(Some(Instant::now()));
    }

    /// Time since the task last finished an invocation (or was created, if
    /// it never ran).
    pub(crate) fn idle_for(&self) -> Duration {
        self.last_completed
            .load()
            .unwrap_or(self.created_at)
            .elapsed()
    }

    /// Whether any invocation has completed yet
    pub(crate) fn has_completed(&self) -> bool {
        self.last_completed.load().is_some()
    }

    /// Flip the state to `Cancelled` without touching the runner table.
    pub(crate) fn mark_cancelled(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Cancel from any thread, including the dispatcher's. Never blocks.
    ///
    /// An idle async task leaves the runner table immediately. If the
    /// worker-set lock is contended, a worker is entering or leaving: the
    /// last worker out, the dispatcher's release, or the cleanup sweep
    /// removes the entry.
    pub(crate) fn cancel(&self, runners: &RunnerTable) {
        match self.mode {
            ExecutionMode::Sync => self.mark_cancelled(),
            ExecutionMode::Async => match self.try_workers() {
                Some(workers) => {
                    self.mark_cancelled();
                    if workers.is_empty() {
                        runners.remove(self.id);
                    }
                }
                None => self.mark_cancelled(),
            },
        }
    }

    /// Non-blocking release used by the dispatcher after it drops a
    /// cancelled record. If the worker-set lock is contended the holder is a
    /// worker, and that worker performs the removal itself.
    pub(crate) fn release_if_idle(&self, runners: &RunnerTable) {
        match self.mode {
            ExecutionMode::Sync => {
                runners.remove(self.id);
            }
            ExecutionMode::Async => {
                if let Some(workers) = self.try_workers() {
                    if workers.is_empty() {
                        runners.remove(self.id);
                    }
                }
            }
        }
    }

    /// Snapshot for listings
    pub fn info(&self) -> TaskInfo {
        TaskInfo {
            id: self.id,
            owner: self.owner.clone(),
            mode: self.mode,
            interval: self.interval,
            next_run: self.next_run(),
            deadline: self.deadline,
            action_type: self.action_type,
        }
    }
}

impl fmt::Debug for TaskRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRecord")
            .field("id", &self.id)
            .field("owner", &self.owner.name())
            .field("mode", &self.mode)
            .field("state", &self.state())
            .field("next_run", &self.next_run())
            .finish()
    }
}

/// Point-in-time view of a task, returned by listing queries.
#[derive(Debug, Clone)]
pub struct TaskInfo {
    /// Task id
    pub id: TaskId,
    /// Owning module
    pub owner: Owner,
    /// Execution mode
    pub mode: ExecutionMode,
    /// Repeat interval (`None` for one-shot tasks)
    pub interval: Option<NonZeroU64>,
    /// Tick of the next eligible run
    pub next_run: u64,
    /// Wall-clock time the run is bound to (`run_at` tasks)
    pub deadline: Option<DateTime<Local>>,
    /// Type name of the action
    pub action_type: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(mode: ExecutionMode, schedule: Schedule) -> TaskRecord {
        TaskRecord::new(
            TaskId::from_u64(7),
            Owner::new("test"),
            mode,
            schedule,
            3,
            Box::new(|_| Ok(())),
            "noop",
        )
    }

    #[test]
    fn test_schedule_normalises_zero_period() {
        let schedule = Schedule::repeating(0, 0);
        assert_eq!(schedule.interval().map(NonZeroU64::get), Some(1));
        assert_eq!(Schedule::once(4).interval(), None);
    }

    #[test]
    fn test_state_transitions() {
        let task = record(ExecutionMode::Sync, Schedule::repeating(0, 5));
        assert_eq!(task.state(), TaskState::Scheduled(NonZeroU64::new(5)));
        assert!(!task.is_terminal());

        task.mark_cancelled();
        assert_eq!(task.state(), TaskState::Cancelled);
        assert!(task.is_terminal());
    }

    #[test]
    fn test_async_cancel_removes_idle_runner() {
        let runners = RunnerTable::new();
        let task = std::sync::Arc::new(record(ExecutionMode::Async, Schedule::once(0)));
        runners.insert(std::sync::Arc::clone(&task));

        task.cancel(&runners);
        assert!(task.is_cancelled());
        assert!(runners.get(task.id()).is_none());
    }

    #[test]
    fn test_sync_cancel_leaves_runner_for_dispatcher() {
        let runners = RunnerTable::new();
        let task = std::sync::Arc::new(record(ExecutionMode::Sync, Schedule::once(0)));
        runners.insert(std::sync::Arc::clone(&task));

        task.cancel(&runners);
        assert!(task.is_cancelled());
        assert!(runners.get(task.id()).is_some());

        task.release_if_idle(&runners);
        assert!(runners.get(task.id()).is_none());
    }

    #[test]
    fn test_async_cancel_does_not_wait_for_worker_set_lock() {
        let runners = RunnerTable::new();
        let task = std::sync::Arc::new(record(ExecutionMode::Async, Schedule::repeating(0, 1)));
        runners.insert(std::sync::Arc::clone(&task));

        // Same thread: a blocking lock here would deadlock.
        let held = task.workers();
        task.cancel(&runners);
        assert!(task.is_cancelled());
        assert!(runners.get(task.id()).is_some());
        drop(held);

        task.release_if_idle(&runners);
        assert!(runners.get(task.id()).is_none());
    }

    #[test]
    fn test_deadline_gates_eligibility() {
        let now = Local::now();
        let task = record(ExecutionMode::Sync, Schedule::once(0))
            .with_deadline(now + chrono::Duration::hours(2));
        assert!(task.awaits_deadline(now));
        assert!(!task.awaits_deadline(now + chrono::Duration::hours(3)));

        let unbound = record(ExecutionMode::Sync, Schedule::once(0));
        assert!(!unbound.awaits_deadline(now));
    }
}
