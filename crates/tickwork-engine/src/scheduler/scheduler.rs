//! Producer-side scheduler handle: submission, cancellation and queries.
//!
//! Every method here may be called from any thread. Submissions and
//! cancellation commands are appended to the submission chain and take
//! structural effect on the dispatcher thread at its next drain.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDateTime, NaiveTime};
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use crate::config::SchedulerConfig;
use crate::error::{SchedulerError, ValidationError};
use crate::owner::Owner;
use crate::scheduler::channel::{Submission, SubmissionChannel};
use crate::scheduler::dispatcher::Dispatcher;
use crate::scheduler::handle::{SyncCall, TaskHandle};
use crate::scheduler::runners::RunnerTable;
use crate::scheduler::task::{
    Action, ExecutionMode, Schedule, TaskId, TaskInfo, TaskRecord, TaskResult,
};
use crate::scheduler::worker::WorkerHandle;

/// Name of the owner used for the engine's own housekeeping tasks
pub const SYSTEM_OWNER: &str = "tickwork";

/// State shared by every scheduler handle and the dispatcher.
pub(crate) struct SchedulerInner {
    pub(crate) config: SchedulerConfig,
    pub(crate) submissions: SubmissionChannel,
    pub(crate) runners: RunnerTable,
    pub(crate) current_tick: AtomicU64,
    pub(crate) system_owner: Owner,
    next_id: AtomicU64,
    fault_tx: Sender<SchedulerError>,
    fault_rx: Receiver<SchedulerError>,
}

/// Cloneable handle to a tick-driven scheduler.
///
/// The matching [`Dispatcher`] must be driven once per tick, either by the
/// host calling [`Dispatcher::heartbeat`] or through
/// [`Dispatcher::spawn_driver`].
#[derive(Clone)]
pub struct Scheduler {
    pub(crate) inner: Arc<SchedulerInner>,
}

impl Scheduler {
    /// Create a scheduler and its dispatcher without the periodic cleanup
    /// task. See [`Scheduler::start`] for the full lifecycle.
    pub fn new(config: SchedulerConfig) -> (Scheduler, Dispatcher) {
        let (fault_tx, fault_rx) = channel::bounded(config.fault_capacity.max(1));
        let inner = SchedulerInner {
            submissions: SubmissionChannel::new(),
            runners: RunnerTable::new(),
            current_tick: AtomicU64::new(config.initial_tick),
            system_owner: Owner::with_authors(SYSTEM_OWNER, vec![SYSTEM_OWNER.to_string()]),
            next_id: AtomicU64::new(1),
            fault_tx,
            fault_rx,
            config,
        };
        let scheduler = Scheduler {
            inner: Arc::new(inner),
        };
        let dispatcher = Dispatcher::new(scheduler.clone());
        (scheduler, dispatcher)
    }

    /// Effective configuration
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Tick of the most recent heartbeat
    pub fn current_tick(&self) -> u64 {
        self.inner.current_tick.load(Ordering::Acquire)
    }

    /// Owner of the engine's internal tasks
    pub fn system_owner(&self) -> &Owner {
        &self.inner.system_owner
    }

    // ========================================================================
    // Submission
    // ========================================================================

    /// Register a task.
    ///
    /// The first run becomes eligible at `current_tick + schedule.delay()`.
    /// Rejected without allocating an id if the owner is invalid or disabled.
    pub fn submit<F>(
        &self,
        owner: &Owner,
        mode: ExecutionMode,
        schedule: Schedule,
        action: F,
    ) -> Result<TaskHandle, ValidationError>
    where
        F: Fn(&TaskHandle) -> TaskResult + Send + Sync + 'static,
    {
        let action_type = std::any::type_name::<F>();
        self.submit_boxed(owner, mode, schedule, Box::new(action), action_type, None)
    }

    fn submit_boxed(
        &self,
        owner: &Owner,
        mode: ExecutionMode,
        schedule: Schedule,
        action: Action,
        action_type: &'static str,
        deadline: Option<DateTime<Local>>,
    ) -> Result<TaskHandle, ValidationError> {
        owner.validate()?;

        let id = TaskId::from_u64(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let next_run = self.current_tick().saturating_add(schedule.delay());
        let record = TaskRecord::new(
            id,
            owner.clone(),
            mode,
            schedule,
            next_run,
            action,
            action_type,
        );
        let record = Arc::new(match deadline {
            Some(deadline) => record.with_deadline(deadline),
            None => record,
        });

        trace!(task_id = %id, owner = %owner, ?mode, next_run, "task submitted");
        self.inner
            .submissions
            .push(Submission::Run(Arc::clone(&record)));
        Ok(TaskHandle::new(record, self.clone()))
    }

    /// One-shot task on the dispatcher thread
    pub fn run_sync<F>(&self, owner: &Owner, delay: u64, action: F) -> Result<TaskHandle, ValidationError>
    where
        F: Fn(&TaskHandle) -> TaskResult + Send + Sync + 'static,
    {
        self.submit(owner, ExecutionMode::Sync, Schedule::once(delay), action)
    }

    /// One-shot task on a worker thread
    pub fn run_async<F>(&self, owner: &Owner, delay: u64, action: F) -> Result<TaskHandle, ValidationError>
    where
        F: Fn(&TaskHandle) -> TaskResult + Send + Sync + 'static,
    {
        self.submit(owner, ExecutionMode::Async, Schedule::once(delay), action)
    }

    /// Repeating task on the dispatcher thread
    pub fn repeat_sync<F>(
        &self,
        owner: &Owner,
        delay: u64,
        period: u64,
        action: F,
    ) -> Result<TaskHandle, ValidationError>
    where
        F: Fn(&TaskHandle) -> TaskResult + Send + Sync + 'static,
    {
        self.submit(owner, ExecutionMode::Sync, Schedule::repeating(delay, period), action)
    }

    /// Repeating task on a worker thread
    pub fn repeat_async<F>(
        &self,
        owner: &Owner,
        delay: u64,
        period: u64,
        action: F,
    ) -> Result<TaskHandle, ValidationError>
    where
        F: Fn(&TaskHandle) -> TaskResult + Send + Sync + 'static,
    {
        self.submit(owner, ExecutionMode::Async, Schedule::repeating(delay, period), action)
    }

    /// One-shot task at the next local occurrence of `time_of_day` (`HH:MM`).
    ///
    /// The task is first examined at the tick estimated from the configured
    /// tick rate, but never runs before the wall-clock time itself: a host
    /// ticking faster than configured keeps restaging it one tick at a time
    /// until the time arrives.
    pub fn run_at<F>(
        &self,
        owner: &Owner,
        mode: ExecutionMode,
        time_of_day: &str,
        action: F,
    ) -> Result<TaskHandle, ValidationError>
    where
        F: Fn(&TaskHandle) -> TaskResult + Send + Sync + 'static,
    {
        let at = NaiveTime::parse_from_str(time_of_day.trim(), "%H:%M")
            .map_err(|_| ValidationError::InvalidTimeOfDay(time_of_day.to_string()))?;
        let now = Local::now();
        let wait = until_next(now.naive_local(), at);
        let delay = wait_to_ticks(wait, self.inner.config.ticks_per_second);
        self.submit_boxed(
            owner,
            mode,
            Schedule::once(delay),
            Box::new(action),
            std::any::type_name::<F>(),
            Some(now + wait),
        )
    }

    /// Run `f` once on the dispatcher thread at the next heartbeat and hand
    /// its value back to the caller.
    pub fn call_sync<T, F>(&self, owner: &Owner, f: F) -> Result<SyncCall<T>, ValidationError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = channel::bounded(1);
        let slot = Mutex::new(Some((f, tx)));
        let action = move |_: &TaskHandle| -> TaskResult {
            if let Some((f, tx)) = slot.lock().take() {
                // The caller may have dropped its SyncCall already.
                let _ = tx.send(f());
            }
            Ok(())
        };
        let handle = self.submit_boxed(
            owner,
            ExecutionMode::Sync,
            Schedule::once(0),
            Box::new(action),
            std::any::type_name::<F>(),
            None,
        )?;
        Ok(SyncCall::new(handle, rx))
    }

    // ========================================================================
    // Cancellation
    // ========================================================================

    /// Cancel one task. Unknown or finished ids are ignored.
    ///
    /// A running async invocation finishes; no further occurrence runs.
    pub fn cancel_task(&self, id: TaskId) {
        if let Some(record) = self.inner.runners.get(id) {
            record.cancel(&self.inner.runners);
        }
        self.inner.submissions.push(Submission::CancelId(id));
        if let Some(record) = self.inner.submissions.find_undrained(id) {
            record.cancel(&self.inner.runners);
        }
        debug!(task_id = %id, "task cancelled");
    }

    /// Cancel every task registered by `owner`, in every mode and state
    pub fn cancel_tasks(&self, owner: &Owner) {
        self.inner
            .submissions
            .push(Submission::CancelOwner(owner.clone()));

        let mut cancelled = 0usize;
        for record in self.inner.submissions.undrained_tasks() {
            if record.owner() == owner {
                record.cancel(&self.inner.runners);
                cancelled += 1;
            }
        }
        for record in self.inner.runners.snapshot_owner(owner) {
            record.cancel(&self.inner.runners);
            cancelled += 1;
        }
        debug!(owner = %owner, cancelled, "owner tasks cancelled");
    }

    /// Cancel every task
    pub fn cancel_all(&self) {
        self.inner.submissions.push(Submission::CancelAll);
        for record in self.inner.submissions.undrained_tasks() {
            record.cancel(&self.inner.runners);
        }
        for record in self.inner.runners.snapshot() {
            record.cancel(&self.inner.runners);
        }
        debug!("all tasks cancelled");
    }

    // ========================================================================
    // Queries
    // ========================================================================

    fn lookup(&self, id: TaskId) -> Option<Arc<TaskRecord>> {
        self.inner
            .submissions
            .find_undrained(id)
            .or_else(|| self.inner.runners.get(id))
    }

    /// Whether `id` will run again (not cancelled and not yet retired)
    pub fn is_queued(&self, id: TaskId) -> bool {
        self.lookup(id).is_some_and(|record| !record.is_cancelled())
    }

    /// Whether at least one worker is executing async task `id` right now.
    ///
    /// Always false for sync, cancelled, and unknown ids. Takes no lock.
    pub fn is_currently_running(&self, id: TaskId) -> bool {
        match self.inner.runners.get(id) {
            Some(record) if !record.is_sync() && !record.is_cancelled() => record.running() > 0,
            _ => false,
        }
    }

    /// Every live async invocation.
    ///
    /// Briefly takes each async task's worker-set lock; meant for shutdown
    /// and diagnostics rather than task bodies.
    pub fn active_workers(&self) -> Vec<WorkerHandle> {
        self.inner
            .runners
            .snapshot()
            .into_iter()
            .filter(|record| !record.is_sync())
            .flat_map(|record| record.workers().clone())
            .collect()
    }

    /// Every task that may still run, ordered by id
    pub fn pending_tasks(&self) -> Vec<TaskInfo> {
        let mut seen = HashSet::new();
        let mut tasks: Vec<TaskInfo> = self
            .inner
            .runners
            .snapshot()
            .into_iter()
            .chain(self.inner.submissions.undrained_tasks())
            .filter(|record| !record.is_cancelled())
            // One-shots that already ran linger in the table until retired.
            .filter(|record| record.interval().is_some() || !record.has_completed())
            .filter(|record| seen.insert(record.id()))
            .map(|record| record.info())
            .collect();
        tasks.sort_by_key(|info| info.id);
        tasks
    }

    /// Receiver for failures of async task bodies.
    ///
    /// The channel is bounded; when nobody drains it, new faults are logged
    /// and dropped.
    pub fn faults(&self) -> Receiver<SchedulerError> {
        self.inner.fault_rx.clone()
    }

    pub(crate) fn report_fault(&self, fault: SchedulerError) {
        error!("{}", fault);
        match self.inner.fault_tx.try_send(fault) {
            Ok(()) => {}
            Err(TrySendError::Full(fault)) => {
                warn!("Fault channel full, dropping: {}", fault);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("current_tick", &self.current_tick())
            .field("runners", &self.inner.runners.len())
            .finish()
    }
}

/// Time from `now` until the next occurrence of `at`.
///
/// A time equal to `now` refers to tomorrow.
fn until_next(now: NaiveDateTime, at: NaiveTime) -> chrono::Duration {
    let mut target = now.date().and_time(at);
    if target <= now {
        target += chrono::Duration::days(1);
    }
    target - now
}

/// Wall-clock wait converted to ticks, rounded up.
fn wait_to_ticks(wait: chrono::Duration, ticks_per_second: u32) -> u64 {
    let millis = u64::try_from(wait.num_milliseconds()).unwrap_or(0);
    (millis * u64::from(ticks_per_second)).div_ceil(1000)
}
