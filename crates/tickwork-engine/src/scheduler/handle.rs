//! Handles returned to task owners

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, RecvTimeoutError, TryRecvError};

use crate::error::SyncCallError;
use crate::owner::Owner;
use crate::scheduler::task::{ExecutionMode, TaskId, TaskRecord, TaskState};
use crate::scheduler::Scheduler;

/// Handle to a submitted task.
///
/// Returned by every submission call, and passed to the task's own action on
/// each invocation so the body can inspect or cancel itself.
#[derive(Clone)]
pub struct TaskHandle {
    record: Arc<TaskRecord>,
    scheduler: Scheduler,
}

impl TaskHandle {
    pub(crate) fn new(record: Arc<TaskRecord>, scheduler: Scheduler) -> Self {
        Self { record, scheduler }
    }

    /// Task id
    pub fn id(&self) -> TaskId {
        self.record.id()
    }

    /// Owning module
    pub fn owner(&self) -> &Owner {
        self.record.owner()
    }

    /// Execution mode
    pub fn mode(&self) -> ExecutionMode {
        self.record.mode()
    }

    /// True if the task runs on the dispatcher thread
    pub fn is_sync(&self) -> bool {
        self.record.is_sync()
    }

    /// Current lifecycle state
    pub fn state(&self) -> TaskState {
        self.record.state()
    }

    /// Tick of the next eligible run
    pub fn next_run(&self) -> u64 {
        self.record.next_run()
    }

    /// Cancel this task. A running async invocation is allowed to finish.
    pub fn cancel(&self) {
        self.scheduler.cancel_task(self.id());
    }

    /// Whether the task is waiting to run again
    pub fn is_queued(&self) -> bool {
        self.scheduler.is_queued(self.id())
    }

    /// Whether a worker is executing this (async) task right now
    pub fn is_running(&self) -> bool {
        self.scheduler.is_currently_running(self.id())
    }

    /// The scheduler the task belongs to
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub(crate) fn record(&self) -> &Arc<TaskRecord> {
        &self.record
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id())
            .field("owner", &self.owner().name())
            .field("mode", &self.mode())
            .field("state", &self.state())
            .finish()
    }
}

const CANCEL_POLL: Duration = Duration::from_millis(10);

/// Pending result of [`Scheduler::call_sync`].
pub struct SyncCall<T> {
    handle: TaskHandle,
    rx: Receiver<T>,
}

impl<T> SyncCall<T> {
    pub(crate) fn new(handle: TaskHandle, rx: Receiver<T>) -> Self {
        Self { handle, rx }
    }

    /// Handle of the underlying one-shot sync task
    pub fn handle(&self) -> &TaskHandle {
        &self.handle
    }

    /// Take the value if it has already been produced
    pub fn try_get(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Whether the call will never produce a value
    pub fn is_cancelled(&self) -> bool {
        self.rx.is_empty() && self.handle.record().is_cancelled()
    }

    /// Block until the value is produced or the task is cancelled
    pub fn wait(self) -> Result<T, SyncCallError> {
        loop {
            match self.poll(CANCEL_POLL) {
                Err(SyncCallError::Timeout) => continue,
                other => return other,
            }
        }
    }

    /// Block for at most `timeout`
    pub fn wait_timeout(&self, timeout: Duration) -> Result<T, SyncCallError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return match self.rx.try_recv() {
                    Ok(value) => Ok(value),
                    Err(TryRecvError::Disconnected) => Err(SyncCallError::Cancelled),
                    Err(TryRecvError::Empty) if self.handle.record().is_cancelled() => {
                        Err(SyncCallError::Cancelled)
                    }
                    Err(TryRecvError::Empty) => Err(SyncCallError::Timeout),
                };
            }
            match self.poll(remaining.min(CANCEL_POLL)) {
                Err(SyncCallError::Timeout) => continue,
                other => return other,
            }
        }
    }

    /// One bounded wait. The sender lives inside the task's action and may
    /// outlive cancellation for a while, so cancellation is also checked on
    /// the record.
    fn poll(&self, timeout: Duration) -> Result<T, SyncCallError> {
        match self.rx.recv_timeout(timeout) {
            Ok(value) => Ok(value),
            Err(RecvTimeoutError::Disconnected) => Err(SyncCallError::Cancelled),
            Err(RecvTimeoutError::Timeout) if self.handle.record().is_cancelled() => {
                self.rx.try_recv().map_err(|_| SyncCallError::Cancelled)
            }
            Err(RecvTimeoutError::Timeout) => Err(SyncCallError::Timeout),
        }
    }
}

impl<T> fmt::Debug for SyncCall<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncCall")
            .field("handle", &self.handle)
            .finish()
    }
}
