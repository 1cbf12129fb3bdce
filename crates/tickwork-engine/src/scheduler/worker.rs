//! Async execution entry/exit and worker bookkeeping

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use tracing::{error, trace};

use crate::error::{SchedulerError, TaskFailure};
use crate::owner::Owner;
use crate::scheduler::runners::RunnerTable;
use crate::scheduler::task::{TaskId, TaskRecord};
use crate::scheduler::TaskHandle;

/// One live invocation of an async task's body.
///
/// Purely observational: holding a handle does not keep the task alive.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    thread_id: ThreadId,
    thread_name: Option<String>,
    task_id: TaskId,
    owner: Owner,
}

impl WorkerHandle {
    fn current(task_id: TaskId, owner: Owner) -> Self {
        let thread = thread::current();
        Self {
            thread_id: thread.id(),
            thread_name: thread.name().map(str::to_string),
            task_id,
            owner,
        }
    }

    /// Identity of the executing thread
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Name of the executing thread, if it has one
    pub fn thread_name(&self) -> Option<&str> {
        self.thread_name.as_deref()
    }

    /// Task being executed
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Owner of the task being executed
    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    fn describe_thread(&self) -> String {
        match &self.thread_name {
            Some(name) => name.clone(),
            None => format!("{:?}", self.thread_id),
        }
    }
}

/// Run one invocation of an async task on the calling worker thread.
///
/// Registration and deregistration both happen under the task's worker-set
/// lock; the body runs outside it. Cleanup runs whatever the body does. The
/// last worker to leave a terminal task removes it from the runner table.
pub(crate) fn run_async(
    record: &Arc<TaskRecord>,
    runners: &RunnerTable,
    handle: &TaskHandle,
) -> Result<(), SchedulerError> {
    let me = WorkerHandle::current(record.id(), record.owner().clone());
    {
        let mut workers = record.workers();
        if record.is_cancelled() {
            trace!(task_id = %record.id(), "skipping cancelled async task");
            return Ok(());
        }
        workers.push(me.clone());
        record.sync_running(&workers);
    }

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| record.invoke(handle)));

    let removed = {
        let mut workers = record.workers();
        let position = workers
            .iter()
            .position(|worker| worker.thread_id == me.thread_id);
        if let Some(index) = position {
            workers.swap_remove(index);
        }
        record.sync_running(&workers);
        record.mark_completed();
        if record.is_terminal() && workers.is_empty() {
            runners.remove(record.id());
        }
        position.is_some()
    };

    let failure = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(err)) => Some(TaskFailure::Error(err)),
        Err(payload) => Some(TaskFailure::from_panic(payload)),
    };

    if !removed {
        if let Some(failure) = &failure {
            error!(task_id = %record.id(), owner = %record.owner(), "{}", failure);
        }
        let violation = SchedulerError::InvariantViolation {
            task_id: record.id(),
            owner: record.owner().name().to_string(),
            thread: me.describe_thread(),
        };
        error!(task_id = %record.id(), owner = %record.owner(), "{}", violation);
        panic!("{}", violation);
    }

    match failure {
        None => Ok(()),
        Some(failure) => Err(SchedulerError::AsyncExecution {
            task_id: record.id(),
            owner: record.owner().name().to_string(),
            failure,
        }),
    }
}
