//! Error types for task registration, execution, and configuration.

use crate::scheduler::TaskId;

/// Reasons a submission is rejected before a task id is allocated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Owner handle carries no usable identity
    #[error("Invalid owner: {0}")]
    InvalidOwner(String),

    /// Owner attempted to register a task while disabled
    #[error("Owner {0} attempted to register a task while disabled")]
    OwnerDisabled(String),

    /// Wall-clock time could not be parsed as `HH:MM`
    #[error("Invalid time of day '{0}': expected HH:MM")]
    InvalidTimeOfDay(String),
}

/// How a task body failed.
#[derive(Debug, thiserror::Error)]
pub enum TaskFailure {
    /// The body returned an error
    #[error("{0:#}")]
    Error(anyhow::Error),

    /// The body panicked
    #[error("panicked: {0}")]
    Panic(String),
}

impl TaskFailure {
    /// Build a failure from a caught panic payload.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        TaskFailure::Panic(message)
    }
}

/// Errors produced by the scheduling engine.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// A sync task body failed on the dispatcher thread
    #[error("Task {task_id} for {owner} generated an exception: {failure}")]
    SyncExecution {
        /// Failing task
        task_id: TaskId,
        /// Name of the owning module
        owner: String,
        /// What went wrong
        #[source]
        failure: TaskFailure,
    },

    /// An async task body failed on a worker thread
    #[error("Owner {owner} generated an exception while executing task {task_id}: {failure}")]
    AsyncExecution {
        /// Failing task
        task_id: TaskId,
        /// Name of the owning module
        owner: String,
        /// What went wrong
        #[source]
        failure: TaskFailure,
    },

    /// The worker pool could not start a thread for an async invocation
    #[error("Unable to start a worker for task {task_id} of {owner}: {source}")]
    WorkerSpawn {
        /// Task whose occurrence was skipped
        task_id: TaskId,
        /// Name of the owning module
        owner: String,
        /// Spawn failure
        #[source]
        source: std::io::Error,
    },

    /// A completing worker could not find its own registration
    #[error("Unable to remove worker {thread} on task {task_id} for {owner}")]
    InvariantViolation {
        /// Task whose worker set was corrupted
        task_id: TaskId,
        /// Name of the owning module
        owner: String,
        /// Name (or id) of the worker thread
        thread: String,
    },
}

/// Errors that can occur while loading a [`crate::SchedulerConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse error
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Errors returned while waiting on a [`crate::scheduler::SyncCall`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SyncCallError {
    /// The task was cancelled or its body failed before producing a value
    #[error("sync call was cancelled before producing a value")]
    Cancelled,

    /// No value arrived within the given timeout
    #[error("timed out waiting for sync call")]
    Timeout,
}
