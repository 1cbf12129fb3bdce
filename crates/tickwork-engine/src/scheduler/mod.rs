//! Tick-driven task scheduler
//!
//! Producers on any thread submit and cancel work through a [`Scheduler`]
//! handle. A single [`Dispatcher`] drains those submissions once per tick,
//! runs sync tasks inline and hands async tasks to a cached worker pool.

mod activity;
mod channel;
mod dispatcher;
mod driver;
mod handle;
mod lifecycle;
mod pending;
mod pool;
mod runners;
#[allow(clippy::module_inception)]
mod scheduler;
mod task;
mod worker;

pub use activity::{ActivityEntry, RecentActivityLog};
pub use dispatcher::Dispatcher;
pub use driver::DriverHandle;
pub use handle::{SyncCall, TaskHandle};
pub use lifecycle::ShutdownReport;
pub use pool::WorkerPool;
pub use scheduler::{Scheduler, SYSTEM_OWNER};
pub use task::{ExecutionMode, Schedule, TaskId, TaskInfo, TaskResult, TaskState};
pub use worker::WorkerHandle;
