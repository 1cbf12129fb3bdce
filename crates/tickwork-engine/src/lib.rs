//! Tickwork Engine
//!
//! A tick-driven task scheduler for hosts that advance in discrete steps:
//! - **Owners** register one-shot or repeating work (`owner` module)
//! - **Sync** tasks run inline on the dispatcher thread, **async** tasks on a
//!   cached worker pool (`scheduler` module)
//! - Cancellation by id, by owner, or globally, from any thread
//!
//! # Example
//!
//! ```rust,ignore
//! use tickwork_engine::{Owner, Scheduler, SchedulerConfig};
//!
//! let (scheduler, mut dispatcher) = Scheduler::start(SchedulerConfig::default());
//! let owner = Owner::new("physics");
//!
//! scheduler.repeat_sync(&owner, 0, 5, |_| {
//!     // runs every 5 ticks on the dispatcher thread
//!     Ok(())
//! })?;
//!
//! for tick in 1..=100 {
//!     dispatcher.heartbeat(tick);
//! }
//! scheduler.shutdown();
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Scheduler configuration loaded from TOML
pub mod config;

/// Error types
pub mod error;

/// Task owners
pub mod owner;

/// The scheduling engine
pub mod scheduler;

pub use config::SchedulerConfig;
pub use error::{ConfigError, SchedulerError, SyncCallError, TaskFailure, ValidationError};
pub use owner::Owner;
pub use scheduler::{
    ActivityEntry, Dispatcher, DriverHandle, ExecutionMode, RecentActivityLog, Schedule,
    Scheduler, ShutdownReport, SyncCall, TaskHandle, TaskId, TaskInfo, TaskResult, TaskState,
    WorkerHandle,
};
