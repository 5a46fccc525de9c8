//! opqueue
//!
//! A concurrent task queue built on plain threads and locks. It runs many discrete
//! tasks while honoring:
//!
//! - priority ordering among the tasks that can start right now
//! - dependencies between tasks (a DAG; cycles are not detected)
//! - a global cap on simultaneously executing tasks
//! - cooperative cancellation of queued and running tasks
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use opqueue::{TaskBuilder, TaskId, TaskPriority, TaskQueue, TaskRef, Result};
//!
//! fn main() -> Result<()> {
//!     let queue = TaskQueue::new(3)?;
//!
//!     let fetch: TaskRef = Arc::new(
//!         TaskBuilder::new()
//!             .name("fetch")
//!             .build(TaskId(0), |_| println!("fetching")),
//!     );
//!     let render: TaskRef = Arc::new(
//!         TaskBuilder::new()
//!             .name("render")
//!             .priority(TaskPriority::High)
//!             .depends_on(fetch.clone())
//!             .build(TaskId(1), |ctx| {
//!                 if !ctx.is_cancelled() {
//!                     println!("rendering");
//!                 }
//!             }),
//!     );
//!
//!     queue.add_tasks_and_wait(vec![fetch, render])?;
//!     Ok(())
//! }
//! ```

#![warn(rust_2018_idioms)]

pub mod scheduler;
pub mod util;

// Re-exports
pub use anyhow::{Context, Result};
pub use scheduler::{
    BlockTask, Executor, QueueStats, SchedulerError, SchedulerResult, Task, TaskBuilder,
    TaskContext, TaskId, TaskOutcome, TaskPriority, TaskQueue, TaskRef, TaskState, WorkerPool,
};
pub use util::config::{ConcurrencyLimit, QueueConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
