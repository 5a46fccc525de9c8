//! Priority and dependency aware task scheduling
//!
//! Layers, leaves first:
//!
//! - [`task`] - the [`Task`] contract and the closure-backed [`BlockTask`]
//! - [`registry`] - pending tasks bucketed by priority
//! - [`executing`] - in-flight tasks
//! - [`manager`] - registry + executing set behind one lock; the scheduling decisions
//! - [`queue`] - the [`TaskQueue`] that pumps ready tasks into an [`Executor`]
//! - [`executor`] - executor seam, a worker pool and the shared default pool

pub mod errors;
pub mod executing;
pub mod executor;
pub mod manager;
pub mod queue;
pub mod registry;
pub mod task;

pub use errors::{ProtocolViolation, SchedulerError, SchedulerResult};
pub use executing::ExecutingSet;
pub use executor::{default_workers, shared_pool, Executor, Job, WorkerPool};
pub use manager::{TaskManager, TaskManagerDelegate};
pub use queue::{AllFinishedCallback, QueueStats, TaskQueue};
pub use registry::TaskRegistry;
pub use task::{
    BlockTask, CompletionHook, Task, TaskBuilder, TaskContext, TaskId, TaskIdGenerator,
    TaskOutcome, TaskPriority, TaskRef, TaskState, TerminalListener,
};
