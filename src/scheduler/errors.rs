//! Scheduler errors

use thiserror::Error;

use super::task::{TaskId, TaskOutcome, TaskState};

/// Scheduler result
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Recoverable errors reported to callers of the queue and its configuration layer.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Max concurrent task count must be positive, got {0}")]
    InvalidConcurrency(usize),

    #[error("Worker pool needs at least one thread")]
    InvalidWorkerCount,

    #[error("{0} is already tracked by this queue")]
    DuplicateTask(TaskId),

    #[error("{0} is already held by another queue")]
    AlreadyQueued(TaskId),

    #[error("{id} cannot be submitted in state {state:?}")]
    TaskNotPending {
        /// The rejected task
        id: TaskId,
        /// Its state at submission time
        state: TaskState,
    },

    #[error("wait_until_finished and on_all_finished are mutually exclusive")]
    ConflictingCompletionModes,

    #[error("Failed to spawn worker thread: {0}")]
    WorkerSpawn(#[source] std::io::Error),

    #[error("IO error: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),
}

/// Fatal misuse of the completion protocol.
///
/// Never returned: the task manager panics with this message, since continuing would
/// risk a task running twice or a waiter blocking forever.
#[derive(Debug, Error)]
pub enum ProtocolViolation {
    #[error("protocol violation: completion ({outcome:?}) reported for untracked {id}")]
    UntrackedCompletion {
        /// Task that reported completion
        id: TaskId,
        /// What it reported
        outcome: TaskOutcome,
    },
}
