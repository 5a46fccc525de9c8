//! Task definitions for the task queue.
//!
//! A task is anything implementing [`Task`]: it carries an identity, a priority,
//! a dependency set fixed at construction, and its own lifecycle state.
//! [`BlockTask`] is the stock implementation wrapping a closure.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::{debug, error, warn};

/// Unique task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub usize);

impl TaskId {
    /// Get the inner value.
    #[inline]
    pub fn inner(&self) -> usize {
        self.0
    }
}

impl From<usize> for TaskId {
    fn from(val: usize) -> Self {
        Self(val)
    }
}

impl From<TaskId> for usize {
    fn from(val: TaskId) -> Self {
        val.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "Task({})", self.0)
    }
}

/// Thread-safe generator for unique task IDs.
#[derive(Debug, Default)]
pub struct TaskIdGenerator {
    next_id: AtomicUsize,
}

impl TaskIdGenerator {
    /// Create a new task ID generator.
    #[inline]
    pub fn new() -> Self {
        Self {
            next_id: AtomicUsize::new(0),
        }
    }

    /// Generate the next task ID.
    #[inline]
    pub fn generate(&self) -> TaskId {
        TaskId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

/// Task priority levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Default)]
pub enum TaskPriority {
    /// Runs only when nothing else is startable.
    VeryLow = 0,
    /// Low priority tasks.
    Low = 1,
    /// Normal priority (default).
    #[default]
    Normal = 2,
    /// High priority tasks.
    High = 3,
    /// Drained before every other level.
    VeryHigh = 4,
}

impl TaskPriority {
    /// Number of priority levels.
    pub const COUNT: usize = 5;

    /// All levels, highest first. This is the order in which pending buckets are scanned.
    pub const DESCENDING: [TaskPriority; Self::COUNT] = [
        TaskPriority::VeryHigh,
        TaskPriority::High,
        TaskPriority::Normal,
        TaskPriority::Low,
        TaskPriority::VeryLow,
    ];

    /// Bucket index of this level.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Task lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Registered and waiting to be dequeued.
    Pending,
    /// Dequeued and handed to the executor.
    Executing,
    /// Body ran to completion.
    Finished,
    /// Cancelled before or while running.
    Cancelled,
}

impl TaskState {
    /// Convert from u8 (for atomic storage).
    #[inline]
    pub fn from_u8(val: u8) -> Self {
        match val {
            0 => TaskState::Pending,
            1 => TaskState::Executing,
            2 => TaskState::Finished,
            3 => TaskState::Cancelled,
            _ => unreachable!("invalid task state {}", val),
        }
    }

    /// Convert to u8 (for atomic storage).
    #[inline]
    pub fn as_u8(&self) -> u8 {
        match self {
            TaskState::Pending => 0,
            TaskState::Executing => 1,
            TaskState::Finished => 2,
            TaskState::Cancelled => 3,
        }
    }

    /// Finished and Cancelled both resolve dependents.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Finished | TaskState::Cancelled)
    }
}

/// How a task reached its terminal state, as reported through the completion hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The body ran and no cancellation was requested.
    Finished,
    /// Cancellation was requested before the task reached its terminal state.
    Cancelled,
}

impl TaskOutcome {
    /// The terminal state matching this outcome.
    #[inline]
    pub fn state(self) -> TaskState {
        match self {
            TaskOutcome::Finished => TaskState::Finished,
            TaskOutcome::Cancelled => TaskState::Cancelled,
        }
    }
}

/// Shared handle to a schedulable task.
pub type TaskRef = Arc<dyn Task>;

/// Callback fired once when a task reaches a terminal state.
pub type CompletionHook = Box<dyn FnOnce(TaskOutcome) + Send>;

/// Observer of a task's terminal transition, registered by queues holding its dependents.
pub type TerminalListener = Box<dyn FnOnce() + Send>;

/// A schedulable unit of work.
///
/// Implementations own their state transitions and must report completion through
/// the registered hook exactly once: after [`Task::run`] returns the task is terminal,
/// and cancelling a `Pending` task makes it terminal immediately.
pub trait Task: Send + Sync {
    /// Task identity, unique within a queue.
    fn id(&self) -> TaskId;

    /// Human readable name for diagnostics.
    fn name(&self) -> &str {
        "task"
    }

    /// Scheduling priority.
    fn priority(&self) -> TaskPriority;

    /// Tasks that must be terminal before this one may start.
    fn dependencies(&self) -> &[TaskRef];

    /// Current lifecycle state.
    fn state(&self) -> TaskState;

    /// Whether cancellation has been requested.
    fn is_cancelled(&self) -> bool;

    /// Request cancellation.
    ///
    /// A `Pending` task becomes `Cancelled` and fires its hook on the calling thread.
    /// An `Executing` task only has its flag raised; the body decides when to stop.
    fn cancel(&self);

    /// Atomically move `Pending -> Executing`. Returns false if the task is no longer
    /// pending or cancellation was requested.
    fn mark_executing(&self) -> bool;

    /// Drive an `Executing` task to its terminal state and fire the completion hook.
    fn run(&self);

    /// Register the completion hook.
    ///
    /// Returns false and drops `hook` if one is already installed: a task reports to a
    /// single owner at a time.
    fn set_completion_hook(
        &self,
        hook: CompletionHook,
    ) -> bool;

    /// Unregister the completion hook. Returns true if a hook was removed before it fired.
    fn clear_completion_hook(&self) -> bool;

    /// Call `listener` once this task is terminal, after the completion hook.
    ///
    /// Returns false and drops `listener` if the task is terminal already. Listeners may run
    /// while the owner's lock is held and must not block.
    fn on_terminal(
        &self,
        listener: TerminalListener,
    ) -> bool;

    /// Whether any dependency is still non-terminal.
    fn has_unfinished_dependency(&self) -> bool {
        self.dependencies()
            .iter()
            .any(|dependency| !dependency.state().is_terminal())
    }

    /// Pending, not cancelled, and every dependency terminal.
    fn is_startable(&self) -> bool {
        self.state() == TaskState::Pending
            && !self.is_cancelled()
            && !self.has_unfinished_dependency()
    }
}

impl fmt::Debug for dyn Task {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("priority", &self.priority())
            .field("state", &self.state())
            .finish()
    }
}

/// View of the running task handed to a [`BlockTask`] body.
#[derive(Debug)]
pub struct TaskContext<'a> {
    id: TaskId,
    cancelled: &'a AtomicBool,
}

impl TaskContext<'_> {
    /// ID of the running task.
    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Whether cancellation has been requested. Long bodies should poll this and return early.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

type TaskBody = Box<dyn FnOnce(&TaskContext<'_>) + Send>;

/// Task backed by a closure.
pub struct BlockTask {
    /// Unique task ID.
    id: TaskId,
    /// Task name for debugging.
    name: String,
    /// Priority of the task.
    priority: TaskPriority,
    /// Tasks that must be terminal first.
    dependencies: SmallVec<[TaskRef; 4]>,
    /// Current state (atomic for thread-safe access).
    state: AtomicU8,
    /// Cooperative cancellation flag.
    cancelled: AtomicBool,
    /// The actual work to execute.
    body: Mutex<Option<TaskBody>>,
    completion_hook: Mutex<Option<CompletionHook>>,
    terminal_listeners: Mutex<Vec<TerminalListener>>,
    /// Execution duration (for statistics).
    exec_duration: Mutex<Option<Duration>>,
}

impl fmt::Debug for BlockTask {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let dependencies: Vec<TaskId> = self.dependencies.iter().map(|d| d.id()).collect();
        f.debug_struct("BlockTask")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &Task::state(self))
            .field("priority", &self.priority)
            .field("dependencies", &dependencies)
            .field("cancelled", &Task::is_cancelled(self))
            .finish()
    }
}

impl BlockTask {
    /// Create a task with the given ID, priority and body, without dependencies.
    pub fn new<F>(
        id: TaskId,
        priority: TaskPriority,
        body: F,
    ) -> Self
    where
        F: FnOnce(&TaskContext<'_>) + Send + 'static,
    {
        TaskBuilder::new().priority(priority).build(id, body)
    }

    /// Create a task with an empty body (for testing).
    pub fn simple(
        id: TaskId,
        priority: TaskPriority,
    ) -> Self {
        Self::new(id, priority, |_| {})
    }

    /// Wrap into a shared [`TaskRef`].
    #[inline]
    pub fn into_ref(self) -> TaskRef {
        Arc::new(self)
    }

    /// Wall time spent in the body, once it has run.
    #[inline]
    pub fn exec_duration(&self) -> Option<Duration> {
        *self.exec_duration.lock()
    }

    #[inline]
    fn transition(
        &self,
        from: TaskState,
        to: TaskState,
    ) -> bool {
        self.state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn fire_completion(
        &self,
        outcome: TaskOutcome,
    ) {
        // Take the hook out first so it never runs under the slot lock.
        let hook = self.completion_hook.lock().take();
        if let Some(hook) = hook {
            hook(outcome);
        }

        // The terminal state is already stored, so no listener can be added after this take.
        let listeners = std::mem::take(&mut *self.terminal_listeners.lock());
        for listener in listeners {
            listener();
        }
    }
}

impl Task for BlockTask {
    #[inline]
    fn id(&self) -> TaskId {
        self.id
    }

    #[inline]
    fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    fn priority(&self) -> TaskPriority {
        self.priority
    }

    #[inline]
    fn dependencies(&self) -> &[TaskRef] {
        &self.dependencies
    }

    #[inline]
    fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::SeqCst))
    }

    #[inline]
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if self.transition(TaskState::Pending, TaskState::Cancelled) {
            debug!(task = %self.id, "cancelled while pending");
            self.fire_completion(TaskOutcome::Cancelled);
        }
    }

    fn mark_executing(&self) -> bool {
        !self.is_cancelled() && self.transition(TaskState::Pending, TaskState::Executing)
    }

    fn run(&self) {
        let state = Task::state(self);
        if state != TaskState::Executing {
            warn!(task = %self.id, ?state, "run requested for a task that was not dequeued");
            return;
        }

        if self.is_cancelled() {
            debug!(task = %self.id, "cancelled before its body started");
        } else {
            let body = self.body.lock().take();
            if let Some(body) = body {
                let ctx = TaskContext {
                    id: self.id,
                    cancelled: &self.cancelled,
                };
                let start = Instant::now();
                if panic::catch_unwind(AssertUnwindSafe(|| body(&ctx))).is_err() {
                    error!(task = %self.id, name = %self.name, "task body panicked");
                }
                *self.exec_duration.lock() = Some(start.elapsed());
            }
        }

        let outcome = if self.is_cancelled() {
            TaskOutcome::Cancelled
        } else {
            TaskOutcome::Finished
        };
        self.state.store(outcome.state().as_u8(), Ordering::SeqCst);
        self.fire_completion(outcome);
    }

    fn set_completion_hook(
        &self,
        hook: CompletionHook,
    ) -> bool {
        let mut slot = self.completion_hook.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(hook);
        true
    }

    fn clear_completion_hook(&self) -> bool {
        self.completion_hook.lock().take().is_some()
    }

    fn on_terminal(
        &self,
        listener: TerminalListener,
    ) -> bool {
        let mut listeners = self.terminal_listeners.lock();
        if Task::state(self).is_terminal() {
            return false;
        }
        listeners.push(listener);
        true
    }
}

/// Task builder for constructing tasks with various options.
#[derive(Default)]
pub struct TaskBuilder {
    name: Option<String>,
    priority: TaskPriority,
    dependencies: SmallVec<[TaskRef; 4]>,
}

impl fmt::Debug for TaskBuilder {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("TaskBuilder")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("dependencies", &self.dependencies.len())
            .finish()
    }
}

impl TaskBuilder {
    /// Create a new task builder.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the task name.
    #[inline]
    pub fn name(
        mut self,
        name: impl Into<String>,
    ) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the task priority.
    #[inline]
    pub fn priority(
        mut self,
        priority: TaskPriority,
    ) -> Self {
        self.priority = priority;
        self
    }

    /// Add a dependency. The dependency set is frozen once the task is built.
    #[inline]
    pub fn depends_on(
        mut self,
        dependency: TaskRef,
    ) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// Build the task with the given ID and body.
    pub fn build<F>(
        self,
        id: TaskId,
        body: F,
    ) -> BlockTask
    where
        F: FnOnce(&TaskContext<'_>) + Send + 'static,
    {
        let name = self.name.unwrap_or_else(|| id.to_string());

        BlockTask {
            id,
            name,
            priority: self.priority,
            dependencies: self.dependencies,
            state: AtomicU8::new(TaskState::Pending.as_u8()),
            cancelled: AtomicBool::new(false),
            body: Mutex::new(Some(Box::new(body))),
            completion_hook: Mutex::new(None),
            terminal_listeners: Mutex::new(Vec::new()),
            exec_duration: Mutex::new(None),
        }
    }
}
