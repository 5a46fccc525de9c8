//! Task manager: the scheduling core behind a [`TaskQueue`](super::TaskQueue).
//!
//! Composes the pending [`TaskRegistry`] and the [`ExecutingSet`] behind one mutex. Every
//! mutation (append, dequeue, cancel-all, completion) is a single critical section of
//! bounded length; task bodies and completion callbacks never run while it is held.

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use super::errors::{ProtocolViolation, SchedulerError, SchedulerResult};
use super::executing::ExecutingSet;
use super::registry::TaskRegistry;
use super::task::{TaskId, TaskOutcome, TaskPriority, TaskRef, TaskState};

/// Receives completion notifications from a [`TaskManager`].
pub trait TaskManagerDelegate: Send + Sync {
    /// Called once per task after it reached a terminal state and left the manager.
    ///
    /// `all_finished` is true if, at that moment, nothing was pending or executing.
    fn task_did_complete(
        &self,
        id: TaskId,
        outcome: TaskOutcome,
        all_finished: bool,
    );

    /// A dependency that this manager does not track became terminal, so a pending task may
    /// have become startable.
    ///
    /// Runs on whatever thread finished or cancelled the dependency, possibly under another
    /// manager's lock: implementations must not block or call back into a manager.
    fn dependency_resolved(
        &self,
        _dependency: TaskId,
    ) {
    }
}

#[derive(Debug, Default)]
struct ManagerState {
    registry: TaskRegistry,
    executing: ExecutingSet,
}

impl ManagerState {
    #[inline]
    fn all_finished(&self) -> bool {
        self.registry.is_empty() && self.executing.is_empty()
    }
}

struct ManagerShared {
    state: Mutex<ManagerState>,
    max_concurrent: usize,
    delegate: RwLock<Option<Weak<dyn TaskManagerDelegate>>>,
}

impl ManagerShared {
    fn on_task_completed(
        &self,
        id: TaskId,
        priority: TaskPriority,
        outcome: TaskOutcome,
    ) {
        let (tracked, all_finished) = {
            let mut state = self.state.lock();
            // A task cancelled while still pending is removed from its bucket here.
            let tracked = state.executing.remove(id).is_some()
                || (outcome == TaskOutcome::Cancelled
                    && state.registry.remove(id, priority).is_some());
            (tracked, state.all_finished())
        };

        if !tracked {
            panic!("{}", ProtocolViolation::UntrackedCompletion { id, outcome });
        }

        debug!(task = %id, ?outcome, all_finished, "task completed");
        self.notify_delegate(id, outcome, all_finished);
    }

    fn notify_delegate(
        &self,
        id: TaskId,
        outcome: TaskOutcome,
        all_finished: bool,
    ) {
        if let Some(delegate) = self.delegate() {
            delegate.task_did_complete(id, outcome, all_finished);
        }
    }

    fn notify_dependency_resolved(
        &self,
        dependency: TaskId,
    ) {
        trace!(%dependency, "untracked dependency resolved");
        if let Some(delegate) = self.delegate() {
            delegate.dependency_resolved(dependency);
        }
    }

    fn delegate(&self) -> Option<Arc<dyn TaskManagerDelegate>> {
        self.delegate.read().as_ref().and_then(Weak::upgrade)
    }
}

/// Thread-safe manager that dequeues the first ready task by priority, dependencies and
/// the concurrency cap.
pub struct TaskManager {
    shared: Arc<ManagerShared>,
}

impl std::fmt::Debug for TaskManager {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("TaskManager")
            .field("max_concurrent", &self.shared.max_concurrent)
            .field("pending", &state.registry.len())
            .field("executing", &state.executing.len())
            .finish()
    }
}

impl TaskManager {
    /// Create a manager allowing at most `max_concurrent` executing tasks.
    /// `usize::MAX` means unbounded.
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            shared: Arc::new(ManagerShared {
                state: Mutex::new(ManagerState::default()),
                max_concurrent,
                delegate: RwLock::new(None),
            }),
        }
    }

    /// Set the delegate notified on every completion. Held weakly.
    pub fn set_delegate(
        &self,
        delegate: Weak<dyn TaskManagerDelegate>,
    ) {
        *self.shared.delegate.write() = Some(delegate);
    }

    /// The concurrency cap.
    #[inline]
    pub fn max_concurrent(&self) -> usize {
        self.shared.max_concurrent
    }

    /// Register `task` for scheduling and attach the completion hook.
    ///
    /// Fails if a task with the same ID is already tracked, if the task is held by another
    /// owner, or if it is not pending.
    ///
    /// Dependencies this manager does not track get a listener that reports their terminal
    /// transition through [`TaskManagerDelegate::dependency_resolved`].
    pub fn append(
        &self,
        task: TaskRef,
    ) -> SchedulerResult<()> {
        let id = task.id();
        let priority = task.priority();

        let mut state = self.shared.state.lock();
        if state.registry.contains(id) || state.executing.contains(id) {
            warn!(task = %id, "rejected duplicate submission");
            return Err(SchedulerError::DuplicateTask(id));
        }
        let current = task.state();
        if current != TaskState::Pending {
            warn!(task = %id, state = ?current, "rejected non-pending submission");
            return Err(SchedulerError::TaskNotPending { id, state: current });
        }

        let shared = Arc::downgrade(&self.shared);
        let installed = task.set_completion_hook(Box::new(move |outcome| {
            if let Some(shared) = shared.upgrade() {
                shared.on_task_completed(id, priority, outcome);
            }
        }));
        if !installed {
            warn!(task = %id, "rejected task held by another queue");
            return Err(SchedulerError::AlreadyQueued(id));
        }

        // A cancel that raced the check above may have found no hook. If we get the
        // hook back nobody will report the task; otherwise its hook is waiting on this
        // lock and expects the task to be registered.
        let current = task.state();
        if current != TaskState::Pending && task.clear_completion_hook() {
            return Err(SchedulerError::TaskNotPending { id, state: current });
        }

        for dependency in task.dependencies() {
            let dependency_id = dependency.id();
            if state.registry.contains(dependency_id) || state.executing.contains(dependency_id) {
                continue;
            }
            let shared = Arc::downgrade(&self.shared);
            dependency.on_terminal(Box::new(move || {
                if let Some(shared) = shared.upgrade() {
                    shared.notify_dependency_resolved(dependency_id);
                }
            }));
        }

        state.registry.append(task);
        debug!(task = %id, ?priority, pending = state.registry.len(), "task appended");
        Ok(())
    }

    /// Whether a startable task exists and the cap leaves room for it.
    pub fn has_next_ready(&self) -> bool {
        let state = self.shared.state.lock();
        state.executing.len() < self.shared.max_concurrent && state.registry.has_ready()
    }

    /// Dequeue the first ready task, mark it executing and track it, all under one lock.
    ///
    /// Returns `None` when the cap is reached or nothing is startable.
    pub fn dequeue_first_ready_and_mark_executing(&self) -> Option<TaskRef> {
        let mut state = self.shared.state.lock();
        if state.executing.len() >= self.shared.max_concurrent {
            return None;
        }

        let task = state
            .registry
            .dequeue_first_ready_by(|task| task.is_startable() && task.mark_executing())?;
        let added = state.executing.add(task.clone());
        debug_assert!(added, "{} dequeued while already executing", task.id());
        debug!(
            task = %task.id(),
            priority = ?task.priority(),
            executing = state.executing.len(),
            "task dequeued"
        );
        Some(task)
    }

    /// Report that a task reached a terminal state.
    ///
    /// Normally invoked by the completion hook installed in [`append`](Self::append).
    ///
    /// # Panics
    ///
    /// If the task is neither executing nor (for a cancellation) still pending: the
    /// report is a duplicate or comes from a task this manager never dequeued.
    pub fn on_task_completed(
        &self,
        id: TaskId,
        priority: TaskPriority,
        outcome: TaskOutcome,
    ) {
        self.shared.on_task_completed(id, priority, outcome);
    }

    /// Cancel every pending task. Executing tasks are left alone.
    ///
    /// Returns the number of tasks cancelled by this call.
    pub fn cancel_all_operations(&self) -> usize {
        let (cancelled, all_finished) = {
            let mut state = self.shared.state.lock();
            let cancelled = state.registry.cancel_all();
            (cancelled, state.all_finished())
        };
        debug!(cancelled = cancelled.len(), "cancelled pending tasks");

        let count = cancelled.len();
        for (index, task) in cancelled.into_iter().enumerate() {
            let last = index + 1 == count;
            self.shared
                .notify_delegate(task.id(), TaskOutcome::Cancelled, all_finished && last);
        }
        count
    }

    /// Number of pending tasks.
    pub fn pending_count(&self) -> usize {
        self.shared.state.lock().registry.len()
    }

    /// Number of executing tasks.
    pub fn executing_count(&self) -> usize {
        self.shared.state.lock().executing.len()
    }

    /// Same as [`pending_count`](Self::pending_count); executing tasks are not counted.
    #[inline]
    pub fn operation_count(&self) -> usize {
        self.pending_count()
    }

    /// Nothing pending and nothing executing.
    pub fn are_all_tasks_finished(&self) -> bool {
        self.shared.state.lock().all_finished()
    }

    /// Alias of [`are_all_tasks_finished`](Self::are_all_tasks_finished).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.are_all_tasks_finished()
    }

    /// Pending tasks ordered by priority descendingly.
    pub fn tasks(&self) -> Vec<TaskRef> {
        self.shared.state.lock().registry.tasks()
    }

    /// Executing tasks, oldest first.
    pub fn executing(&self) -> Vec<TaskRef> {
        self.shared.state.lock().executing.tasks()
    }
}
