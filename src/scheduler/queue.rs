//! Task queue: pumps ready tasks from the manager into an executor.
//!
//! There is no scheduler thread. A pump pass runs right after every submission and right
//! after every completion, and drains ready tasks until the cap is reached or nothing is
//! startable.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use super::errors::{SchedulerError, SchedulerResult};
use super::executor::{shared_pool, Executor, WorkerPool};
use super::manager::{TaskManager, TaskManagerDelegate};
use super::task::{TaskId, TaskOutcome, TaskRef};
use crate::util::config::QueueConfig;

/// Callback fired once the queue next becomes idle.
pub type AllFinishedCallback = Box<dyn FnOnce() + Send>;

/// Queue statistics.
#[derive(Debug, Default)]
pub struct QueueStats {
    /// Total tasks accepted.
    pub tasks_added: AtomicUsize,
    /// Total tasks handed to the executor.
    pub tasks_started: AtomicUsize,
    /// Total tasks that finished normally.
    pub tasks_finished: AtomicUsize,
    /// Total tasks that ended cancelled, pending or running.
    pub tasks_cancelled: AtomicUsize,
    /// Peak number of executing tasks.
    pub peak_executing: AtomicUsize,
}

impl QueueStats {
    /// Record an accepted task.
    #[inline]
    pub fn record_added(&self) {
        self.tasks_added.fetch_add(1, Ordering::SeqCst);
    }

    /// Record a dispatched task.
    #[inline]
    pub fn record_started(
        &self,
        executing: usize,
    ) {
        self.tasks_started.fetch_add(1, Ordering::SeqCst);
        self.update_peak(executing);
    }

    /// Record a completion.
    #[inline]
    pub fn record_completed(
        &self,
        outcome: TaskOutcome,
    ) {
        match outcome {
            TaskOutcome::Finished => self.tasks_finished.fetch_add(1, Ordering::SeqCst),
            TaskOutcome::Cancelled => self.tasks_cancelled.fetch_add(1, Ordering::SeqCst),
        };
    }

    /// Update peak executing count.
    #[inline]
    pub fn update_peak(
        &self,
        current: usize,
    ) {
        loop {
            let peak = self.peak_executing.load(Ordering::SeqCst);
            if current <= peak {
                break;
            }
            if self
                .peak_executing
                .compare_exchange(peak, current, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                break;
            }
        }
    }
}

struct QueueShared {
    /// Handle for pump jobs submitted on behalf of this queue.
    this: Weak<QueueShared>,
    name: Option<String>,
    manager: TaskManager,
    executor: Arc<dyn Executor>,
    stats: QueueStats,
    /// Guards the idle predicate check against the wake-up.
    idle_lock: Mutex<()>,
    idle: Condvar,
    callbacks: Mutex<Vec<AllFinishedCallback>>,
}

impl QueueShared {
    /// One pump pass.
    fn run_next_tasks(&self) {
        let mut dispatched = 0usize;
        while let Some(task) = self.manager.dequeue_first_ready_and_mark_executing() {
            dispatched += 1;
            self.stats.record_started(self.manager.executing_count());
            self.executor.submit(Box::new(move || {
                // Cancellation may have landed between dequeue and now; run() skips the
                // body in that case and reports the task cancelled.
                task.run();
            }));
        }
        trace!(queue = ?self.name, dispatched, "pump pass finished");
    }

    fn notify_all_finished(&self) {
        {
            let _guard = self.idle_lock.lock();
            self.idle.notify_all();
        }
        // A submission may have raced the completion; callbacks wait for the next idle point.
        if self.manager.are_all_tasks_finished() {
            self.fire_callbacks();
        }
    }

    fn push_callback(
        &self,
        callback: AllFinishedCallback,
    ) {
        self.callbacks.lock().push(callback);
        if self.manager.are_all_tasks_finished() {
            self.fire_callbacks();
        }
    }

    fn fire_callbacks(&self) {
        let callbacks = std::mem::take(&mut *self.callbacks.lock());
        if !callbacks.is_empty() {
            debug!(queue = ?self.name, count = callbacks.len(), "all tasks finished");
        }
        for callback in callbacks {
            callback();
        }
    }

    fn wait_until_idle(&self) {
        let mut guard = self.idle_lock.lock();
        while !self.manager.are_all_tasks_finished() {
            self.idle.wait(&mut guard);
        }
    }
}

impl TaskManagerDelegate for QueueShared {
    fn task_did_complete(
        &self,
        id: TaskId,
        outcome: TaskOutcome,
        all_finished: bool,
    ) {
        trace!(task = %id, ?outcome, all_finished, "completion received");
        self.stats.record_completed(outcome);
        self.run_next_tasks();
        if all_finished {
            self.notify_all_finished();
        }
    }

    fn dependency_resolved(
        &self,
        dependency: TaskId,
    ) {
        trace!(queue = ?self.name, %dependency, "scheduling pump for resolved dependency");
        // Possibly under another queue's lock: hand the pump to the executor.
        let this = self.this.clone();
        self.executor.submit(Box::new(move || {
            if let Some(shared) = this.upgrade() {
                shared.run_next_tasks();
            }
        }));
    }
}

/// Concurrent task queue with priorities, dependencies and a cap on executing tasks.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use opqueue::{BlockTask, Task, TaskId, TaskPriority, TaskQueue, TaskRef, TaskState};
///
/// let pool = Arc::new(rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap());
/// let queue = TaskQueue::with_executor(2, pool).unwrap();
/// let task: TaskRef = Arc::new(BlockTask::simple(TaskId(1), TaskPriority::High));
/// queue.add_tasks_and_wait(vec![task.clone()]).unwrap();
/// assert_eq!(task.state(), TaskState::Finished);
/// assert!(queue.is_empty());
/// ```
///
/// Waiting only returns once every submitted task has reported completion; a task
/// whose body never returns keeps waiters blocked.
pub struct TaskQueue {
    shared: Arc<QueueShared>,
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("name", &self.shared.name)
            .field("manager", &self.shared.manager)
            .field("stats", &self.shared.stats)
            .finish()
    }
}

impl TaskQueue {
    /// Create a queue on the shared worker pool.
    pub fn new(max_concurrent: usize) -> SchedulerResult<Self> {
        Self::with_executor(max_concurrent, shared_pool())
    }

    /// Create a queue without a concurrency cap, on the shared worker pool.
    pub fn unbounded() -> Self {
        Self::build(None, usize::MAX, shared_pool())
    }

    /// Create a queue running tasks on `executor`.
    pub fn with_executor(
        max_concurrent: usize,
        executor: Arc<dyn Executor>,
    ) -> SchedulerResult<Self> {
        if max_concurrent == 0 {
            return Err(SchedulerError::InvalidConcurrency(max_concurrent));
        }
        Ok(Self::build(None, max_concurrent, executor))
    }

    /// Create a queue from configuration. A non-zero `workers` gives the queue its own pool.
    pub fn from_config(config: &QueueConfig) -> SchedulerResult<Self> {
        config.validate()?;
        let executor: Arc<dyn Executor> = if config.workers > 0 {
            let prefix = config.name.as_deref().unwrap_or("opqueue-worker");
            Arc::new(WorkerPool::with_name(prefix, config.workers)?)
        } else {
            shared_pool()
        };
        Ok(Self::build(
            config.name.clone(),
            config.max_concurrent.as_count(),
            executor,
        ))
    }

    fn build(
        name: Option<String>,
        max_concurrent: usize,
        executor: Arc<dyn Executor>,
    ) -> Self {
        let shared = Arc::new_cyclic(|this| QueueShared {
            this: this.clone(),
            name,
            manager: TaskManager::new(max_concurrent),
            executor,
            stats: QueueStats::default(),
            idle_lock: Mutex::new(()),
            idle: Condvar::new(),
            callbacks: Mutex::new(Vec::new()),
        });
        let delegate: Weak<dyn TaskManagerDelegate> = Arc::downgrade(&shared) as _;
        shared.manager.set_delegate(delegate);
        Self { shared }
    }

    /// Submit one task and run a pump pass.
    pub fn add_task(
        &self,
        task: TaskRef,
    ) -> SchedulerResult<()> {
        self.shared.manager.append(task)?;
        self.shared.stats.record_added();
        self.shared.run_next_tasks();
        Ok(())
    }

    /// Submit a batch with a single pump pass.
    ///
    /// With `wait_until_finished`, blocks until the queue is idle, including tasks other
    /// threads add meanwhile. With `on_all_finished`, the callback fires once the queue
    /// next becomes idle. Setting both is rejected before anything is registered.
    ///
    /// If a task is rejected the batch stops there; tasks registered before it stay
    /// queued and are pumped, and `on_all_finished` is still registered for them.
    pub fn add_tasks<I>(
        &self,
        tasks: I,
        wait_until_finished: bool,
        on_all_finished: Option<AllFinishedCallback>,
    ) -> SchedulerResult<()>
    where
        I: IntoIterator<Item = TaskRef>,
    {
        if wait_until_finished && on_all_finished.is_some() {
            return Err(SchedulerError::ConflictingCompletionModes);
        }

        let registered = tasks
            .into_iter()
            .try_for_each(|task| -> SchedulerResult<()> {
                self.shared.manager.append(task)?;
                self.shared.stats.record_added();
                Ok(())
            });
        self.shared.run_next_tasks();

        if let Some(callback) = on_all_finished {
            self.shared.push_callback(callback);
        }
        registered?;

        if wait_until_finished {
            self.shared.wait_until_idle();
        }
        Ok(())
    }

    /// Submit a batch and block until the queue is idle.
    pub fn add_tasks_and_wait<I>(
        &self,
        tasks: I,
    ) -> SchedulerResult<()>
    where
        I: IntoIterator<Item = TaskRef>,
    {
        self.add_tasks(tasks, true, None)
    }

    /// Submit a batch and call `on_all_finished` once the queue is idle.
    pub fn add_tasks_with_callback<I, F>(
        &self,
        tasks: I,
        on_all_finished: F,
    ) -> SchedulerResult<()>
    where
        I: IntoIterator<Item = TaskRef>,
        F: FnOnce() + Send + 'static,
    {
        self.add_tasks(tasks, false, Some(Box::new(on_all_finished)))
    }

    /// Block until nothing is pending or executing.
    pub fn wait_until_all_tasks_finished(&self) {
        self.shared.wait_until_idle();
    }

    /// Cancel every pending task; running tasks are unaffected. Returns how many were
    /// cancelled.
    pub fn cancel_all_tasks(&self) -> usize {
        self.shared.manager.cancel_all_operations()
    }

    /// Number of tasks waiting to be dequeued.
    pub fn operation_count(&self) -> usize {
        self.shared.manager.operation_count()
    }

    /// Number of tasks currently executing.
    pub fn executing_count(&self) -> usize {
        self.shared.manager.executing_count()
    }

    /// Nothing pending and nothing executing.
    pub fn is_empty(&self) -> bool {
        self.shared.manager.are_all_tasks_finished()
    }

    /// Pending tasks, highest priority first.
    pub fn tasks(&self) -> Vec<TaskRef> {
        self.shared.manager.tasks()
    }

    /// Queue name, if configured.
    pub fn name(&self) -> Option<&str> {
        self.shared.name.as_deref()
    }

    /// The concurrency cap (`usize::MAX` when unbounded).
    pub fn max_concurrent(&self) -> usize {
        self.shared.manager.max_concurrent()
    }

    /// Get statistics.
    pub fn stats(&self) -> &QueueStats {
        &self.shared.stats
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        let cancelled = self.shared.manager.cancel_all_operations();
        if cancelled > 0 {
            debug!(queue = ?self.shared.name, cancelled, "queue dropped with pending tasks");
        }
    }
}
