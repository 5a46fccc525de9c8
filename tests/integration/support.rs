//! Shared helpers for the integration scenarios.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use opqueue::util::logger::{self, LogLevel};
use opqueue::{BlockTask, TaskBuilder, TaskId, TaskPriority, TaskQueue, TaskRef, WorkerPool};

/// Stand-in for one second of work.
pub const UNIT: Duration = Duration::from_millis(50);

const POLL: Duration = Duration::from_millis(2);

pub fn init() {
    let _ = logger::try_init_with_level(LogLevel::Debug);
}

/// Queue with its own pool, so scenarios do not compete for the shared one.
pub fn queue(
    max_concurrent: usize,
    workers: usize,
) -> TaskQueue {
    init();
    let pool = Arc::new(WorkerPool::with_name("scenario", workers).unwrap());
    TaskQueue::with_executor(max_concurrent, pool).unwrap()
}

/// Completion order of task bodies.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    completed: Arc<Mutex<Vec<usize>>>,
}

impl Recorder {
    pub fn record(
        &self,
        index: usize,
    ) {
        self.completed.lock().push(index);
    }

    pub fn completed(&self) -> Vec<usize> {
        self.completed.lock().clone()
    }

    pub fn position(
        &self,
        index: usize,
    ) -> usize {
        self.completed
            .lock()
            .iter()
            .position(|&i| i == index)
            .unwrap_or_else(|| panic!("task {} never completed", index))
    }

    pub fn contains(
        &self,
        index: usize,
    ) -> bool {
        self.completed.lock().contains(&index)
    }
}

/// Sleep for `duration` in small slices, giving up early once cancelled.
/// Returns false if cancellation cut the work short.
pub fn work(
    duration: Duration,
    is_cancelled: impl Fn() -> bool,
) -> bool {
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        if is_cancelled() {
            return false;
        }
        thread::sleep(POLL.min(deadline.saturating_duration_since(Instant::now())));
    }
    !is_cancelled()
}

/// Task `index` that works for `duration` and records itself unless cancelled.
pub fn timed_task(
    index: usize,
    priority: TaskPriority,
    duration: Duration,
    recorder: &Recorder,
) -> Arc<BlockTask> {
    timed_task_after(index, priority, duration, recorder, &[])
}

/// Like [`timed_task`], with dependencies.
pub fn timed_task_after(
    index: usize,
    priority: TaskPriority,
    duration: Duration,
    recorder: &Recorder,
    dependencies: &[TaskRef],
) -> Arc<BlockTask> {
    let recorder = recorder.clone();
    let builder = dependencies
        .iter()
        .cloned()
        .fold(TaskBuilder::new().priority(priority), TaskBuilder::depends_on);
    Arc::new(builder.build(TaskId(index), move |ctx| {
        if work(duration, || ctx.is_cancelled()) {
            recorder.record(index);
        }
    }))
}

pub fn as_ref(task: &Arc<BlockTask>) -> TaskRef {
    task.clone()
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn eventually(
    timeout: Duration,
    condition: impl Fn() -> bool,
) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(POLL);
    }
    condition()
}
