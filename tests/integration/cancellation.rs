use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use opqueue::{BlockTask, Task, TaskId, TaskPriority, TaskRef, TaskState};

use crate::support::{as_ref, eventually, queue, timed_task, work, Recorder, UNIT};

#[test]
fn test_cancel_all_stops_pending_tasks() {
    let queue = queue(3, 4);
    let recorder = Recorder::default();
    let tasks: Vec<Arc<BlockTask>> = (0..11)
        .map(|index| timed_task(index, TaskPriority::Normal, UNIT * 2, &recorder))
        .collect();

    queue
        .add_tasks(tasks.iter().map(as_ref), false, None)
        .unwrap();
    thread::sleep(UNIT * 3);
    let cancelled = queue.cancel_all_tasks();
    queue.wait_until_all_tasks_finished();

    assert!(cancelled > 0);
    assert!(recorder.completed().len() < 11);
    assert_eq!(recorder.completed().len() + cancelled, 11);
    assert!(tasks.iter().all(|task| task.state().is_terminal()));
    assert_eq!(
        queue.stats().tasks_cancelled.load(Ordering::SeqCst),
        cancelled
    );
}

#[test]
fn test_cancel_all_on_empty_queue() {
    let queue = queue(2, 1);
    assert_eq!(queue.cancel_all_tasks(), 0);
    assert_eq!(queue.cancel_all_tasks(), 0);
    assert!(queue.is_empty());
    queue.wait_until_all_tasks_finished();
}

#[test]
fn test_running_body_observes_cancel() {
    let queue = queue(1, 1);
    let finished_work = Arc::new(AtomicBool::new(true));
    let flag = finished_work.clone();
    let long: TaskRef = BlockTask::new(TaskId(0), TaskPriority::Normal, move |ctx| {
        flag.store(work(Duration::from_secs(10), || ctx.is_cancelled()), Ordering::SeqCst);
    })
    .into_ref();

    let started = Instant::now();
    queue.add_task(long.clone()).unwrap();
    let running = eventually(Duration::from_secs(5), || {
        long.state() == TaskState::Executing
    });
    assert!(running);

    // Running tasks are untouched by cancel_all.
    assert_eq!(queue.cancel_all_tasks(), 0);
    long.cancel();
    queue.wait_until_all_tasks_finished();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!finished_work.load(Ordering::SeqCst));
    assert_eq!(long.state(), TaskState::Cancelled);
}

#[test]
fn test_queue_accepts_work_after_cancel_all() {
    let queue = queue(1, 2);
    let recorder = Recorder::default();
    let first: Vec<TaskRef> = (0..4)
        .map(|index| as_ref(&timed_task(index, TaskPriority::Normal, UNIT, &recorder)))
        .collect();
    queue.add_tasks(first, false, None).unwrap();
    assert_eq!(queue.cancel_all_tasks(), 3);

    let later = timed_task(9, TaskPriority::Low, UNIT / 5, &recorder);
    queue.add_tasks_and_wait(vec![as_ref(&later)]).unwrap();

    assert_eq!(recorder.completed(), vec![0, 9]);
}
