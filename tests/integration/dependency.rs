use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use opqueue::{Task, TaskBuilder, TaskId, TaskPriority, TaskRef, TaskState};

use crate::support::{as_ref, queue, timed_task, timed_task_after, Recorder, UNIT};

#[test]
fn test_dependency_overrides_priority() {
    let queue = queue(3, 4);
    let recorder = Recorder::default();
    let zero = timed_task(0, TaskPriority::VeryLow, UNIT, &recorder);
    let eight = timed_task_after(8, TaskPriority::VeryHigh, UNIT / 5, &recorder, &[as_ref(&zero)]);

    let mut tasks: Vec<TaskRef> = (1..8)
        .chain(9..11)
        .map(|index| as_ref(&timed_task(index, TaskPriority::Normal, UNIT / 5, &recorder)))
        .collect();
    tasks.push(as_ref(&zero));
    tasks.push(as_ref(&eight));

    queue.add_tasks_and_wait(tasks).unwrap();

    assert_eq!(recorder.completed().len(), 11);
    assert!(recorder.position(0) < recorder.position(8));
}

#[test]
fn test_cancelled_dependency_still_releases_dependent() {
    let queue = queue(1, 2);
    let recorder = Recorder::default();
    let blocker = timed_task(1, TaskPriority::VeryHigh, UNIT * 3, &recorder);
    let five = timed_task(5, TaskPriority::Normal, UNIT, &recorder);
    let eight = timed_task_after(8, TaskPriority::Normal, UNIT / 5, &recorder, &[as_ref(&five)]);

    queue
        .add_tasks(
            vec![as_ref(&blocker), as_ref(&five), as_ref(&eight)],
            false,
            None,
        )
        .unwrap();

    // Task 5 is still queued behind the blocker.
    thread::sleep(UNIT);
    assert_eq!(five.state(), TaskState::Pending);
    five.cancel();
    assert_eq!(five.state(), TaskState::Cancelled);
    assert_eq!(queue.operation_count(), 1);

    queue.wait_until_all_tasks_finished();

    assert_eq!(eight.state(), TaskState::Finished);
    assert!(recorder.contains(8));
    assert!(!recorder.contains(5));
    assert_eq!(recorder.completed(), vec![1, 8]);
}

#[test]
fn test_dependents_never_start_early() {
    let queue = queue(4, 4);
    let violated = Arc::new(AtomicBool::new(false));

    // Diamond: a -> {b, c} -> d, plus a chain d -> e.
    let checked = |index: usize, priority: TaskPriority, dependencies: Vec<TaskRef>| -> TaskRef {
        let violated = violated.clone();
        let watched = dependencies.clone();
        let builder = dependencies
            .into_iter()
            .fold(TaskBuilder::new().priority(priority), TaskBuilder::depends_on);
        Arc::new(builder.build(TaskId(index), move |_| {
            if watched.iter().any(|dep| !dep.state().is_terminal()) {
                violated.store(true, Ordering::SeqCst);
            }
            thread::sleep(UNIT / 10);
        }))
    };

    let a = checked(0, TaskPriority::VeryLow, vec![]);
    let b = checked(1, TaskPriority::High, vec![a.clone()]);
    let c = checked(2, TaskPriority::VeryHigh, vec![a.clone()]);
    let d = checked(3, TaskPriority::VeryHigh, vec![b.clone(), c.clone()]);
    let e = checked(4, TaskPriority::VeryHigh, vec![d.clone()]);
    let all = vec![e, d, c, b, a];

    queue.add_tasks_and_wait(all.clone()).unwrap();

    assert!(!violated.load(Ordering::SeqCst));
    assert!(all.iter().all(|task| task.state() == TaskState::Finished));
}

#[test]
fn test_dependency_across_queues() {
    let upstream = queue(1, 2);
    let downstream = queue(1, 2);
    let recorder = Recorder::default();
    let fetch = timed_task(0, TaskPriority::Normal, UNIT, &recorder);
    let decode = timed_task_after(1, TaskPriority::Normal, UNIT / 5, &recorder, &[as_ref(&fetch)]);

    downstream.add_task(as_ref(&decode)).unwrap();
    upstream.add_task(as_ref(&fetch)).unwrap();

    downstream.wait_until_all_tasks_finished();

    assert_eq!(decode.state(), TaskState::Finished);
    assert_eq!(recorder.completed(), vec![0, 1]);
    assert!(upstream.is_empty());
}
