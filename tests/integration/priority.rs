use std::time::Duration;

use crossbeam::channel;

use opqueue::{TaskPriority, TaskRef};

use crate::support::{as_ref, queue, timed_task, Recorder, UNIT};

const LEVELS: [TaskPriority; 5] = [
    TaskPriority::VeryLow,
    TaskPriority::Low,
    TaskPriority::Normal,
    TaskPriority::High,
    TaskPriority::VeryHigh,
];

#[test]
fn test_serial_queue_completes_by_priority() {
    let queue = queue(1, 2);
    let recorder = Recorder::default();
    let tasks: Vec<TaskRef> = LEVELS
        .iter()
        .enumerate()
        .map(|(index, priority)| as_ref(&timed_task(index, *priority, UNIT / 5, &recorder)))
        .collect();

    queue.add_tasks_and_wait(tasks).unwrap();

    assert_eq!(recorder.completed(), vec![4, 3, 2, 1, 0]);
}

#[test]
fn test_serial_queue_named_levels() {
    let queue = queue(1, 2);
    let recorder = Recorder::default();
    let priority_of = |index: usize| match index {
        0 => TaskPriority::VeryLow,
        1 => TaskPriority::Low,
        6 => TaskPriority::VeryHigh,
        8 => TaskPriority::High,
        _ => TaskPriority::Normal,
    };
    let tasks: Vec<TaskRef> = (0..11)
        .map(|index| as_ref(&timed_task(index, priority_of(index), UNIT / 10, &recorder)))
        .collect();

    queue.add_tasks_and_wait(tasks).unwrap();

    assert_eq!(recorder.completed().len(), 11);
    assert!(recorder.position(6) < recorder.position(8));
    assert!(recorder.position(8) < recorder.position(7));
    assert!(recorder.position(7) < recorder.position(1));
    assert!(recorder.position(1) < recorder.position(0));
    // Equal priority keeps submission order.
    assert!(recorder.position(2) < recorder.position(3));
}

#[test]
fn test_capped_queue_finishes_very_low_last() {
    let queue = queue(3, 4);
    let recorder = Recorder::default();
    let tasks: Vec<TaskRef> = (0..11)
        .map(|index| {
            let (priority, duration) = match index {
                0 => (TaskPriority::VeryLow, UNIT),
                1 => (TaskPriority::Low, UNIT / 5),
                6 => (TaskPriority::VeryHigh, UNIT),
                _ => (TaskPriority::Normal, UNIT),
            };
            as_ref(&timed_task(index, priority, duration, &recorder))
        })
        .collect();

    queue.add_tasks_and_wait(tasks).unwrap();

    assert_eq!(recorder.completed().len(), 11);
    assert!(recorder.position(6) < recorder.position(0));
    assert!(recorder.position(1) < recorder.position(0));
    assert!(queue.stats().peak_executing.load(std::sync::atomic::Ordering::SeqCst) <= 3);
}

#[test]
fn test_late_very_high_task_overtakes_pending_ones() {
    let queue = queue(1, 2);
    let recorder = Recorder::default();
    let (done_tx, done_rx) = channel::bounded(1);

    let blocker = timed_task(10, TaskPriority::Normal, UNIT * 2, &recorder);
    let very_low = timed_task(0, TaskPriority::VeryLow, UNIT / 5, &recorder);
    queue
        .add_tasks_with_callback(vec![as_ref(&blocker), as_ref(&very_low)], move || {
            let _ = done_tx.send(());
        })
        .unwrap();

    // Arrives while the blocker holds the only slot.
    let urgent = timed_task(6, TaskPriority::VeryHigh, UNIT / 5, &recorder);
    queue.add_task(as_ref(&urgent)).unwrap();

    done_rx
        .recv_timeout(Duration::from_secs(10))
        .expect("queue never became idle");
    assert_eq!(recorder.completed(), vec![10, 6, 0]);
}
