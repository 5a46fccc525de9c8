use std::fs;

use opqueue::{Context, QueueConfig, Result, TaskPriority, TaskQueue, TaskRef};

use crate::support::{as_ref, init, timed_task, Recorder, UNIT};

#[test]
fn test_queue_from_config_file() -> Result<()> {
    init();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("queue.toml");
    fs::write(
        &path,
        "[queue]\nname = \"ingest\"\nmax_concurrent = 2\nworkers = 2\n",
    )?;

    let config = QueueConfig::load(&path).context("loading queue config")?;
    let queue = TaskQueue::from_config(&config).context("building queue")?;
    assert_eq!(queue.name(), Some("ingest"));
    assert_eq!(queue.max_concurrent(), 2);

    let recorder = Recorder::default();
    let tasks: Vec<TaskRef> = (0..4)
        .map(|index| as_ref(&timed_task(index, TaskPriority::Normal, UNIT / 10, &recorder)))
        .collect();
    queue.add_tasks_and_wait(tasks)?;

    assert_eq!(recorder.completed().len(), 4);
    Ok(())
}

#[test]
fn test_unbounded_config_file() -> Result<()> {
    let config = QueueConfig::from_toml_str("[queue]\nmax_concurrent = \"unbounded\"\n")?;
    let queue = TaskQueue::from_config(&config)?;
    assert_eq!(queue.max_concurrent(), usize::MAX);
    assert!(queue.name().is_none());
    Ok(())
}
