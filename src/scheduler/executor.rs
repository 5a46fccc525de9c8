//! Executors that run dequeued tasks.
//!
//! The queue only needs "run this closure on some thread, soon". Submission must not run
//! the job inline: a pump pass relies on it returning immediately.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use crossbeam::channel::{self, Receiver, Sender};
use once_cell::sync::Lazy;
use tracing::{error, trace, warn};

use super::errors::{SchedulerError, SchedulerResult};

/// A unit of work handed to an executor.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fire-and-forget concurrent executor.
pub trait Executor: Send + Sync {
    /// Schedule `job` to run on some thread. No ordering guarantee across submissions.
    fn submit(
        &self,
        job: Job,
    );
}

impl Executor for rayon::ThreadPool {
    fn submit(
        &self,
        job: Job,
    ) {
        self.spawn(job);
    }
}

/// Fixed set of named worker threads fed from one channel.
///
/// Suited to task bodies that block (I/O, sleeps), which would starve a rayon pool.
#[derive(Debug)]
pub struct WorkerPool {
    /// Dropped on shutdown so workers drain the channel and exit.
    sender: Option<Sender<Job>>,
    /// Worker threads.
    workers: Vec<thread::JoinHandle<()>>,
}

impl WorkerPool {
    /// Create a pool with `num_workers` threads named `opqueue-worker-N`.
    pub fn new(num_workers: usize) -> SchedulerResult<Self> {
        Self::with_name("opqueue-worker", num_workers)
    }

    /// Create a pool whose threads are named `{prefix}-N`.
    pub fn with_name(
        prefix: &str,
        num_workers: usize,
    ) -> SchedulerResult<Self> {
        if num_workers == 0 {
            return Err(SchedulerError::InvalidWorkerCount);
        }

        let (sender, receiver) = channel::unbounded::<Job>();
        let mut workers = Vec::with_capacity(num_workers);
        for worker_id in 0..num_workers {
            let receiver = receiver.clone();
            let worker = thread::Builder::new()
                .name(format!("{}-{}", prefix, worker_id))
                .spawn(move || Self::worker_loop(worker_id, receiver))
                .map_err(SchedulerError::WorkerSpawn)?;
            workers.push(worker);
        }

        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    /// Worker thread main loop.
    fn worker_loop(
        worker_id: usize,
        receiver: Receiver<Job>,
    ) {
        while let Ok(job) = receiver.recv() {
            if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                error!(worker_id, "job panicked");
            }
        }
        trace!(worker_id, "worker exiting");
    }

    /// Get the number of workers.
    #[inline]
    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Stop accepting jobs, let queued jobs finish and join the workers.
    pub fn shutdown(&mut self) {
        self.sender.take();

        let current = thread::current().id();
        for worker in self.workers.drain(..) {
            // A pool dropped from one of its own jobs cannot join itself.
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                error!("worker thread panicked");
            }
        }
    }
}

impl Executor for WorkerPool {
    fn submit(
        &self,
        job: Job,
    ) {
        match &self.sender {
            Some(sender) => {
                if sender.send(job).is_err() {
                    warn!("worker pool disconnected, job dropped");
                }
            }
            None => warn!("worker pool shut down, job dropped"),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Worker count for pools built without an explicit size.
pub fn default_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .max(4)
}

static SHARED_POOL: Lazy<Arc<WorkerPool>> = Lazy::new(|| {
    Arc::new(
        WorkerPool::with_name("opqueue-shared", default_workers())
            .expect("Failed to spawn shared worker pool"),
    )
});

/// Process-wide pool used by queues that are not given an executor.
pub fn shared_pool() -> Arc<dyn Executor> {
    SHARED_POOL.clone()
}
