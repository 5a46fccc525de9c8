//! Pending-task registry.
//!
//! Priority buckets of tasks that have been submitted but not yet dequeued. The registry
//! is not synchronized on its own: the task manager owns it behind the same lock as the
//! executing set, so a dequeue and the matching executing insert form one transaction.

use std::collections::VecDeque;

use hashbrown::HashSet;

use super::task::{TaskId, TaskPriority, TaskRef};

/// Priority -> insertion-ordered pending tasks.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    /// One bucket per priority level, indexed by [`TaskPriority::index`].
    buckets: [VecDeque<TaskRef>; TaskPriority::COUNT],
    /// IDs of every task currently held in a bucket.
    members: HashSet<TaskId>,
}

impl TaskRegistry {
    /// Create an empty registry.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `task` to the tail of its priority bucket.
    ///
    /// Returns false, leaving the registry untouched, if a task with the same ID is
    /// already registered.
    pub fn append(
        &mut self,
        task: TaskRef,
    ) -> bool {
        if !self.members.insert(task.id()) {
            return false;
        }
        self.buckets[task.priority().index()].push_back(task);
        true
    }

    /// Remove and return the first startable task, scanning buckets from the highest
    /// priority down and each bucket in insertion order.
    ///
    /// A blocked head does not hide later ready tasks in the same bucket.
    pub fn dequeue_first_ready(&mut self) -> Option<TaskRef> {
        self.dequeue_first_ready_by(|task| task.is_startable())
    }

    /// Like [`dequeue_first_ready`](Self::dequeue_first_ready) with a caller-supplied
    /// acceptance test. The test may have side effects (the manager claims the task in it);
    /// the first task it accepts is removed.
    pub fn dequeue_first_ready_by<F>(
        &mut self,
        mut accept: F,
    ) -> Option<TaskRef>
    where
        F: FnMut(&TaskRef) -> bool,
    {
        for priority in TaskPriority::DESCENDING {
            let bucket = &mut self.buckets[priority.index()];
            if let Some(position) = bucket.iter().position(&mut accept) {
                let task = bucket.remove(position)?;
                self.members.remove(&task.id());
                return Some(task);
            }
        }
        None
    }

    /// Whether any registered task is startable right now.
    pub fn has_ready(&self) -> bool {
        self.buckets
            .iter()
            .any(|bucket| bucket.iter().any(|task| task.is_startable()))
    }

    /// Remove a specific task.
    pub fn remove(
        &mut self,
        id: TaskId,
        priority: TaskPriority,
    ) -> Option<TaskRef> {
        if !self.members.contains(&id) {
            return None;
        }
        let bucket = &mut self.buckets[priority.index()];
        let position = bucket.iter().position(|task| task.id() == id)?;
        let task = bucket.remove(position)?;
        self.members.remove(&id);
        Some(task)
    }

    /// Cancel and drain every registered task.
    ///
    /// Only tasks whose completion hook can be reclaimed are drained; the caller reports
    /// them. A task whose hook is already firing (cancelled concurrently) is left in place
    /// for that hook to remove, so each task is reported exactly once.
    pub fn cancel_all(&mut self) -> Vec<TaskRef> {
        let mut cancelled = Vec::new();
        for bucket in self.buckets.iter_mut() {
            let mut in_flight = VecDeque::new();
            for task in bucket.drain(..) {
                if task.clear_completion_hook() {
                    task.cancel();
                    cancelled.push(task);
                } else {
                    in_flight.push_back(task);
                }
            }
            *bucket = in_flight;
        }
        for task in &cancelled {
            self.members.remove(&task.id());
        }
        cancelled
    }

    /// Whether a task with this ID is registered.
    #[inline]
    pub fn contains(
        &self,
        id: TaskId,
    ) -> bool {
        self.members.contains(&id)
    }

    /// Number of registered tasks.
    #[inline]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Check if empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Snapshot of registered tasks, highest priority first, insertion order within a level.
    pub fn tasks(&self) -> Vec<TaskRef> {
        TaskPriority::DESCENDING
            .iter()
            .flat_map(|priority| self.buckets[priority.index()].iter().cloned())
            .collect()
    }
}
