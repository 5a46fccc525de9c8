//! Set of in-flight tasks.

use indexmap::IndexMap;

use super::task::{TaskId, TaskRef};

/// Tasks that have been dequeued and handed to the executor, in start order.
///
/// Like the registry, this is guarded by the task manager's lock; the cap check and the
/// insert happen inside the same critical section as the dequeue.
#[derive(Debug, Default)]
pub struct ExecutingSet {
    tasks: IndexMap<TaskId, TaskRef>,
}

impl ExecutingSet {
    /// Create an empty set.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly dequeued task. Returns false if it was already tracked.
    pub fn add(
        &mut self,
        task: TaskRef,
    ) -> bool {
        let id = task.id();
        if self.tasks.contains_key(&id) {
            return false;
        }
        self.tasks.insert(id, task);
        true
    }

    /// Stop tracking a completed task.
    #[inline]
    pub fn remove(
        &mut self,
        id: TaskId,
    ) -> Option<TaskRef> {
        self.tasks.shift_remove(&id)
    }

    #[inline]
    pub fn contains(
        &self,
        id: TaskId,
    ) -> bool {
        self.tasks.contains_key(&id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Snapshot of in-flight tasks, oldest first.
    pub fn tasks(&self) -> Vec<TaskRef> {
        self.tasks.values().cloned().collect()
    }
}
