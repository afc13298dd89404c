//! Concurrency-safe task storage and id allocation.
//!
//! One mutex guards both the id counter and the task map. Every access holds
//! it only for a single snapshot or field-group write and never across an
//! `.await`, so readers see a task either before or after a mutation.

use super::{Task, TaskId};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio::sync::futures::Notified;

struct Inner {
    last_id: TaskId,
    tasks: HashMap<TaskId, Task>,
}

pub struct TaskRegistry {
    inner: Mutex<Inner>,
    /// Signalled after every terminal write (used by long-poll waiters).
    completed: Notify,
}

impl TaskRegistry {
    /// Create a registry whose first allocated id is `id_floor + 1`.
    #[must_use]
    pub fn new(id_floor: TaskId) -> Self {
        Self {
            inner: Mutex::new(Inner {
                last_id: id_floor,
                tasks: HashMap::new(),
            }),
            completed: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Nothing panics while the lock is held, so a poisoned guard is still consistent.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate the next id and register an in-progress task under it.
    pub fn insert_new(&self, message: &str) -> TaskId {
        let mut inner = self.lock();
        inner.last_id += 1;
        let id = inner.last_id;
        inner.tasks.insert(id, Task::new(id, message));
        id
    }

    /// Snapshot of a task, or `None` if the id was never allocated.
    #[must_use]
    pub fn get(&self, id: TaskId) -> Option<Task> {
        self.lock().tasks.get(&id).cloned()
    }

    /// Update the progress message of a task that has not completed yet.
    ///
    /// Returns false if the task is unknown or already terminal.
    pub fn set_progress(&self, id: TaskId, message: &str) -> bool {
        let mut inner = self.lock();
        match inner.tasks.get_mut(&id) {
            Some(task) if !task.is_completed => {
                message.clone_into(&mut task.message);
                true
            }
            _ => false,
        }
    }

    /// Write the terminal state of a task.
    ///
    /// Only the first terminal write takes effect; it returns the resulting
    /// snapshot. Later writes and unknown ids return `None`.
    pub fn complete(&self, id: TaskId, success: bool, message: &str) -> Option<Task> {
        let snapshot = {
            let mut inner = self.lock();
            let task = inner.tasks.get_mut(&id)?;
            if task.is_completed {
                tracing::warn!(
                    task_id = id,
                    status = %task.status(),
                    "Ignoring second terminal write"
                );
                return None;
            }
            task.is_completed = true;
            task.is_success = success;
            message.clone_into(&mut task.message);
            task.completed_at = Some(Utc::now());
            task.clone()
        };

        self.completed.notify_waiters();
        Some(snapshot)
    }

    /// Record that the completion callback was attempted.
    pub fn mark_callback_called(&self, id: TaskId) {
        if let Some(task) = self.lock().tasks.get_mut(&id) {
            task.callback_url_called = true;
        }
    }

    /// Future that resolves on the next terminal write of any task.
    pub fn completed(&self) -> Notified<'_> {
        self.completed.notified()
    }

    /// Number of tasks ever registered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
