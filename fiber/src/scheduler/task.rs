//! Scheduler tasks and the affinity-aware FIFO they wait in.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use log::warn;

use crate::fiber::{Dispatch, Fiber};

pub type Callback = Box<dyn FnOnce() + Send + 'static>;

/// A unit of work: a fiber to resume, or a callback to run on a reusable fiber.
pub enum Task {
    Fiber(Arc<Fiber>),
    Callback(Callback),
}

impl Task {
    pub fn callback<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::Callback(Box::new(f))
    }
}

impl From<Arc<Fiber>> for Task {
    fn from(fiber: Arc<Fiber>) -> Self {
        Self::Fiber(fiber)
    }
}

impl From<Callback> for Task {
    fn from(callback: Callback) -> Self {
        Self::Callback(callback)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fiber(fiber) => f.debug_tuple("Fiber").field(&fiber.id()).finish(),
            Self::Callback(_) => f.write_str("Callback"),
        }
    }
}

struct Entry {
    task: Task,
    /// `None` lets any worker take the task.
    affinity: Option<usize>,
}

#[derive(Default)]
pub(crate) struct TaskQueue {
    entries: VecDeque<Entry>,
}

impl TaskQueue {
    pub(crate) fn push(&mut self, task: Task, affinity: Option<usize>) {
        self.entries.push_back(Entry { task, affinity });
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Removes the first task `worker` may run, scanning in FIFO order and
    /// leaving skipped tasks where they are. The flag reports whether tasks
    /// remain behind the one taken.
    pub(crate) fn take_for(&mut self, worker: usize) -> (Option<Task>, bool) {
        let mut i = 0;
        while i < self.entries.len() {
            let entry = &self.entries[i];
            if entry.affinity.is_some_and(|id| id != worker) {
                i += 1;
                continue;
            }
            if let Task::Fiber(fiber) = &entry.task {
                match fiber.dispatch_state() {
                    Dispatch::Runnable => {}
                    Dispatch::Busy => {
                        i += 1;
                        continue;
                    }
                    Dispatch::Dead => {
                        warn!("dropping fiber {} from the queue: it can never run", fiber.id());
                        self.entries.remove(i);
                        continue;
                    }
                }
            }

            let task = self.entries.remove(i).map(|entry| entry.task);
            return (task, i < self.entries.len());
        }

        (None, false)
    }
}
