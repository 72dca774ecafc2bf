//! Worker threads: an OS thread that knows its worker id before running anything.

use std::io;
use std::thread::{Builder, JoinHandle};

use log::error;

pub(crate) struct WorkerThread {
    id: usize,
    name: String,
    handle: Option<JoinHandle<()>>,
}

impl WorkerThread {
    /// Spawns a named thread that records `id` as its worker id, then runs `f`.
    pub(crate) fn spawn<F>(id: usize, name: String, f: F) -> io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = Builder::new().name(name.clone()).spawn(move || {
            super::set_worker_id(id);
            f();
        })?;

        Ok(Self { id, name, handle: Some(handle) })
    }

    pub(crate) fn id(&self) -> usize {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Waits for the thread to finish. Joining twice is a no-op.
    pub(crate) fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("worker thread `{}` panicked", self.name);
            }
        }
    }
}

impl Drop for WorkerThread {
    fn drop(&mut self) {
        self.join();
    }
}
