//! Wake signalling for idle workers.
//!
//! `tickle` bumps a counter of pending wake-ups. An idle worker consumes one,
//! or notices the scheduler stopping, before it goes back to scanning the
//! queue. Between checks it parks on a condvar for at most one interval, so a
//! missed notification only costs latency.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

pub(crate) struct Tickle {
    pending: AtomicUsize,
    lock: Mutex<()>,
    cvar: Condvar,
    interval: Duration,
}

impl Tickle {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            pending: AtomicUsize::new(0),
            lock: Mutex::new(()),
            cvar: Condvar::new(),
            interval,
        }
    }

    pub(crate) fn notify(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
        let _guard = self.lock.lock();
        self.cvar.notify_one();
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Blocks until a wake-up can be consumed or `stopping` is set.
    pub(crate) fn wait(&self, stopping: &AtomicBool) {
        loop {
            if self.try_consume() || stopping.load(Ordering::Acquire) {
                return;
            }
            let mut guard = self.lock.lock();
            if self.pending() == 0 && !stopping.load(Ordering::Acquire) {
                self.cvar.wait_for(&mut guard, self.interval);
            }
        }
    }

    fn try_consume(&self) -> bool {
        self.pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }
}
