//! Process-wide map from fiber id to a weak handle.
//! A running fiber is tracked by id only; this is how that id turns back into an `Arc`.

use std::sync::{Arc, Weak};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use super::{Fiber, FiberId};

static FIBERS: Lazy<Mutex<FxHashMap<FiberId, Weak<Fiber>>>> =
    Lazy::new(|| Mutex::new(FxHashMap::default()));

pub(super) fn register(fiber: &Arc<Fiber>) {
    let prev = FIBERS.lock().insert(fiber.id(), Arc::downgrade(fiber));
    assert!(prev.is_none(), "fiber {} registered twice", fiber.id());
}

pub(super) fn unregister(id: FiberId) {
    FIBERS.lock().remove(&id);
}

pub(super) fn lookup(id: FiberId) -> Option<Arc<Fiber>> {
    FIBERS.lock().get(&id).and_then(Weak::upgrade)
}

pub(super) fn len() -> usize {
    FIBERS.lock().len()
}
