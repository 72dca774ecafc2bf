// Runtime holds what each OS thread knows about itself: which fiber is running,
// its root fiber, the fiber its dispatch loop runs as, and the scheduler it serves.

pub(crate) mod thread;

use std::cell::{Cell, RefCell};
use std::sync::{Arc, Weak};

use crate::fiber::{Fiber, FiberId};
use crate::scheduler::Shared;

/// Worker id of a thread that was not spawned by a scheduler,
/// including the thread that constructs one.
pub const ROOT_WORKER_ID: usize = 0;

struct ThreadContext {
    worker_id: Cell<usize>,
    current: Cell<Option<FiberId>>,
    root: RefCell<Option<Arc<Fiber>>>,
    scheduler_fiber: Cell<Option<FiberId>>,
    scheduler: RefCell<Option<Weak<Shared>>>,
}

impl ThreadContext {
    const fn new() -> Self {
        Self {
            worker_id: Cell::new(ROOT_WORKER_ID),
            current: Cell::new(None),
            root: RefCell::new(None),
            scheduler_fiber: Cell::new(None),
            scheduler: RefCell::new(None),
        }
    }
}

thread_local! {
    static THREAD: ThreadContext = const { ThreadContext::new() };
}

/// Numeric id of the calling thread within its scheduler.
pub fn worker_id() -> usize {
    THREAD.with(|t| t.worker_id.get())
}

pub(crate) fn set_worker_id(id: usize) {
    THREAD.with(|t| t.worker_id.set(id));
}

pub(crate) fn current_fiber() -> Option<FiberId> {
    THREAD.with(|t| t.current.get())
}

pub(crate) fn set_current_fiber(id: FiberId) {
    THREAD.with(|t| t.current.set(Some(id)));
}

/// The calling thread's root fiber, created the first time anything asks.
pub(crate) fn root_fiber() -> Arc<Fiber> {
    THREAD.with(|t| {
        let existing = t.root.borrow().clone();
        if let Some(root) = existing {
            return root;
        }
        let root = Fiber::root();
        t.current.set(Some(root.id()));
        *t.root.borrow_mut() = Some(root.clone());
        root
    })
}

pub(crate) fn root_fiber_id() -> FiberId {
    THREAD.with(|t| t.root.borrow().as_ref().map(|root| root.id())).unwrap_or_else(|| root_fiber().id())
}

/// The fiber this thread's dispatch loop runs as, if one is bound.
///
/// A binding whose fiber no longer exists, left behind when a
/// caller-participating scheduler is dropped off its root thread, is cleared
/// here and reads as unbound.
pub(crate) fn scheduler_fiber() -> Option<FiberId> {
    let id = THREAD.with(|t| t.scheduler_fiber.get())?;
    if Fiber::exists(id) {
        Some(id)
    } else {
        unbind_scheduler();
        None
    }
}

pub(crate) fn set_scheduler_fiber(id: Option<FiberId>) {
    THREAD.with(|t| t.scheduler_fiber.set(id));
}

/// The scheduler this thread serves. Bound together with the scheduler fiber.
pub(crate) fn scheduler() -> Option<Arc<Shared>> {
    scheduler_fiber()?;
    THREAD.with(|t| t.scheduler.borrow().as_ref().and_then(Weak::upgrade))
}

pub(crate) fn set_scheduler(scheduler: Option<Weak<Shared>>) {
    THREAD.with(|t| *t.scheduler.borrow_mut() = scheduler);
}

/// Clears the scheduler binding during teardown, when thread-local storage may
/// already be gone.
pub(crate) fn unbind_scheduler() {
    let _ = THREAD.try_with(|t| {
        t.scheduler_fiber.set(None);
        *t.scheduler.borrow_mut() = None;
    });
}
