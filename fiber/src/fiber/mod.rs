//! Fibers: stackful, cooperatively scheduled units of execution.
//!
//! A fiber owns one stack and one saved context. `resume` switches from the
//! thread's current fiber into it; `yield_now` switches back to whoever resumed it.
//! Control never moves between fibers implicitly.
//!
//! Every thread has a root fiber, created on first use, which stands for the
//! thread's own stack. It is only ever a yield target and is never resumed.

mod platform;
mod registry;

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};

use ::context::Transfer;
use log::{debug, trace, warn};
use parking_lot::Mutex;

use crate::config::DEFAULT_STACK_SIZE;
use crate::error::FiberError;
use crate::runtime;

use platform::{FiberStack, SavedContext};

/// Process-wide unique, monotonically increasing fiber identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FiberId(u64);

impl FiberId {
    fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(0);
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Created, reset, or suspended by a yield. Can be resumed.
    Ready,
    /// Executing. A fiber suspended inside `resume` while the fiber it resumed
    /// runs is READY until that fiber yields back, so at most one fiber per
    /// thread is ever RUNNING.
    Running,
    /// The entry closure returned. Can only be reset.
    Term,
}

/// How a queued fiber looks to a dispatch loop on the calling thread.
pub(crate) enum Dispatch {
    Runnable,
    /// Running right now, suspended on another thread, or only resumable from
    /// a fiber other than the scanning thread's current one.
    Busy,
    /// Terminated, or a root fiber. Never runnable.
    Dead,
}

type Entry = Box<dyn FnOnce() + Send + 'static>;

struct Inner {
    state: State,
    /// This fiber's own suspended context. Present exactly while READY.
    context: Option<SavedContext>,
    /// The context of whoever resumed us. Present exactly while RUNNING.
    caller: Option<SavedContext>,
    entry: Option<Entry>,
    /// The OS thread a started fiber is bound to until it terminates.
    owner: Option<ThreadId>,
    panic: Option<Box<dyn Any + Send>>,
}

/// A stackful fiber.
///
/// Dropping a fiber that is suspended mid-entry (it yielded and was never
/// resumed to completion) discards its stack without unwinding it: whatever
/// the entry closure captured or had on that stack is leaked, not dropped.
/// Such a drop is reported with a warning.
pub struct Fiber {
    id: FiberId,
    /// `None` for a thread's root fiber.
    stack: Option<FiberStack>,
    runs_under_scheduler: bool,
    inner: Mutex<Inner>,
}

impl Fiber {
    /// Creates a READY fiber that will run `entry` on its own stack.
    ///
    /// A `stack_size` of 0 selects [`DEFAULT_STACK_SIZE`]. With
    /// `runs_under_scheduler` the fiber yields to the thread's scheduler fiber;
    /// otherwise it yields to the thread's root fiber.
    pub fn new<F>(entry: F, stack_size: usize, runs_under_scheduler: bool) -> Result<Arc<Self>, FiberError>
    where
        F: FnOnce() + Send + 'static,
    {
        let size = if stack_size == 0 { DEFAULT_STACK_SIZE } else { stack_size };
        let stack = FiberStack::new(size)?;
        let context = SavedContext::bind(&stack, fiber_main);

        let fiber = Arc::new(Self {
            id: FiberId::next(),
            stack: Some(stack),
            runs_under_scheduler,
            inner: Mutex::new(Inner {
                state: State::Ready,
                context: Some(context),
                caller: None,
                entry: Some(Box::new(entry)),
                owner: None,
                panic: None,
            }),
        });
        registry::register(&fiber);
        debug!("fiber {} created with a {}-byte stack", fiber.id, fiber.stack_size());

        Ok(fiber)
    }

    /// A task fiber with the default stack that yields to the scheduler fiber.
    pub fn from_fn<F>(entry: F) -> Result<Arc<Self>, FiberError>
    where
        F: FnOnce() + Send + 'static,
    {
        Self::new(entry, 0, true)
    }

    /// The root fiber of the calling thread. Only `runtime` creates these.
    pub(crate) fn root() -> Arc<Self> {
        let fiber = Arc::new(Self {
            id: FiberId::next(),
            stack: None,
            runs_under_scheduler: false,
            inner: Mutex::new(Inner {
                state: State::Running,
                context: None,
                caller: None,
                entry: None,
                owner: Some(thread::current().id()),
                panic: None,
            }),
        });
        registry::register(&fiber);
        debug!("fiber {} is the root fiber of thread {:?}", fiber.id, thread::current().id());

        fiber
    }

    /// The fiber running on the calling thread.
    /// The first call on a thread creates that thread's root fiber.
    pub fn current() -> Arc<Self> {
        let root = runtime::root_fiber();
        match runtime::current_fiber() {
            Some(id) if id != root.id => registry::lookup(id)
                .unwrap_or_else(|| panic!("running fiber {id} is not registered")),
            _ => root,
        }
    }

    pub(crate) fn exists(id: FiberId) -> bool {
        registry::lookup(id).is_some()
    }

    /// Number of live fibers in the process, root fibers included.
    pub fn live() -> usize {
        registry::len()
    }

    pub fn id(&self) -> FiberId {
        self.id
    }

    pub fn state(&self) -> State {
        self.inner.lock().state
    }

    /// Usable stack bytes; 0 for a root fiber.
    pub fn stack_size(&self) -> usize {
        self.stack.as_ref().map_or(0, FiberStack::len)
    }

    pub fn runs_under_scheduler(&self) -> bool {
        self.runs_under_scheduler
    }

    pub fn is_root(&self) -> bool {
        self.stack.is_none()
    }

    /// Rewinds a terminated fiber to READY with a new entry, reusing its stack.
    ///
    /// # Panics
    /// If the fiber is not TERM, or is a root fiber.
    pub fn reset<F>(&self, entry: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(stack) = &self.stack else {
            panic!("root fiber {} has no stack to reuse", self.id);
        };
        let mut inner = self.inner.lock();
        assert_eq!(inner.state, State::Term, "fiber {} reset while {:?}", self.id, inner.state);

        inner.context = Some(SavedContext::bind(stack, fiber_main));
        inner.entry = Some(Box::new(entry));
        inner.owner = None;
        inner.state = State::Ready;
        trace!("fiber {} reset", self.id);
    }

    /// Switches into this fiber. Returns when it yields or terminates.
    ///
    /// Must be called from the fiber's yield target: the thread's scheduler
    /// fiber for fibers that run under a scheduler, its root fiber otherwise.
    /// A panic raised by the entry closure is re-raised here once the fiber has
    /// terminated.
    ///
    /// # Panics
    /// If the fiber is not READY, is a root fiber, is resumed from anything but
    /// its yield target, or started on another thread.
    pub fn resume(&self) {
        assert!(!self.is_root(), "root fiber {} is a yield target and cannot be resumed", self.id);
        let resumer = Fiber::current();
        let target = self.yield_target();
        assert_eq!(
            resumer.id, target,
            "fiber {} must be resumed from fiber {}, not from fiber {}",
            self.id, target, resumer.id
        );

        let here = thread::current().id();
        let context = {
            let mut inner = self.inner.lock();
            assert_eq!(inner.state, State::Ready, "fiber {} resumed while {:?}", self.id, inner.state);
            if let Some(owner) = inner.owner {
                assert_eq!(owner, here, "fiber {} started on thread {:?} and cannot migrate", self.id, owner);
            }
            let context = inner.context.take().expect("a ready fiber holds its saved context");
            inner.owner = Some(here);
            inner.state = State::Running;
            context
        };
        resumer.inner.lock().state = State::Ready;
        runtime::set_current_fiber(self.id);
        trace!("fiber {} resumes fiber {}", resumer.id, self.id);

        // SAFETY: the context was taken from a READY fiber, so it is either fresh
        // or the one saved by its last yield. `self` keeps the stack alive.
        let (suspended, _) = unsafe { context.switch(self as *const Fiber as usize) };

        let payload = {
            let mut inner = self.inner.lock();
            if inner.state == State::Term {
                inner.owner = None;
                inner.panic.take()
            } else {
                inner.state = State::Ready;
                inner.context = Some(suspended);
                None
            }
        };
        resumer.inner.lock().state = State::Running;

        if let Some(payload) = payload {
            panic::resume_unwind(payload);
        }
    }

    /// Switches back to the context that resumed this fiber.
    fn suspend(&self) {
        assert!(!self.is_root(), "root fiber {} has nothing to yield to", self.id);
        let caller = {
            let mut inner = self.inner.lock();
            assert!(
                matches!(inner.state, State::Running | State::Term),
                "fiber {} yielded while {:?}",
                self.id,
                inner.state
            );
            inner.caller.take()
        };
        let Some(caller) = caller else {
            panic!("fiber {} yielded without being resumed", self.id);
        };
        runtime::set_current_fiber(self.yield_target());
        trace!("fiber {} yields", self.id);

        // SAFETY: the resumer handed us its context and is blocked in `resume`
        // until we switch back to it.
        let (resumer, _) = unsafe { caller.switch(0) };
        self.inner.lock().caller = Some(resumer);
    }

    fn yield_target(&self) -> FiberId {
        let root = runtime::root_fiber_id();
        if self.runs_under_scheduler {
            runtime::scheduler_fiber().unwrap_or(root)
        } else {
            root
        }
    }

    /// Whether the calling thread's current fiber may resume this one now.
    pub(crate) fn dispatch_state(&self) -> Dispatch {
        if self.is_root() {
            return Dispatch::Dead;
        }
        let current = runtime::current_fiber().unwrap_or_else(runtime::root_fiber_id);
        let from_here = self.yield_target() == current;
        let inner = self.inner.lock();
        match inner.state {
            State::Term => Dispatch::Dead,
            State::Running => Dispatch::Busy,
            State::Ready if !from_here => Dispatch::Busy,
            State::Ready if inner.owner.is_some_and(|owner| owner != thread::current().id()) => Dispatch::Busy,
            State::Ready => Dispatch::Runnable,
        }
    }

    #[cfg(test)]
    fn stack_bottom(&self) -> Option<usize> {
        self.stack.as_ref().map(FiberStack::bottom)
    }
}

impl fmt::Debug for Fiber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("stack_size", &self.stack_size())
            .field("runs_under_scheduler", &self.runs_under_scheduler)
            .finish()
    }
}

impl Drop for Fiber {
    fn drop(&mut self) {
        registry::unregister(self.id);
        let inner = self.inner.get_mut();
        if inner.state == State::Ready && inner.entry.is_none() && self.stack.is_some() {
            warn!("fiber {} dropped while suspended; its stack frames are discarded", self.id);
        }
    }
}

/// Yields the running fiber back to whoever resumed it.
///
/// Nothing resumes the fiber again unless its owner does. A task that yields
/// without being re-enqueued (see `scheduler::yield_now`) stays suspended, and
/// once its last handle is dropped everything its entry captured is leaked.
///
/// # Panics
/// When called outside a fiber, i.e. on a thread's root fiber.
pub fn yield_now() {
    let current = Fiber::current();
    let fiber = Arc::as_ptr(&current);
    // The resumer holds its own handle. Keeping ours across the switch would
    // leak the fiber if it is never resumed again.
    drop(current);
    // SAFETY: the running fiber stays alive while its resumer is blocked in `resume`.
    unsafe { (*fiber).suspend() }
}

/// Entry of every task fiber's stack. `data` carries the fiber being entered.
extern "C" fn fiber_main(from_resumer: Transfer) -> ! {
    // SAFETY: `resume` passes the fiber it switches into and keeps it alive
    // until this stack switches back for good.
    let fiber = unsafe { &*(from_resumer.data as *const Fiber) };
    let entry = {
        let mut inner = fiber.inner.lock();
        inner.caller = Some(SavedContext::from_raw(from_resumer.context));
        inner.entry.take()
    };

    if let Some(entry) = entry {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(entry)) {
            fiber.inner.lock().panic = Some(payload);
        }
    }

    fiber.inner.lock().state = State::Term;
    trace!("fiber {} terminated", fiber.id);
    fiber.suspend();

    unreachable!("terminated fiber {} was switched back into", fiber.id)
}
