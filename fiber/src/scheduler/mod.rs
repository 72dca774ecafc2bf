//! M:N scheduler: fibers dispatched over a fixed pool of worker threads.
//!
//! Producers enqueue fibers or callbacks, optionally pinned to one worker.
//! Every worker runs the same dispatch loop: take the first task it may run,
//! resume it, and park on an idle fiber when there is nothing to do.
//!
//! In caller-participates mode the constructing thread counts as one of the
//! workers. Its dispatch loop runs on a dedicated scheduling fiber, which
//! `stop` resumes to drain the queue before joining everyone else.
//!
//! There is no preemption. A task that never yields keeps its worker.

mod idle;
mod task;
#[cfg(test)]
mod tests;

pub use task::{Callback, Task};

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, ThreadId};
use std::time::Duration;

use log::{debug, error, info, trace, warn};
use parking_lot::Mutex;

use crate::config::{DEFAULT_IDLE_INTERVAL, DEFAULT_SCHEDULER_NAME};
use crate::error::SchedulerError;
use crate::fiber::{self, Fiber, State};
use crate::runtime::{self, thread::WorkerThread};

use idle::Tickle;
use task::TaskQueue;

/// Numeric id of the calling thread within its scheduler.
/// The constructing thread, and any thread no scheduler spawned, is 0.
pub fn current_worker_id() -> usize {
    runtime::worker_id()
}

/// Re-enqueues the running task on this worker, then yields so that other
/// tasks get a turn.
///
/// # Panics
/// When called outside a task fiber.
pub fn yield_now() {
    let fiber = Fiber::current();
    assert!(!fiber.is_root(), "yield_now must be called from inside a task fiber");
    match Handle::current() {
        Some(handle) => handle.enqueue(fiber, Some(runtime::worker_id())),
        None => drop(fiber),
    }
    fiber::yield_now();
}

/// Runs `f` as the first task of a caller-participating scheduler with
/// `workers` threads (the calling thread included) and returns its result.
///
/// The calling thread serves as worker 0 while `f` runs. Once `f` returns the
/// scheduler stops: tasks queued by then still run, on the workers they are
/// pinned to, before this returns. A panic in `f` is re-raised here.
pub fn block_on<F, R>(workers: usize, name: &str, f: F) -> Result<R, SchedulerError>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let mut scheduler = Scheduler::new(workers, true, name)?;
    let slot = Arc::new(Mutex::new(None));
    let out = Arc::clone(&slot);
    scheduler.spawn(move || {
        *out.lock() = Some(panic::catch_unwind(AssertUnwindSafe(f)));
        if let Some(shared) = runtime::scheduler() {
            shared.shutdown();
        }
    });
    scheduler.start()?;
    scheduler.run_caller();
    scheduler.stop();
    drop(scheduler);

    let result = slot.lock().take();
    match result {
        Some(Ok(value)) => Ok(value),
        Some(Err(payload)) => panic::resume_unwind(payload),
        None => Err(SchedulerError::Incomplete(name.to_string())),
    }
}

pub struct Builder {
    workers: usize,
    use_caller: bool,
    name: String,
    stack_size: usize,
    idle_interval: Duration,
}

impl Builder {
    pub fn new() -> Self {
        Self {
            workers: 1,
            use_caller: true,
            name: DEFAULT_SCHEDULER_NAME.to_string(),
            stack_size: 0,
            idle_interval: DEFAULT_IDLE_INTERVAL,
        }
    }

    /// Total workers, the calling thread included when it participates.
    pub fn workers(mut self, n: usize) -> Self {
        self.workers = n;
        self
    }

    pub fn use_caller(mut self, use_caller: bool) -> Self {
        self.use_caller = use_caller;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Stack size of the fibers the scheduler creates itself; 0 is the default.
    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = size;
        self
    }

    pub fn idle_interval(mut self, interval: Duration) -> Self {
        self.idle_interval = interval;
        self
    }

    pub fn build(self) -> Result<Scheduler, SchedulerError> {
        if self.workers == 0 {
            return Err(SchedulerError::InvalidWorkerCount);
        }

        let shared = Arc::new(Shared {
            name: self.name,
            queue: Mutex::new(TaskQueue::default()),
            active: AtomicUsize::new(0),
            idle: AtomicUsize::new(0),
            stopping: AtomicBool::new(false),
            signal: Tickle::new(self.idle_interval),
            stack_size: self.stack_size,
            root_thread: thread::current().id(),
            workers: self.workers,
        });

        let mut thread_count = self.workers;
        let mut thread_ids = Vec::with_capacity(self.workers);
        let root_fiber = if self.use_caller {
            if runtime::scheduler_fiber().is_some() {
                return Err(SchedulerError::AlreadyBound);
            }
            let s = Arc::clone(&shared);
            let fiber = Fiber::new(move || s.run(), self.stack_size, false)?;
            runtime::set_scheduler_fiber(Some(fiber.id()));
            runtime::set_scheduler(Some(Arc::downgrade(&shared)));
            thread_ids.push(runtime::worker_id());
            thread_count -= 1;
            Some(fiber)
        } else {
            None
        };

        info!(
            "scheduler `{}` created: {} worker thread(s), caller participates: {}",
            shared.name, thread_count, self.use_caller
        );

        Ok(Scheduler {
            shared,
            root_fiber,
            thread_count,
            threads: Vec::with_capacity(thread_count),
            thread_ids,
            started: false,
            stopped: false,
        })
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Scheduler {
    shared: Arc<Shared>,
    /// The dedicated scheduling fiber of the constructing thread, in
    /// caller-participates mode.
    root_fiber: Option<Arc<Fiber>>,
    /// Threads to spawn, not counting the caller.
    thread_count: usize,
    threads: Vec<WorkerThread>,
    thread_ids: Vec<usize>,
    started: bool,
    /// Set once `stop` has run. `stopping` alone may already be set by a task.
    stopped: bool,
}

impl Scheduler {
    pub fn new(workers: usize, use_caller: bool, name: &str) -> Result<Self, SchedulerError> {
        Builder::new().workers(workers).use_caller(use_caller).name(name).build()
    }

    pub fn builder() -> Builder {
        Builder::new()
    }

    /// Spawns the worker threads. Starting twice is a no-op.
    pub fn start(&mut self) -> Result<(), SchedulerError> {
        if self.stopped || self.shared.is_stopping() {
            error!("scheduler `{}` is stopped and cannot start", self.shared.name);
            return Err(SchedulerError::Stopped(self.shared.name.clone()));
        }
        if self.started {
            warn!("scheduler `{}` is already started", self.shared.name);
            return Ok(());
        }
        self.started = true;

        for i in 0..self.thread_count {
            let shared = Arc::clone(&self.shared);
            let id = i + 1;
            let name = format!("{}_{}", self.shared.name, id);
            let thread = WorkerThread::spawn(id, name, move || shared.run())?;
            trace!("scheduler `{}`: worker {} is thread `{}`", self.shared.name, thread.id(), thread.name());
            self.thread_ids.push(thread.id());
            self.threads.push(thread);
        }
        debug!("scheduler `{}` started worker(s) {:?}", self.shared.name, self.thread_ids);

        Ok(())
    }

    /// Stops the scheduler: idle workers exit, busy ones finish what they can
    /// take from the queue, and in caller-participates mode the calling thread
    /// drains its share before all workers are joined. Stopping twice is a no-op.
    ///
    /// # Panics
    /// When called from a thread other than the one that built the scheduler.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        assert_eq!(
            thread::current().id(),
            self.shared.root_thread,
            "scheduler `{}` can only be stopped from the thread that built it",
            self.shared.name
        );
        debug!("scheduler `{}` stopping", self.shared.name);

        self.stopped = true;
        self.shared.shutdown();
        self.run_caller();

        for thread in &mut self.threads {
            thread.join();
        }
        self.threads.clear();
        if self.root_fiber.is_some() {
            runtime::unbind_scheduler();
        }

        let left = self.shared.queue.lock().len();
        if left > 0 {
            warn!("scheduler `{}` stopped with {} task(s) no worker could take", self.shared.name, left);
        }
        debug!("scheduler `{}` stopped", self.shared.name);
    }

    /// Runs the caller's dispatch loop, in caller-participates mode, until it
    /// exits: once the scheduler is stopping and nothing queued is left for
    /// worker 0.
    fn run_caller(&self) {
        let Some(fiber) = &self.root_fiber else {
            return;
        };
        if fiber.state() == State::Ready {
            fiber.resume();
            debug!("scheduler `{}`: the caller's dispatch loop finished", self.shared.name);
        }
    }

    pub fn enqueue(&self, task: impl Into<Task>, affinity: Option<usize>) {
        self.shared.enqueue(task.into(), affinity);
    }

    pub fn spawn<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.enqueue(Task::callback(f), None);
    }

    pub fn spawn_on<F>(&self, worker: usize, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.enqueue(Task::callback(f), Some(worker));
    }

    pub fn handle(&self) -> Handle {
        Handle { shared: Arc::clone(&self.shared) }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Worker threads spawned by `start`, not counting a participating caller.
    pub fn thread_count(&self) -> usize {
        self.thread_count
    }

    /// Ids of every thread serving this scheduler, the caller's first.
    pub fn thread_ids(&self) -> &[usize] {
        &self.thread_ids
    }

    pub fn active_threads(&self) -> usize {
        self.shared.active.load(Ordering::Acquire)
    }

    pub fn idle_threads(&self) -> usize {
        self.shared.idle.load(Ordering::Acquire)
    }

    pub fn has_idle_threads(&self) -> bool {
        self.idle_threads() > 0
    }

    pub fn pending_tasks(&self) -> usize {
        self.shared.queue.lock().len()
    }

    pub fn is_stopping(&self) -> bool {
        self.shared.is_stopping()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("name", &self.shared.name)
            .field("thread_ids", &self.thread_ids)
            .field("use_caller", &self.root_fiber.is_some())
            .field("stopping", &self.shared.is_stopping())
            .finish()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if self.stopped {
            return;
        }
        if thread::current().id() == self.shared.root_thread {
            self.stop();
            return;
        }
        // Off the root thread the caller's loop cannot run; the worker threads
        // still exit and are joined as they drop. The root thread drops its
        // stale binding the next time it looks it up.
        warn!("scheduler `{}` dropped without stop() off its root thread", self.shared.name);
        self.stopped = true;
        self.shared.shutdown();
    }
}

/// A cloneable enqueue-only view of a scheduler, usable from any thread.
#[derive(Clone)]
pub struct Handle {
    shared: Arc<Shared>,
}

impl Handle {
    /// The scheduler the calling thread serves, if any.
    pub fn current() -> Option<Self> {
        runtime::scheduler().map(|shared| Self { shared })
    }

    pub fn enqueue(&self, task: impl Into<Task>, affinity: Option<usize>) {
        self.shared.enqueue(task.into(), affinity);
    }

    pub fn spawn<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.enqueue(Task::callback(f), None);
    }

    pub fn spawn_on<F>(&self, worker: usize, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.enqueue(Task::callback(f), Some(worker));
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn is_stopping(&self) -> bool {
        self.shared.is_stopping()
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle").field("name", &self.shared.name).finish()
    }
}

/// State shared by a scheduler, its handles, and every dispatch loop.
pub(crate) struct Shared {
    name: String,
    queue: Mutex<TaskQueue>,
    active: AtomicUsize,
    idle: AtomicUsize,
    stopping: AtomicBool,
    signal: Tickle,
    stack_size: usize,
    root_thread: ThreadId,
    /// Every thread serving the scheduler, a participating caller included.
    workers: usize,
}

impl Shared {
    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    fn tickle(&self) {
        self.signal.notify();
    }

    /// Marks the scheduler stopping and wakes every worker to notice it.
    pub(crate) fn shutdown(&self) {
        self.stopping.store(true, Ordering::Release);
        for _ in 0..self.workers {
            self.tickle();
        }
    }

    fn enqueue(&self, task: Task, affinity: Option<usize>) {
        if self.is_stopping() {
            debug!("scheduler `{}` is stopping; {:?} may never run", self.name, task);
        }
        trace!("scheduler `{}`: enqueue {:?} on {:?}", self.name, task, affinity);
        self.queue.lock().push(task, affinity);
        self.tickle();
    }

    /// The dispatch loop. Runs once per worker thread, and on the caller's
    /// scheduling fiber in caller-participates mode.
    fn run(self: &Arc<Self>) {
        let worker = runtime::worker_id();
        debug!("scheduler `{}`: dispatch loop starts on worker {}", self.name, worker);

        runtime::set_scheduler(Some(Arc::downgrade(self)));
        let on_root_thread = thread::current().id() == self.root_thread;
        if !on_root_thread {
            runtime::set_scheduler_fiber(Some(runtime::root_fiber_id()));
        }

        let idle_fiber = {
            let shared = Arc::clone(self);
            match Fiber::new(move || shared.idle(), self.stack_size, true) {
                Ok(fiber) => fiber,
                Err(err) => {
                    error!("scheduler `{}`: worker {} has no idle fiber: {}", self.name, worker, err);
                    return;
                }
            }
        };
        // Reused for callbacks; only ever holds a terminated fiber.
        let mut callback_fiber: Option<Arc<Fiber>> = None;

        loop {
            // Read before scanning: whatever was queued before the stop is seen.
            let stopping = self.is_stopping();
            let (task, tickle_me) = {
                let mut queue = self.queue.lock();
                let (task, more) = queue.take_for(worker);
                if task.is_some() {
                    self.active.fetch_add(1, Ordering::AcqRel);
                }
                (task, more)
            };
            if tickle_me {
                self.tickle();
            }

            match task {
                Some(Task::Fiber(fiber)) => {
                    self.dispatch(&fiber);
                    self.active.fetch_sub(1, Ordering::AcqRel);
                }
                Some(Task::Callback(callback)) => {
                    let fiber = match callback_fiber.take() {
                        Some(fiber) => {
                            fiber.reset(callback);
                            Ok(fiber)
                        }
                        None => Fiber::new(callback, self.stack_size, true),
                    };
                    match fiber {
                        Ok(fiber) => {
                            self.dispatch(&fiber);
                            if fiber.state() == State::Term {
                                callback_fiber = Some(fiber);
                            }
                        }
                        Err(err) => error!("scheduler `{}`: dropping a callback: {}", self.name, err),
                    }
                    self.active.fetch_sub(1, Ordering::AcqRel);
                }
                None => {
                    if stopping || idle_fiber.state() == State::Term {
                        break;
                    }
                    self.idle.fetch_add(1, Ordering::AcqRel);
                    idle_fiber.resume();
                    self.idle.fetch_sub(1, Ordering::AcqRel);
                }
            }
        }

        // Let a parked idle fiber see the stop and unwind.
        if idle_fiber.state() == State::Ready {
            idle_fiber.resume();
        }
        if !on_root_thread {
            runtime::unbind_scheduler();
        }
        debug!("scheduler `{}`: dispatch loop ends on worker {}", self.name, worker);
    }

    fn dispatch(&self, fiber: &Fiber) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| fiber.resume())) {
            error!(
                "scheduler `{}`: fiber {} panicked: {}",
                self.name,
                fiber.id(),
                panic_message(&*payload)
            );
        }
    }

    /// Body of each worker's idle fiber.
    fn idle(&self) {
        loop {
            self.signal.wait(&self.stopping);
            if self.is_stopping() {
                break;
            }
            trace!("scheduler `{}`: worker {} woken", self.name, runtime::worker_id());
            fiber::yield_now();
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        return msg;
    }
    match payload.downcast_ref::<String>() {
        Some(msg) => msg.as_str(),
        None => "non-string panic payload",
    }
}
