//! Fiber is a library of stackful, cooperatively scheduled fibers.
//! It provides an M:N scheduler that dispatches fibers and callbacks over a
//! fixed pool of worker threads, optionally counting the calling thread as one.

pub mod config;
pub mod error;
pub mod fiber;
pub mod logging;
pub mod runtime;
pub mod scheduler;

pub use error::{FiberError, SchedulerError};
pub use fiber::{Fiber, FiberId, State};
pub use scheduler::{Handle, Scheduler, Task};

pub use fiber_macros::main;
