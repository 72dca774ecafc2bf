//! Error types.

use std::io;

use context::stack::StackError;

#[derive(Debug, thiserror::Error)]
pub enum FiberError {
    #[error("failed to allocate a {size}-byte fiber stack: {cause:?}")]
    StackAlloc { size: usize, cause: StackError },
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("a scheduler needs at least one worker")]
    InvalidWorkerCount,

    #[error("this thread already runs a caller-participating scheduler")]
    AlreadyBound,

    #[error("scheduler `{0}` is stopped")]
    Stopped(String),

    #[error("the main task of scheduler `{0}` did not run to completion")]
    Incomplete(String),

    #[error("failed to spawn a worker thread: {0}")]
    Spawn(#[from] io::Error),

    #[error(transparent)]
    Fiber(#[from] FiberError),
}
