//! Compile-time defaults. Everything here can be overridden per fiber or per scheduler.

use std::time::Duration;

/// Stack size of a task fiber created with a stack size of 0.
pub const DEFAULT_STACK_SIZE: usize = 128_000;

/// Longest stretch an idle worker sleeps before re-checking for work.
pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_millis(2);

pub const DEFAULT_SCHEDULER_NAME: &str = "scheduler";
