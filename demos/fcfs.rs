//! First-come-first-served on a single worker: callbacks and fibers run in
//! the order they were enqueued.

use std::time::Instant;

use fiber::{Fiber, Scheduler};
use log::info;

fn main() -> Result<(), fiber::SchedulerError> {
    fiber::logging::initialize();
    let mut scheduler = Scheduler::new(1, false, "fcfs")?;

    let start = Instant::now();
    for i in 0..20 {
        scheduler.spawn(move || println!("callback {i}"));
    }
    for i in 0..20 {
        scheduler.enqueue(Fiber::from_fn(move || println!("fiber {i}"))?, None);
    }
    scheduler.start()?;
    scheduler.stop();

    info!("40 tasks in {:?}", start.elapsed());
    Ok(())
}
