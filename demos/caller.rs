//! The constructing thread is worker 0: tasks pinned to it only run once
//! `stop` hands the thread over to the scheduler.

use std::thread;

use fiber::Scheduler;

fn main() -> Result<(), fiber::SchedulerError> {
    fiber::logging::initialize();
    let mut scheduler = Scheduler::new(3, true, "caller")?;

    for i in 0..5 {
        scheduler.spawn_on(0, move || {
            println!("pinned task {i} on {:?}", thread::current().name());
        });
        scheduler.spawn(move || {
            println!("task {i} on worker {}", fiber::scheduler::current_worker_id());
        });
    }
    scheduler.start()?;
    println!("started workers {:?}", scheduler.thread_ids());
    scheduler.stop();

    Ok(())
}
