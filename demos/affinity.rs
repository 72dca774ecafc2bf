//! Tasks pinned to one worker stay on it and keep their enqueue order.

use fiber::Scheduler;

fn main() -> Result<(), fiber::SchedulerError> {
    fiber::logging::initialize();
    let mut scheduler = Scheduler::builder().workers(3).use_caller(false).name("affinity").build()?;
    scheduler.start()?;

    for i in 0..5 {
        scheduler.spawn_on(2, move || {
            println!("pinned task {i} on worker {}", fiber::scheduler::current_worker_id());
            fiber::scheduler::yield_now();
            println!("pinned task {i} back on worker {}", fiber::scheduler::current_worker_id());
        });
        scheduler.spawn(move || {
            println!("free task {i} on worker {}", fiber::scheduler::current_worker_id());
        });
    }
    scheduler.stop();

    Ok(())
}
