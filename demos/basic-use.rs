use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use fiber::{Handle, scheduler};

#[fiber::main(workers = 4, name = "basic")]
fn main() {
    fiber::logging::initialize();
    let counter = Arc::new(AtomicUsize::new(0));
    let handle = Handle::current().expect("main runs inside a scheduler");
    for i in 0..10 {
        let c = counter.clone();
        handle.spawn(move || {
            for _ in 0..5 {
                let n = c.fetch_add(1, Ordering::SeqCst) + 1;
                println!("Task {} on worker {} incremented counter to {}", i, scheduler::current_worker_id(), n);
                scheduler::yield_now();
            }
        });
    }
    println!("Spawned 10 tasks from worker {}", scheduler::current_worker_id());
}
