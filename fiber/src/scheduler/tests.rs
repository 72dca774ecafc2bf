use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use super::*;
use crate::logging;

fn recorder<T>() -> Arc<Mutex<Vec<T>>> {
    Arc::new(Mutex::new(Vec::new()))
}

#[test]
fn test_single_worker_runs_callbacks_in_order() {
    logging::initialize();
    let out = recorder();
    let mut scheduler = Scheduler::new(1, false, "fcfs").unwrap();
    for i in 0..20 {
        let out = out.clone();
        scheduler.spawn(move || out.lock().push(i));
    }
    scheduler.start().unwrap();
    scheduler.stop();

    assert_eq!(*out.lock(), (0..20).collect::<Vec<_>>());
}

#[test]
fn test_single_worker_runs_fibers_in_order() {
    logging::initialize();
    let out = recorder();
    let mut scheduler = Scheduler::new(1, false, "fcfs_fibers").unwrap();
    for i in 0..20 {
        let out = out.clone();
        let fiber = Fiber::from_fn(move || out.lock().push(i)).unwrap();
        scheduler.enqueue(fiber, None);
    }
    scheduler.start().unwrap();
    scheduler.stop();

    assert_eq!(*out.lock(), (0..20).collect::<Vec<_>>());
}

#[test]
fn test_caller_participates() {
    logging::initialize();
    let ran_on = recorder();
    let mut scheduler = Scheduler::new(3, true, "caller").unwrap();
    assert_eq!(scheduler.thread_count(), 2);
    assert_eq!(scheduler.thread_ids(), &[0]);

    for _ in 0..5 {
        let ran_on = ran_on.clone();
        scheduler.spawn_on(0, move || ran_on.lock().push(thread::current().id()));
    }
    scheduler.start().unwrap();
    assert_eq!(scheduler.thread_ids(), &[0, 1, 2]);

    // Only the caller may take these, and it only dispatches inside stop().
    thread::sleep(Duration::from_millis(20));
    assert!(ran_on.lock().is_empty());
    scheduler.stop();

    let ran_on = ran_on.lock();
    assert_eq!(ran_on.len(), 5);
    assert!(ran_on.iter().all(|id| *id == thread::current().id()));
}

#[test]
fn test_affinity_is_honoured_in_fifo_order() {
    logging::initialize();
    let pinned = recorder();
    let unpinned = Arc::new(AtomicUsize::new(0));
    let mut scheduler = Scheduler::new(3, false, "affinity").unwrap();

    for i in 0..5 {
        let pinned = pinned.clone();
        scheduler.spawn_on(2, move || pinned.lock().push((current_worker_id(), i)));
        let unpinned = unpinned.clone();
        scheduler.spawn(move || {
            unpinned.fetch_add(1, Ordering::SeqCst);
        });
    }
    scheduler.start().unwrap();
    scheduler.stop();

    assert_eq!(*pinned.lock(), (0..5).map(|i| (2, i)).collect::<Vec<_>>());
    assert_eq!(unpinned.load(Ordering::SeqCst), 5);
}

#[test]
fn test_workers_are_named_after_scheduler() {
    logging::initialize();
    let names = recorder();
    let mut scheduler = Scheduler::new(2, false, "named").unwrap();
    for worker in 1..=2 {
        let names = names.clone();
        scheduler.spawn_on(worker, move || {
            let name = thread::current().name().map(str::to_string);
            names.lock().push((current_worker_id(), name));
        });
    }
    scheduler.start().unwrap();
    scheduler.stop();

    let mut names = names.lock().clone();
    names.sort();
    assert_eq!(
        names,
        vec![(1, Some("named_1".to_string())), (2, Some("named_2".to_string()))]
    );
}

#[test]
fn test_graceful_shutdown_settles_counters() {
    logging::initialize();
    let hits = Arc::new(AtomicUsize::new(0));
    let mut scheduler = Scheduler::new(2, true, "shutdown").unwrap();
    for _ in 0..50 {
        let hits = hits.clone();
        scheduler.spawn(move || {
            hits.fetch_add(1, Ordering::SeqCst);
        });
    }
    scheduler.start().unwrap();
    scheduler.stop();

    assert_eq!(hits.load(Ordering::SeqCst), 50);
    assert!(scheduler.is_stopping());
    assert_eq!(scheduler.active_threads(), 0);
    assert_eq!(scheduler.idle_threads(), 0);
    assert!(!scheduler.has_idle_threads());
    assert_eq!(scheduler.pending_tasks(), 0);
}

#[test]
fn test_idle_workers_are_counted() {
    logging::initialize();
    let mut scheduler = Scheduler::new(2, false, "idle").unwrap();
    scheduler.start().unwrap();
    thread::sleep(Duration::from_millis(50));

    assert!(scheduler.has_idle_threads());
    assert_eq!(scheduler.active_threads(), 0);
    scheduler.stop();
    assert_eq!(scheduler.idle_threads(), 0);
}

#[test]
fn test_lifecycle_misuse() {
    logging::initialize();
    assert!(matches!(Scheduler::new(0, false, "none"), Err(SchedulerError::InvalidWorkerCount)));

    let mut scheduler = Scheduler::new(1, false, "lifecycle").unwrap();
    scheduler.start().unwrap();
    scheduler.start().unwrap();
    assert_eq!(scheduler.thread_ids(), &[1]);

    scheduler.stop();
    scheduler.stop();
    assert!(matches!(scheduler.start(), Err(SchedulerError::Stopped(name)) if name == "lifecycle"));
}

#[test]
fn test_one_caller_scheduler_per_thread() {
    logging::initialize();
    let mut first = Scheduler::new(1, true, "first").unwrap();
    assert!(matches!(Scheduler::new(1, true, "second"), Err(SchedulerError::AlreadyBound)));
    // A scheduler that does not use the caller can still be built here.
    let mut other = Scheduler::new(1, false, "other").unwrap();
    other.start().unwrap();
    other.stop();

    first.start().unwrap();
    first.stop();
    let mut second = Scheduler::new(1, true, "second").unwrap();
    second.start().unwrap();
    second.stop();
}

#[test]
fn test_panicking_task_keeps_worker_alive() {
    logging::initialize();
    let hits = Arc::new(AtomicUsize::new(0));
    let mut scheduler = Scheduler::new(1, false, "panics").unwrap();
    scheduler.spawn(|| panic!("task failure"));
    let h = hits.clone();
    scheduler.enqueue(Fiber::from_fn(|| panic!("fiber failure")).unwrap(), None);
    scheduler.spawn(move || {
        h.fetch_add(1, Ordering::SeqCst);
    });
    scheduler.start().unwrap();
    scheduler.stop();

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.active_threads(), 0);
}

#[test]
fn test_handle_current() {
    logging::initialize();
    assert!(Handle::current().is_none());

    let seen = recorder();
    let mut scheduler = Scheduler::new(2, true, "handles").unwrap();
    for worker in 0..2 {
        let seen = seen.clone();
        scheduler.spawn_on(worker, move || {
            let name = Handle::current().map(|h| h.name().to_string());
            seen.lock().push(name);
        });
    }
    scheduler.start().unwrap();
    scheduler.stop();

    assert_eq!(*seen.lock(), vec![Some("handles".to_string()); 2]);
    assert!(Handle::current().is_none());
}

#[test]
fn test_handle_enqueues_from_other_threads() {
    logging::initialize();
    let hits = Arc::new(AtomicUsize::new(0));
    let mut scheduler = Scheduler::new(2, false, "remote").unwrap();
    scheduler.start().unwrap();

    let handle = scheduler.handle();
    let h = hits.clone();
    thread::spawn(move || {
        for _ in 0..10 {
            let h = h.clone();
            handle.spawn(move || {
                h.fetch_add(1, Ordering::SeqCst);
            });
        }
    })
    .join()
    .unwrap();
    scheduler.stop();

    assert_eq!(hits.load(Ordering::SeqCst), 10);
}

#[test]
fn test_yield_now_interleaves_tasks() {
    logging::initialize();
    let out = recorder();
    let mut scheduler = Scheduler::new(1, false, "yields").unwrap();
    for tag in ["a", "b"] {
        let out = out.clone();
        scheduler.spawn(move || {
            out.lock().push(format!("{tag}1"));
            yield_now();
            out.lock().push(format!("{tag}2"));
        });
    }
    scheduler.start().unwrap();
    scheduler.stop();

    assert_eq!(*out.lock(), vec!["a1", "b1", "a2", "b2"]);
}

#[test]
fn test_fiber_task_runs_as_itself() {
    logging::initialize();
    let seen = Arc::new(Mutex::new(None));
    let s = seen.clone();
    let fiber = Fiber::from_fn(move || *s.lock() = Some(Fiber::current())).unwrap();

    let mut scheduler = Scheduler::new(1, true, "identity").unwrap();
    scheduler.enqueue(fiber.clone(), None);
    scheduler.start().unwrap();
    scheduler.stop();

    let seen = seen.lock().take().unwrap();
    assert!(Arc::ptr_eq(&seen, &fiber));
    assert_eq!(fiber.state(), State::Term);
}

#[test]
fn test_terminated_fiber_in_queue_is_skipped() {
    logging::initialize();
    let fiber = Fiber::from_fn(|| {}).unwrap();
    fiber.resume();

    let hits = Arc::new(AtomicUsize::new(0));
    let h = hits.clone();
    let mut scheduler = Scheduler::new(1, false, "dead").unwrap();
    scheduler.enqueue(fiber, None);
    scheduler.spawn(move || {
        h.fetch_add(1, Ordering::SeqCst);
    });
    scheduler.start().unwrap();
    scheduler.stop();

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.pending_tasks(), 0);
}

#[test]
fn test_task_pinned_to_missing_worker_stays_queued() {
    logging::initialize();
    let mut scheduler = Scheduler::new(1, false, "orphan").unwrap();
    scheduler.spawn_on(7, || unreachable!("no worker 7"));
    scheduler.start().unwrap();
    scheduler.stop();

    assert_eq!(scheduler.pending_tasks(), 1);
}

#[test]
fn test_pinned_tasks_finish_during_stop() {
    logging::initialize();
    let hits = Arc::new(AtomicUsize::new(0));
    let mut scheduler = Scheduler::new(3, false, "pinned_stop").unwrap();
    scheduler.start().unwrap();
    for i in 0..30 {
        let hits = hits.clone();
        scheduler.spawn_on(1 + i % 3, move || {
            hits.fetch_add(1, Ordering::SeqCst);
        });
    }
    scheduler.stop();

    assert_eq!(hits.load(Ordering::SeqCst), 30);
    assert_eq!(scheduler.active_threads(), 0);
}

#[test]
fn test_many_workers_many_tasks() {
    logging::initialize();
    for use_caller in [false, true] {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::builder()
            .workers(4)
            .use_caller(use_caller)
            .name("many")
            .stack_size(64 * 1024)
            .idle_interval(Duration::from_millis(1))
            .build()
            .unwrap();
        scheduler.start().unwrap();
        for _ in 0..100 {
            let hits = hits.clone();
            scheduler.spawn(move || {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }
        scheduler.stop();

        assert_eq!(hits.load(Ordering::SeqCst), 100);
    }
}

#[test]
fn test_drop_stops_scheduler() {
    logging::initialize();
    let hits = Arc::new(AtomicUsize::new(0));
    {
        let mut scheduler = Scheduler::new(2, true, "dropped").unwrap();
        scheduler.start().unwrap();
        for _ in 0..10 {
            let hits = hits.clone();
            scheduler.spawn(move || {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }
    }

    assert_eq!(hits.load(Ordering::SeqCst), 10);
    assert!(Handle::current().is_none());
}

#[test]
fn test_stop_off_root_thread_panics() {
    logging::initialize();
    let mut scheduler = Scheduler::new(1, false, "foreign").unwrap();
    scheduler.start().unwrap();

    let result = thread::spawn(move || scheduler.stop()).join();
    assert!(result.is_err());
}

#[test]
fn test_block_on_returns_value() {
    logging::initialize();
    let hits = Arc::new(AtomicUsize::new(0));
    let h = hits.clone();
    let value = block_on(2, "block_on", move || {
        let handle = Handle::current().unwrap();
        for _ in 0..10 {
            let h = h.clone();
            handle.spawn(move || {
                h.fetch_add(1, Ordering::SeqCst);
            });
        }
        42
    })
    .unwrap();

    assert_eq!(value, 42);
    assert_eq!(hits.load(Ordering::SeqCst), 10);
}

#[test]
#[should_panic(expected = "inside block_on")]
fn test_block_on_propagates_panic() {
    logging::initialize();
    let _ = block_on(1, "block_on_panics", || panic!("inside block_on"));
}

#[test]
fn test_block_on_rejects_zero_workers() {
    assert!(matches!(
        block_on(0, "nothing", || ()),
        Err(SchedulerError::InvalidWorkerCount)
    ));
}

#[test]
fn test_block_on_keeps_workers_until_main_returns() {
    logging::initialize();
    let hits = Arc::new(AtomicUsize::new(0));
    let h = hits.clone();
    let ran_on = block_on(3, "block_on_pinned", move || {
        thread::sleep(Duration::from_millis(50));
        let me = current_worker_id();
        let other = if me == 1 { 2 } else { 1 };
        Handle::current().unwrap().spawn_on(other, move || {
            assert_eq!(current_worker_id(), other);
            h.fetch_add(1, Ordering::SeqCst);
        });
        me
    })
    .unwrap();

    assert!(ran_on <= 2);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn test_block_on_spreads_work_over_workers() {
    logging::initialize();
    let seen = recorder();
    let s = seen.clone();
    block_on(3, "block_on_spread", move || {
        let handle = Handle::current().unwrap();
        for worker in 0..3 {
            let s = s.clone();
            handle.spawn_on(worker, move || s.lock().push(current_worker_id()));
        }
        thread::sleep(Duration::from_millis(20));
    })
    .unwrap();

    let mut seen = seen.lock().clone();
    seen.sort();
    assert_eq!(seen, vec![0, 1, 2]);
}

#[test]
fn test_drop_off_root_thread_releases_caller() {
    logging::initialize();
    let mut scheduler = Scheduler::new(2, true, "moved").unwrap();
    scheduler.start().unwrap();
    thread::spawn(move || drop(scheduler)).join().unwrap();

    assert!(Handle::current().is_none());
    let fiber = Fiber::from_fn(|| {}).unwrap();
    fiber.resume();
    assert_eq!(fiber.state(), State::Term);

    let hits = Arc::new(AtomicUsize::new(0));
    let h = hits.clone();
    let mut rebuilt = Scheduler::new(1, true, "rebuilt").unwrap();
    rebuilt.spawn(move || {
        h.fetch_add(1, Ordering::SeqCst);
    });
    rebuilt.start().unwrap();
    rebuilt.stop();
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn test_root_yielding_fiber_skipped_by_caller() {
    logging::initialize();
    let hits = Arc::new(AtomicUsize::new(0));
    let h = hits.clone();
    let fiber = Fiber::new(
        move || {
            h.fetch_add(1, Ordering::SeqCst);
        },
        0,
        false,
    )
    .unwrap();

    // The caller's loop runs on its scheduling fiber and may not resume it.
    let mut scheduler = Scheduler::new(1, true, "root_yielding").unwrap();
    scheduler.enqueue(fiber.clone(), None);
    scheduler.start().unwrap();
    scheduler.stop();
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert_eq!(fiber.state(), State::Ready);
    assert_eq!(scheduler.pending_tasks(), 1);
    drop(scheduler);

    // A worker thread resumes it from its root fiber.
    let mut scheduler = Scheduler::new(2, true, "root_yielding_worker").unwrap();
    scheduler.enqueue(fiber.clone(), None);
    scheduler.start().unwrap();
    scheduler.stop();
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(fiber.state(), State::Term);
}
