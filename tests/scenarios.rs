//! Black-box scenarios from the runtime's testable properties: each drives
//! the public API the way an embedding application would, and asserts only
//! on directly observable state (a shared log, a counter, elapsed time) —
//! no internals are reached into from here.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use graphene_rt::{EventId, IoAccessBuilder, IoPatch, Mode, Runtime};

/// S1 — Write/write serialization. Two tasks writing the same resource,
/// submitted in order, must complete in submission order even though the
/// first sleeps longer than the second.
#[test]
fn s1_write_write_serializes() {
    let runtime = Runtime::init(4);
    let log = Arc::new(Mutex::new(Vec::new()));

    let log1 = log.clone();
    let t1 = runtime
        .emplace_task(IoAccessBuilder::new().write("x").build(), move || {
            std::thread::sleep(Duration::from_millis(50));
            log1.lock().unwrap().push(1);
        })
        .unwrap();
    let log2 = log.clone();
    let t2 = runtime
        .emplace_task(IoAccessBuilder::new().write("x").build(), move || {
            log2.lock().unwrap().push(2);
        })
        .unwrap();

    t1.get().unwrap();
    t2.get().unwrap();
    runtime.finalize().unwrap();
    assert_eq!(*log.lock().unwrap(), vec![1, 2]);
}

/// S2 — Read/read parallelism. Two readers of the same resource run
/// concurrently: total wall time is well under the sum of their individual
/// sleeps, and either interleaving of the log is acceptable.
#[test]
fn s2_read_read_runs_in_parallel() {
    let runtime = Runtime::init(4);
    let log = Arc::new(Mutex::new(Vec::new()));

    let started = Instant::now();
    let log1 = log.clone();
    let t1 = runtime
        .emplace_task(IoAccessBuilder::new().read("x").build(), move || {
            log1.lock().unwrap().push(1);
            std::thread::sleep(Duration::from_millis(100));
        })
        .unwrap();
    let log2 = log.clone();
    let t2 = runtime
        .emplace_task(IoAccessBuilder::new().read("x").build(), move || {
            log2.lock().unwrap().push(2);
            std::thread::sleep(Duration::from_millis(100));
        })
        .unwrap();

    t1.get().unwrap();
    t2.get().unwrap();
    let elapsed = started.elapsed();
    runtime.finalize().unwrap();

    assert!(
        elapsed < Duration::from_millis(150),
        "two readers should overlap, took {elapsed:?}"
    );
    let final_log = log.lock().unwrap().clone();
    assert!(final_log == vec![1, 2] || final_log == vec![2, 1]);
}

/// S3 — Child scope. A parent that writes `x` spawns a child that reads
/// `x` and awaits it; the parent only completes after the child, and a
/// sibling submitted after the parent observes the parent's writes.
#[test]
fn s3_child_scope_nests_under_parent_and_sibling_sees_its_effects() {
    let runtime = Arc::new(Runtime::init(4));
    let log = Arc::new(Mutex::new(Vec::new()));

    let runtime_for_parent = runtime.clone();
    let log_for_parent = log.clone();
    let parent = runtime
        .emplace_task(IoAccessBuilder::new().write("x").build(), move || {
            log_for_parent.lock().unwrap().push("parent-write");
            let log_for_child = log_for_parent.clone();
            let child = runtime_for_parent
                .emplace_task(IoAccessBuilder::new().read("x").build(), move || {
                    log_for_child.lock().unwrap().push("child-read");
                })
                .unwrap();
            child.get().unwrap();
            log_for_parent.lock().unwrap().push("parent-done");
        })
        .unwrap();

    let log_for_sibling = log.clone();
    let sibling = runtime
        .emplace_task(IoAccessBuilder::new().read("x").build(), move || {
            log_for_sibling.lock().unwrap().push("sibling-read");
        })
        .unwrap();

    parent.get().unwrap();
    sibling.get().unwrap();
    runtime.finalize().unwrap();

    let entries = log.lock().unwrap().clone();
    let parent_write = entries.iter().position(|e| *e == "parent-write").unwrap();
    let child_read = entries.iter().position(|e| *e == "child-read").unwrap();
    let parent_done = entries.iter().position(|e| *e == "parent-done").unwrap();
    let sibling_read = entries.iter().position(|e| *e == "sibling-read").unwrap();

    assert!(parent_write < child_read, "child must run after parent writes");
    assert!(child_read < parent_done, "parent must await its child");
    assert!(
        parent_done < sibling_read,
        "the sibling (submitted after the parent, same resource) must see the parent complete first"
    );
}

/// S4 — Yield on event. A task creates an event and yields on it; another
/// task reaches the event; the first resumes afterwards and its backtrace
/// still names it.
#[test]
fn s4_yield_on_event_resumes_after_reach() {
    let runtime = Arc::new(Runtime::init(4));
    let resumed = Arc::new(AtomicUsize::new(0));
    let ev_slot: Arc<Mutex<Option<EventId>>> = Arc::new(Mutex::new(None));

    let runtime_for_waiter = runtime.clone();
    let resumed_check = resumed.clone();
    let ev_slot_for_waiter = ev_slot.clone();
    let waiter = runtime
        .emplace_task(IoAccessBuilder::new().read("s4-waiter").build(), move || {
            let ev = runtime_for_waiter.create_event().unwrap();
            *ev_slot_for_waiter.lock().unwrap() = Some(ev);
            runtime_for_waiter.yield_now(ev).unwrap();
            resumed_check.fetch_add(1, Ordering::SeqCst);
            let trail = runtime_for_waiter.backtrace().unwrap();
            assert_eq!(trail.len(), 1, "a root task's backtrace is just itself");
        })
        .unwrap();

    // Poll until the waiter has published the event it yielded on; this is
    // test setup synchronization only, not part of the scenario itself.
    let ev = loop {
        if let Some(ev) = *ev_slot.lock().unwrap() {
            break ev;
        }
        std::thread::sleep(Duration::from_millis(5));
    };
    assert_eq!(resumed.load(Ordering::SeqCst), 0, "must not resume before the reach");

    let runtime_for_releaser = runtime.clone();
    let releaser = runtime
        .emplace_task(IoAccessBuilder::new().write("s4-releaser").build(), move || {
            runtime_for_releaser.reach(ev);
        })
        .unwrap();

    releaser.get().unwrap();
    waiter.get().unwrap();
    assert_eq!(resumed.load(Ordering::SeqCst), 1);
    runtime.finalize().unwrap();
}

/// S5 — Property patch. T1 writes `x`; T2 reads `x` and depends on it. Mid
/// execution T1 weakens its access to a read, so T2 becomes ready and
/// starts before T1 posts.
#[test]
fn s5_weakening_patch_unblocks_successor_before_predecessor_finishes() {
    let runtime = Arc::new(Runtime::init(4));
    let log = Arc::new(Mutex::new(Vec::new()));

    let runtime_for_t1 = runtime.clone();
    let log_for_t1 = log.clone();
    let t1 = runtime
        .emplace_task(IoAccessBuilder::new().write("x").build(), move || {
            std::thread::sleep(Duration::from_millis(20));
            runtime_for_t1
                .update_properties(&IoPatch::new().set("x", Mode::Read))
                .unwrap();
            std::thread::sleep(Duration::from_millis(60));
            log_for_t1.lock().unwrap().push("t1-done");
        })
        .unwrap();

    let log_for_t2 = log.clone();
    let t2 = runtime
        .emplace_task(IoAccessBuilder::new().read("x").build(), move || {
            log_for_t2.lock().unwrap().push("t2-start");
        })
        .unwrap();

    t1.get().unwrap();
    t2.get().unwrap();
    runtime.finalize().unwrap();

    let entries = log.lock().unwrap().clone();
    let t2_start = entries.iter().position(|e| *e == "t2-start").unwrap();
    let t1_done = entries.iter().position(|e| *e == "t1-done").unwrap();
    assert!(
        t2_start < t1_done,
        "t2 should start before t1 finishes once the write/read edge is weakened: {entries:?}"
    );
}

/// S6 — Barrier. A thousand independent tasks each increment a shared
/// counter; after `finalize` returns, every one of them has run.
#[test]
fn s6_barrier_waits_for_all_submitted_tasks() {
    let runtime = Runtime::init(8);
    let counter = Arc::new(AtomicUsize::new(0));

    for i in 0..1000 {
        let counter = counter.clone();
        runtime
            .emplace_task(IoAccessBuilder::new().atomic_add(format!("counter-{i}")).build(), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
    }

    runtime.finalize().unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 1000);
}

/// Testable property 4/5 (§8): a deeply nested chain of children always
/// has a backtrace of the expected length and ends at a root, and each
/// level reports depth = parent depth + 1.
#[test]
fn nested_children_report_increasing_depth_and_backtrace_length() {
    let runtime = Arc::new(Runtime::init(2));
    let depths = Arc::new(Mutex::new(Vec::new()));
    let trail_lens = Arc::new(Mutex::new(Vec::new()));

    let runtime_for_root = runtime.clone();
    let depths_for_root = depths.clone();
    let trail_lens_for_root = trail_lens.clone();
    let root_task = runtime
        .emplace_task(IoAccessBuilder::new().write("nest").build(), move || {
            depths_for_root
                .lock()
                .unwrap()
                .push(runtime_for_root.scope_depth().unwrap());
            trail_lens_for_root
                .lock()
                .unwrap()
                .push(runtime_for_root.backtrace().unwrap().len());

            let runtime_for_child = runtime_for_root.clone();
            let depths_for_child = depths_for_root.clone();
            let trail_lens_for_child = trail_lens_for_root.clone();
            let child = runtime_for_root
                .emplace_task(IoAccessBuilder::new().write("nest").build(), move || {
                    depths_for_child
                        .lock()
                        .unwrap()
                        .push(runtime_for_child.scope_depth().unwrap());
                    trail_lens_for_child
                        .lock()
                        .unwrap()
                        .push(runtime_for_child.backtrace().unwrap().len());
                })
                .unwrap();
            child.get().unwrap();
        })
        .unwrap();

    root_task.get().unwrap();
    runtime.finalize().unwrap();

    assert_eq!(*depths.lock().unwrap(), vec![0, 1]);
    assert_eq!(*trail_lens.lock().unwrap(), vec![1, 2]);
}

/// Scope violation: a child that declares an access its parent never
/// declared is rejected synchronously, and no task is created for it.
#[test]
fn child_declaring_an_unrelated_resource_is_rejected() {
    let runtime = Arc::new(Runtime::init(2));
    let runtime_for_parent = runtime.clone();
    let violation = Arc::new(Mutex::new(None));
    let violation_check = violation.clone();

    let parent = runtime
        .emplace_task(IoAccessBuilder::new().write("x").build(), move || {
            let result = runtime_for_parent
                .emplace_task(IoAccessBuilder::new().write("y").build(), || ());
            *violation_check.lock().unwrap() = Some(result.is_err());
        })
        .unwrap();

    parent.get().unwrap();
    runtime.finalize().unwrap();
    assert_eq!(*violation.lock().unwrap(), Some(true));
}
