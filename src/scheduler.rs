//! The FIFO scheduler (spec component F): couples the precedence graph's
//! readiness tracking (via the scheduling graph's `on_reach` wakers) to a
//! single ready queue, with no priorities. Workers drive it through
//! `consume`; `activate` is the single path by which a task becomes
//! eligible to run, whether called right after insertion (pre-event already
//! reached) or later, when a predecessor's post-event cascades into it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::queue::SegQueue;
use parking_lot::{Condvar, Mutex};

use crate::access::AccessPolicy;
use crate::event::EventGraph;
use crate::space::TaskSpace;
use crate::task::{self, TaskHandle, TaskId};

/// Condvar-based park/notify bound to a generation counter, so that a
/// `notify_all` racing ahead of a `park_since` is never lost: the parker
/// re-reads the counter after re-acquiring the lock and returns immediately
/// if it has already moved, instead of waiting on a signal nobody will ever
/// send again. `notify_all` with nobody parked is a cheap no-op: it bumps
/// the counter and wakes zero waiters.
pub(crate) struct Notifier {
    generation: Mutex<u64>,
    cv: Condvar,
}

impl Notifier {
    fn new() -> Self {
        Notifier {
            generation: Mutex::new(0),
            cv: Condvar::new(),
        }
    }

    pub(crate) fn notify_all(&self) {
        let mut generation = self.generation.lock();
        *generation = generation.wrapping_add(1);
        self.cv.notify_all();
    }

    pub(crate) fn current(&self) -> u64 {
        *self.generation.lock()
    }

    /// Park until the generation counter moves past `since`, or a bounded
    /// timeout elapses (a defensive upper bound on staleness, in case a
    /// notification and this call's setup race in a way that still leaves
    /// work pending without a matching wakeup).
    pub(crate) fn park_since(&self, since: u64) {
        let mut generation = self.generation.lock();
        if *generation != since {
            return;
        }
        self.cv.wait_for(&mut generation, Duration::from_millis(50));
    }
}

/// Ready queue + running set + poison flag, shared by every worker in the
/// pool and by the `Runtime` that owns them.
pub struct FifoScheduler<P: AccessPolicy> {
    ready: SegQueue<Arc<TaskHandle<P>>>,
    running: Mutex<Vec<Arc<TaskHandle<P>>>>,
    events: Arc<EventGraph>,
    pub(crate) notifier: Notifier,
    poisoned: Arc<AtomicBool>,
}

impl<P: AccessPolicy> FifoScheduler<P> {
    pub fn new(events: Arc<EventGraph>, poisoned: Arc<AtomicBool>) -> Arc<Self> {
        Arc::new(FifoScheduler {
            ready: SegQueue::new(),
            running: Mutex::new(Vec::new()),
            events,
            notifier: Notifier::new(),
            poisoned,
        })
    }

    /// Register `task` for activation: an `on_reach` waker on its pre-event
    /// that calls back into `activate`. Fires immediately, inline, if the
    /// pre-event already happens to be reached by the time this is called.
    /// Must be called before the task is wired into its precedence graph
    /// (whose insertion may itself release the pre-event), so the waker is
    /// already in place when that release happens.
    pub fn register(self: &Arc<Self>, task: Arc<TaskHandle<P>>) {
        let scheduler = self.clone();
        let target = task.clone();
        self.events
            .on_reach(task.pre, Box::new(move || scheduler.activate(target)));
    }

    /// Called when `task.pre` is reached (via the waker `register` set up),
    /// or directly after a yielded task's wait event is reached. Guards
    /// against concurrent double-activation with `in_activation_queue`,
    /// then pushes onto the ready queue exactly once via `in_ready_list`.
    pub fn activate(self: &Arc<Self>, task: Arc<TaskHandle<P>>) {
        if task.in_activation_queue.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.events.is_reached(task.pre) && !task.in_ready_list.swap(true, Ordering::AcqRel) {
            log::debug!("task {} ready, enqueued", task.id);
            task.in_activation_queue.store(false, Ordering::Release);
            self.ready.push(task);
            self.notifier.notify_all();
            return;
        }
        task.in_activation_queue.store(false, Ordering::Release);
    }

    /// Called by a worker. Pops a ready task and runs (or resumes) it one
    /// step. Returns `false` if there was nothing to do (ready queue empty
    /// after draining pending space insertions), in which case the caller
    /// should park.
    pub fn consume(self: &Arc<Self>, space: &Arc<TaskSpace<P>>) -> bool {
        let task = match self.ready.pop() {
            Some(task) => task,
            None => {
                space.init_until_ready();
                match self.ready.pop() {
                    Some(task) => task,
                    None => return false,
                }
            }
        };

        self.running.lock().push(task.clone());
        // Cleared before invoking so a yield-then-reach race (the event the
        // body is about to yield on gets reached between this point and the
        // registration below) still results in the task being re-enqueued.
        task.in_ready_list.store(false, Ordering::Release);

        let finished = task::with_current_task(task.clone(), || task::invoke(&task));

        if finished {
            self.remove_from_running(task.id);
            // The vertex is retired from its space regardless of how the
            // task ended, so a faulted task doesn't leave a phantom vertex
            // behind that keeps its space (and every ancestor space) from
            // ever reporting empty again.
            if let Some(owning_space) = task.space.upgrade() {
                owning_space.remove(task.id);
            }
            if task.faulted() {
                log::error!("task {} body panicked; runtime poisoned", task.id);
                self.poisoned.store(true, Ordering::SeqCst);
                // Deliberately do not reach `task.post`: a faulted task's
                // successors must never start (spec.md §7 BodyFault).
            } else {
                self.events.reach(task.post);
            }
            self.notifier.notify_all();
        } else {
            let event = task
                .pending_event()
                .expect("a task that yielded must have recorded its pending event");
            let scheduler = self.clone();
            let waiting = task.clone();
            self.events
                .on_reach(event, Box::new(move || scheduler.activate(waiting)));
        }
        true
    }

    fn remove_from_running(&self, task_id: TaskId) {
        self.running.lock().retain(|t| t.id != task_id);
    }

    /// Number of tasks currently executing or parked mid-yield. Diagnostic
    /// only; not used by any scheduling decision.
    pub fn running_count(&self) -> usize {
        self.running.lock().len()
    }
}
