//! The top-level library surface (spec.md §6): lifecycle, task submission,
//! and the introspection/patch/yield primitives callable from inside a
//! running task's body.
//!
//! Per spec.md §9's own design note ("Global mutable state... represent as
//! a runtime handle explicitly threaded through library calls"), there is
//! no process-wide singleton: `Runtime<P>` is an owned handle, and Rust's
//! ownership rules give `AlreadyInitialized`/`NotInitialized` misuse for
//! free at compile time (you cannot call `emplace_task` on a `Runtime`
//! `finalize` already consumed). Both variants remain in `RuntimeError`
//! (spec.md §7 names them as part of the taxonomy) for embedders who wrap
//! this handle behind their own global accessor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::access::AccessPolicy;
use crate::error::RuntimeError;
use crate::event::{EventGraph, EventId};
use crate::future::TaskFuture;
use crate::scheduler::FifoScheduler;
use crate::space::TaskSpace;
use crate::task::{self, TaskHandle, TaskId};
use crate::worker::WorkerPool;

/// An embeddable task-graph runtime instance over property type `P`.
pub struct Runtime<P: AccessPolicy> {
    events: Arc<EventGraph>,
    root: Arc<TaskSpace<P>>,
    scheduler: Arc<FifoScheduler<P>>,
    pool: Mutex<Option<WorkerPool<P>>>,
    poisoned: Arc<AtomicBool>,
}

impl<P: AccessPolicy> Runtime<P> {
    /// Initialize the root space and start `n_threads` workers (or
    /// `std::thread::available_parallelism()` if `0`).
    pub fn init(n_threads: usize) -> Self {
        let events = Arc::new(EventGraph::new());
        let root = TaskSpace::root();
        let poisoned = Arc::new(AtomicBool::new(false));
        let scheduler = FifoScheduler::new(events.clone(), poisoned.clone());
        let pool = WorkerPool::start(n_threads, scheduler.clone(), root.clone(), poisoned.clone());
        log::info!("runtime initialized");
        Runtime {
            events,
            root,
            scheduler,
            pool: Mutex::new(Some(pool)),
            poisoned,
        }
    }

    /// Submit `body` as a new task in the current space: the current
    /// task's child space if called from inside a task (created lazily on
    /// first spawn), or the root space otherwise.
    ///
    /// `properties` is checked against the calling task's own properties
    /// via [`AccessPolicy::assert_superset`] before the task is created;
    /// violating containment fails fast with
    /// [`RuntimeError::ScopeViolation`] and no task is created.
    pub fn emplace_task<R, B>(&self, properties: P, body: B) -> Result<TaskFuture<R>, RuntimeError>
    where
        B: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.poisoned.load(Ordering::SeqCst) {
            return Err(RuntimeError::BodyFault);
        }

        let (parent_weak, depth, space): (Option<Weak<TaskHandle<P>>>, u32, Arc<TaskSpace<P>>) =
            match task::current_task::<P>() {
                Some(parent) => {
                    P::assert_superset(&parent.properties(), &properties)?;
                    let parent_space = parent
                        .space
                        .upgrade()
                        .expect("a running task's own space must still be alive");
                    let parent_for_child = parent.clone();
                    let parent_space_for_child = parent_space.clone();
                    let child = parent.child_space(move || {
                        let space =
                            TaskSpace::child(Arc::downgrade(&parent_for_child), parent_for_child.depth + 1);
                        parent_space_for_child.register_child(&space);
                        space
                    });
                    (Some(Arc::downgrade(&parent)), parent.depth + 1, child)
                }
                None => (None, 0, self.root.clone()),
            };

        let slot = Arc::new(Mutex::new(None));
        let result_slot = slot.clone();
        let wrapped: Box<dyn FnOnce() + Send> = Box::new(move || {
            let result = body();
            *result_slot.lock() = Some(result);
        });

        let pre = self.events.create_event();
        let post = self.events.create_event();
        let task = TaskHandle::new(properties, wrapped, pre, post, parent_weak, Arc::downgrade(&space), depth);

        // Register the activation waker *before* wiring the task into its
        // space's precedence graph, since wiring may itself release the
        // pre-event synchronously.
        self.scheduler.register(task.clone());
        space.push(task.clone(), &self.events);

        Ok(TaskFuture::new(slot, self.events.clone(), post, self.poisoned.clone()))
    }

    /// The currently running task's id. `Err(NotInTask)` outside a task.
    pub fn current_task_id(&self) -> Result<TaskId, RuntimeError> {
        task::current_task::<P>()
            .map(|t| t.id)
            .ok_or(RuntimeError::NotInTask)
    }

    /// The sequence of properties from the currently running task up to
    /// (and including) its root ancestor.
    pub fn backtrace(&self) -> Result<Vec<P>, RuntimeError> {
        let mut current = task::current_task::<P>().ok_or(RuntimeError::NotInTask)?;
        let mut trail = vec![current.properties()];
        while let Some(parent) = current.parent.as_ref().and_then(Weak::upgrade) {
            trail.push(parent.properties());
            current = parent;
        }
        Ok(trail)
    }

    /// The currently running task's scope depth (root tasks are depth 0).
    pub fn scope_depth(&self) -> Result<u32, RuntimeError> {
        task::current_task::<P>()
            .map(|t| t.depth)
            .ok_or(RuntimeError::NotInTask)
    }

    /// Create a new event and register it as an in-edge of the currently
    /// running task's post-event, so the task is not considered finished
    /// until the returned event is also reached.
    pub fn create_event(&self) -> Result<EventId, RuntimeError> {
        let task = task::current_task::<P>().ok_or(RuntimeError::NotInTask)?;
        let event = self.events.create_event();
        self.events
            .add_edge(event, task.post)
            .expect("a task's post-event cannot already be reached while its body is running");
        Ok(event)
    }

    /// Apply `patch` to the currently running task's properties. Patches
    /// may only weaken precedence constraints; one that would add an edge
    /// is rejected with [`RuntimeError::PatchStrengthening`] and not
    /// applied.
    pub fn update_properties(&self, patch: &P::Patch) -> Result<(), RuntimeError> {
        let task = task::current_task::<P>().ok_or(RuntimeError::NotInTask)?;
        let space = task
            .space
            .upgrade()
            .expect("a running task's own space must still be alive");
        space.graph().update(task.id, patch, &self.events)
    }

    /// Cooperatively suspend the currently running task until `event` is
    /// reached. `Err(NotInTask)` outside a task.
    pub fn yield_now(&self, event: EventId) -> Result<(), RuntimeError> {
        if !task::is_in_task() {
            return Err(RuntimeError::NotInTask);
        }
        task::yield_now(event);
        Ok(())
    }

    /// Reach `event` directly: the release primitive behind a task
    /// resuming another suspended task, or driving a [`create_event`]
    /// barrier event to completion.
    pub fn reach(&self, event: EventId) {
        self.events.reach(event);
    }

    /// Busy-idle (spinning on `std::thread::yield_now`) until the root
    /// space is empty or the runtime has been poisoned by a `BodyFault`.
    pub fn barrier(&self) {
        let guard = self.pool.lock();
        if let Some(pool) = guard.as_ref() {
            pool.barrier(std::thread::yield_now, &self.poisoned);
        }
    }

    /// Barrier, then stop the worker pool. Returns `Err(BodyFault)` if any
    /// task body panicked during this runtime's lifetime.
    ///
    /// Takes `&self`, not `self`, so callers can hold the runtime behind an
    /// `Arc` and clone that `Arc` into task bodies that need to call back
    /// into `emplace_task`/`create_event`/`yield_now` (spec.md §9's
    /// "runtime handle explicitly threaded through library calls"); a
    /// second `finalize` call after the pool has already been stopped is a
    /// no-op barrier followed by an immediate return.
    pub fn finalize(&self) -> Result<(), RuntimeError> {
        self.barrier();
        if let Some(pool) = self.pool.lock().take() {
            pool.stop();
        }
        log::info!("runtime finalized");
        if self.poisoned.load(Ordering::SeqCst) {
            Err(RuntimeError::BodyFault)
        } else {
            Ok(())
        }
    }
}
