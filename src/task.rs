//! The task entity and its cooperative, stackful execution contract.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use generator::{done, Gn, Scope};
use parking_lot::{Mutex, RwLock};

use crate::access::AccessPolicy;
use crate::event::EventId;
use crate::space::TaskSpace;

/// Process-wide, monotonically assigned task id.
pub type TaskId = u64;

fn next_task_id() -> TaskId {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

type Body = Box<dyn FnOnce() + Send>;

/// The stackful coroutine a task body runs in. Resume type `()`, yield
/// type `EventId`: `resume()` returns `Some(event)` while the body is
/// parked on `yield_now(event)`, and `None` once the body has run to
/// completion.
type TaskGen = generator::Generator<'static, (), EventId>;

struct SendGen(TaskGen);

// SAFETY: a task's continuation is only ever touched by the single
// worker currently holding the task in the scheduler's running set; a task
// is in the running set iff a worker is currently executing or has paused
// its body, and concurrent invoke() on the same task is forbidden by
// construction. The generator's internal stack therefore never crosses
// threads concurrently, only sequentially.
unsafe impl Send for SendGen {}

/// The unit of work.
pub struct TaskHandle<P: AccessPolicy> {
    pub id: TaskId,
    properties: RwLock<P>,
    body: Mutex<Option<Body>>,
    continuation: Mutex<Option<SendGen>>,
    pub pre: EventId,
    pub post: EventId,
    pub parent: Option<Weak<TaskHandle<P>>>,
    pub space: Weak<TaskSpace<P>>,
    child_space: Mutex<Option<Arc<TaskSpace<P>>>>,
    pub depth: u32,
    pub in_activation_queue: AtomicBool,
    pub in_ready_list: AtomicBool,
    pending_event: Mutex<Option<EventId>>,
    /// Set if the body panicked. Checked by the scheduler after `invoke`
    /// returns `true`: a faulted task's post-event is never reached, so its
    /// successors stay blocked, and the scheduler poisons the runtime
    /// instead (spec.md §7 `BodyFault`).
    fault: AtomicBool,
}

impl<P: AccessPolicy> fmt::Debug for TaskHandle<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle").field("id", &self.id).finish()
    }
}

impl<P: AccessPolicy> TaskHandle<P> {
    pub(crate) fn new(
        properties: P,
        body: Body,
        pre: EventId,
        post: EventId,
        parent: Option<Weak<TaskHandle<P>>>,
        space: Weak<TaskSpace<P>>,
        depth: u32,
    ) -> Arc<Self> {
        let id = next_task_id();
        log::debug!("task {id} created at depth {depth}");
        Arc::new(TaskHandle {
            id,
            properties: RwLock::new(properties),
            body: Mutex::new(Some(body)),
            continuation: Mutex::new(None),
            pre,
            post,
            parent,
            space,
            child_space: Mutex::new(None),
            depth,
            in_activation_queue: AtomicBool::new(false),
            in_ready_list: AtomicBool::new(false),
            pending_event: Mutex::new(None),
            fault: AtomicBool::new(false),
        })
    }

    pub fn properties(&self) -> P {
        self.properties.read().clone()
    }

    /// True iff the body panicked during `invoke`.
    pub fn faulted(&self) -> bool {
        self.fault.load(Ordering::Acquire)
    }

    pub fn patch_properties(&self, patch: &P::Patch) -> P {
        let mut guard = self.properties.write();
        guard.apply_patch(patch);
        guard.clone()
    }

    pub(crate) fn pending_event(&self) -> Option<EventId> {
        self.pending_event.lock().take()
    }

    /// The task's child space, created lazily on first access.
    pub(crate) fn child_space(
        self: &Arc<Self>,
        make: impl FnOnce() -> Arc<TaskSpace<P>>,
    ) -> Arc<TaskSpace<P>> {
        let mut guard = self.child_space.lock();
        if let Some(existing) = guard.as_ref() {
            return existing.clone();
        }
        let space = make();
        *guard = Some(space.clone());
        space
    }
}

/// Run (or resume) `task`'s body. Returns `true` iff the body ran to
/// completion on this call.
///
/// Builds the coroutine lazily on first invocation, then resumes the
/// existing one on every subsequent call: a parked task is re-entered by
/// calling `invoke` again, and resumes immediately after its yield point.
pub(crate) fn invoke<P: AccessPolicy>(task: &Arc<TaskHandle<P>>) -> bool {
    let mut guard = task.continuation.lock();
    if guard.is_none() {
        let body = task
            .body
            .lock()
            .take()
            .expect("invoke called on a task with no remaining body");
        let task_for_fault = task.clone();
        let gen = Gn::new_scoped(move |_scope: Scope<(), EventId>| {
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(body)).is_err() {
                task_for_fault.fault.store(true, Ordering::Release);
            }
            done!()
        });
        *guard = Some(SendGen(gen));
    }
    let gen = &mut guard.as_mut().expect("continuation just installed").0;
    match gen.resume() {
        Some(event) => {
            *task.pending_event.lock() = Some(event);
            false
        }
        None => true,
    }
}

/// Cooperatively suspend the currently executing task body until `event`
/// is reached. Must only be called from within a
/// task body being driven by [`invoke`]; calling it elsewhere panics, the
/// same way resuming a non-existent coroutine would.
pub fn yield_now(event: EventId) {
    generator::yield_with(event)
}

thread_local! {
    /// Type-erased so this slot does not need to be duplicated per
    /// `AccessPolicy` instantiation of `Runtime<P>`. `Runtime<P>` methods
    /// downcast back to `Arc<TaskHandle<P>>`.
    pub(crate) static CURRENT_TASK: RefCell<Option<Arc<dyn Any + Send + Sync>>> =
        RefCell::new(None);

    /// Type-independent "is a task body currently running on this worker"
    /// flag, checked by `future::TaskFuture::get` to decide whether to
    /// cooperatively yield or busy-idle.
    static IN_TASK: std::cell::Cell<bool> = std::cell::Cell::new(false);
}

/// Set the thread-local current task for the duration of `f`, restoring
/// the previous value afterwards (supports nested `invoke` calls, though
/// the scheduler never actually nests them for the same worker thread).
pub(crate) fn with_current_task<P, R>(task: Arc<TaskHandle<P>>, f: impl FnOnce() -> R) -> R
where
    P: AccessPolicy,
{
    let previous = CURRENT_TASK.with(|c| c.borrow_mut().replace(task));
    let previously_in_task = IN_TASK.with(|c| c.replace(true));
    let result = f();
    IN_TASK.with(|c| c.set(previously_in_task));
    CURRENT_TASK.with(|c| *c.borrow_mut() = previous);
    result
}

pub(crate) fn current_task<P: AccessPolicy>() -> Option<Arc<TaskHandle<P>>> {
    CURRENT_TASK.with(|c| c.borrow().clone())?.downcast::<TaskHandle<P>>().ok()
}

/// True iff the calling thread is currently inside `invoke` driving a task
/// body (directly, or transitively through a nested `emplace_task`/
/// `TaskFuture::get` call from within that body).
pub(crate) fn is_in_task() -> bool {
    IN_TASK.with(|c| c.get())
}
