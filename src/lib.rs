//! # An embeddable task-graph runtime
//!
//! Submit callable units of work together with declarative **access
//! properties**; the runtime derives the dependencies implied by those
//! properties, schedules tasks across a fixed pool of worker threads
//! respecting the induced partial order, and lets a running task spawn
//! further (child) tasks that form nested sub-graphs. Tasks may suspend
//! (yield on an event) without blocking their worker, resuming only once
//! the event is reached.
//!
//! ## Data model
//!
//! Three graphs, in three layers:
//!
//!   - A **precedence graph** per task space ([`graph::PrecedenceGraph`]):
//!     a DAG whose edges mean "must complete before". Edges are never
//!     declared by the caller; they are *derived*, at insertion time, by
//!     asking an [`access::AccessPolicy`] whether two tasks' declared
//!     properties force them to serialize.
//!   - A **scheduling graph** of events ([`event::EventGraph`]): every task
//!     contributes a `pre` event (reached once its precedence-graph
//!     predecessors have all posted) and a `post` event (reached once its
//!     body finishes); a running task may create further events as
//!     suspension targets.
//!   - **Task spaces** ([`space::TaskSpace`]) nest: a task that spawns
//!     children is lazily given its own child space, so the whole
//!     structure is a tree of precedence graphs, not one flat graph.
//!
//! A [`scheduler::FifoScheduler`] couples the scheduling graph's readiness
//! notifications to a single FIFO ready queue; a [`worker::WorkerPool`] of
//! cooperative-stack workers drains it, entering each ready task's body on
//! a [`generator::Generator`] so the body can call `yield` to suspend on an
//! event without blocking its worker.
//!
//! ## Example
//!
//! ```
//! use graphene_rt::{IoAccessBuilder, Runtime};
//!
//! let runtime = Runtime::init(2);
//! let log = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
//!
//! let log1 = log.clone();
//! let t1 = runtime
//!     .emplace_task(IoAccessBuilder::new().write("x").build(), move || {
//!         log1.lock().unwrap().push(1);
//!     })
//!     .unwrap();
//!
//! let log2 = log.clone();
//! let t2 = runtime
//!     .emplace_task(IoAccessBuilder::new().write("x").build(), move || {
//!         log2.lock().unwrap().push(2);
//!     })
//!     .unwrap();
//!
//! t1.get().unwrap();
//! t2.get().unwrap();
//! runtime.finalize().unwrap();
//! assert_eq!(*log.lock().unwrap(), vec![1, 2]); // same-resource writes serialize
//! ```

mod access;
mod error;
mod event;
mod future;
mod graph;
mod runtime;
mod scheduler;
mod space;
mod task;
mod worker;

pub use access::{
    AccessPolicy, IoAccess, IoAccessBuilder, IoAccessSet, IoPatch, Mode, PropertiesBuilder,
    Sequential, SequentialBuilder,
};
pub use error::RuntimeError;
pub use event::EventId;
pub use future::TaskFuture;
pub use runtime::Runtime;
pub use task::TaskId;
