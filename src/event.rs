//! The scheduling graph: a DAG of events tracking task readiness,
//! suspension and completion.
//!
//! Each event carries an atomic count of *remaining* unreached in-edges.
//! `create_event` starts an event "locked" with one implicit in-edge (the
//! condition that the event's own wiring, or its owning task's body, has
//! not yet completed); `add_edge` adds further explicit predecessors;
//! `reach` releases exactly one in-edge (the implicit one, or an explicit
//! predecessor's contribution during cascade) and, when the count hits
//! zero, marks the event reached and propagates to its successors using
//! an explicit stack rather than recursion, bounding stack depth
//! regardless of graph shape.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::RuntimeError;

pub type EventId = u64;

type Waiter = Box<dyn FnOnce() + Send>;

struct EventNode {
    remaining: AtomicI64,
    reached: AtomicBool,
    out_edges: Mutex<Vec<EventId>>,
    waiters: Mutex<Vec<Waiter>>,
}

impl EventNode {
    fn new() -> Self {
        EventNode {
            remaining: AtomicI64::new(1),
            reached: AtomicBool::new(false),
            out_edges: Mutex::new(Vec::new()),
            waiters: Mutex::new(Vec::new()),
        }
    }
}

/// The scheduling graph. One instance is shared (via `Arc`) by every task
/// space and the scheduler in a [`crate::Runtime`].
#[derive(Default)]
pub struct EventGraph {
    nodes: Mutex<HashMap<EventId, Arc<EventNode>>>,
    next_id: AtomicI64,
}

impl EventGraph {
    pub fn new() -> Self {
        EventGraph {
            nodes: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Create a new event, locked (not reached) until [`EventGraph::reach`]
    /// is called on it at least once.
    pub fn create_event(&self) -> EventId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) as EventId;
        self.nodes.lock().insert(id, Arc::new(EventNode::new()));
        log::trace!("event {id} created");
        id
    }

    fn node(&self, id: EventId) -> Arc<EventNode> {
        self.nodes
            .lock()
            .get(&id)
            .cloned()
            .expect("EventId used after its node was dropped")
    }

    /// Register `dst` as depending on `src`: `src` must be reached before
    /// `dst`'s remaining count can drop for this edge. Fails with
    /// [`RuntimeError::LateDependency`] if `dst` is already reached (a
    /// wiring race: nothing may become newly dependent on anything once
    /// it has already fired).
    pub fn add_edge(&self, src: EventId, dst: EventId) -> Result<(), RuntimeError> {
        let dst_node = self.node(dst);
        if dst_node.reached.load(Ordering::Acquire) {
            return Err(RuntimeError::LateDependency);
        }
        dst_node.remaining.fetch_add(1, Ordering::AcqRel);
        self.node(src).out_edges.lock().push(dst);
        log::trace!("scheduling edge {src} -> {dst}");
        Ok(())
    }

    /// True iff `id` has been reached. Monotonic: once true, never false
    /// again.
    pub fn is_reached(&self, id: EventId) -> bool {
        self.node(id).reached.load(Ordering::Acquire)
    }

    /// Register a one-shot callback to run once `id` is reached. If `id`
    /// is already reached, the callback runs immediately, inline, on the
    /// calling thread.
    pub fn on_reach(&self, id: EventId, waiter: Waiter) {
        let node = self.node(id);
        if node.reached.load(Ordering::Acquire) {
            waiter();
            return;
        }
        let mut waiters = node.waiters.lock();
        if node.reached.load(Ordering::Acquire) {
            drop(waiters);
            waiter();
        } else {
            waiters.push(waiter);
        }
    }

    /// Release one pending dependency of `id`: the implicit "not yet
    /// wired" / "body not yet finished" edge created with the event, or
    /// (internally, via the cascade below) one explicit predecessor edge.
    /// When `id`'s remaining count reaches zero it is marked reached, its
    /// waiters are run, and the same release is applied to each of its
    /// successors — iteratively, via an explicit stack.
    pub fn reach(&self, id: EventId) {
        self.release(id);
    }

    /// Revoke a not-yet-fired edge: used by a property patch that weakens a
    /// precedence constraint after the edge was already wired. A no-op if
    /// `src` has already reached (the edge already cascaded into `dst`'s
    /// count, so there is nothing left to undo).
    pub(crate) fn remove_edge(&self, src: EventId, dst: EventId) {
        let src_node = self.node(src);
        if src_node.reached.load(Ordering::Acquire) {
            return;
        }
        let mut out = src_node.out_edges.lock();
        if let Some(pos) = out.iter().position(|&d| d == dst) {
            out.remove(pos);
            drop(out);
            log::trace!("scheduling edge {src} -> {dst} revoked");
            self.release(dst);
        }
    }

    /// Decrement `id`'s remaining count by one and, on reaching zero, mark
    /// it reached, run its waiters, and push this same release onto every
    /// successor — iteratively, via an explicit stack, so cascade depth
    /// never grows the call stack regardless of graph shape.
    fn release(&self, id: EventId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let node = self.node(current);
            let remaining = node.remaining.fetch_sub(1, Ordering::AcqRel) - 1;
            if remaining > 0 {
                continue;
            }
            if node.reached.swap(true, Ordering::AcqRel) {
                // Already reached by a racing release; nothing further to do.
                continue;
            }
            log::debug!("event {current} reached");
            let waiters = std::mem::take(&mut *node.waiters.lock());
            for waiter in waiters {
                waiter();
            }
            let successors = std::mem::take(&mut *node.out_edges.lock());
            stack.extend(successors);
        }
    }
}
