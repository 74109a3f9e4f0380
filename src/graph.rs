//! The precedence graph: one per task space, tracking which already-
//! present tasks a newly inserted task must follow.
//!
//! Vertices are ordered by insertion; a new task's edges are *derived*,
//! never declared by the caller, by asking the access policy whether each
//! already-present task's properties force ordering against the new
//! task's properties. Only edges from earlier to later insertions are
//! ever created, which is what keeps the graph acyclic without an
//! explicit cycle check.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::access::AccessPolicy;
use crate::error::RuntimeError;
use crate::event::EventGraph;
use crate::task::{TaskHandle, TaskId};

struct Vertex<P: AccessPolicy> {
    task: Arc<TaskHandle<P>>,
    order: u64,
}

/// The per-space precedence graph (spec component C). Holds every task
/// currently live in one space, in insertion order, plus the derived
/// successor lists used to validate property patches.
pub struct PrecedenceGraph<P: AccessPolicy> {
    vertices: RwLock<Vec<Vertex<P>>>,
    // task id -> ids of tasks it was found serial-before at insertion time.
    successors: RwLock<HashMap<TaskId, Vec<TaskId>>>,
    next_order: AtomicU64,
}

impl<P: AccessPolicy> Default for PrecedenceGraph<P> {
    fn default() -> Self {
        PrecedenceGraph {
            vertices: RwLock::new(Vec::new()),
            successors: RwLock::new(HashMap::new()),
            next_order: AtomicU64::new(0),
        }
    }
}

impl<P: AccessPolicy> PrecedenceGraph<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `task`, deriving its in-edges against every task already
    /// present, and wire the corresponding scheduling-graph edges. Returns
    /// the task back to the caller once wiring is complete and its `pre`
    /// event has been released (its readiness now depends only on any
    /// derived predecessors).
    pub fn insert(&self, task: Arc<TaskHandle<P>>, events: &EventGraph) -> Arc<TaskHandle<P>> {
        let order = self.next_order.fetch_add(1, Ordering::Relaxed);
        let props = task.properties();
        let mut vertices = self.vertices.write();
        let mut successors = self.successors.write();
        for existing in vertices.iter() {
            if !P::is_serial(&existing.task.properties(), &props) {
                continue;
            }
            // `existing` was inserted earlier; the new task must follow it.
            if events.is_reached(existing.task.post) {
                // Already finished: the ordering is trivially satisfied,
                // no scheduling edge needed.
                continue;
            }
            events
                .add_edge(existing.task.post, task.pre)
                .expect("pre-event of a just-created task cannot already be reached");
            successors
                .entry(existing.task.id)
                .or_default()
                .push(task.id);
        }
        vertices.push(Vertex {
            task: task.clone(),
            order,
        });
        drop(successors);
        drop(vertices);
        log::debug!("task {} inserted into precedence graph", task.id);
        events.reach(task.pre);
        task
    }

    /// Remove `task_id` from the graph. Does not touch the scheduling
    /// graph: by the time a task is removed its `post` event has already
    /// reached and cascaded to every derived successor.
    pub fn remove(&self, task_id: TaskId) {
        self.vertices.write().retain(|v| v.task.id != task_id);
        self.successors.write().remove(&task_id);
        log::debug!("task {task_id} removed from precedence graph");
    }

    /// Apply `patch` to `task_id`'s properties, rejecting it with
    /// [`RuntimeError::PatchStrengthening`] if doing so would add a
    /// precedence edge that did not exist before the patch (properties
    /// may only ever weaken an existing ordering, never add one).
    ///
    /// Checked as a dry run: the candidate post-patch properties are
    /// compared, via `AccessPolicy::is_serial`, against every vertex
    /// inserted after `task_id` that does *not* already have a derived
    /// edge from it. Only vertices inserted earlier than `task_id`, or
    /// later ones with no edge to add, can be affected by weakening;
    /// anything that was already going to serialize stays unaffected.
    pub fn update(
        &self,
        task_id: TaskId,
        patch: &P::Patch,
        events: &EventGraph,
    ) -> Result<(), RuntimeError> {
        let vertices = self.vertices.read();
        let (this_order, current) = vertices
            .iter()
            .find(|v| v.task.id == task_id)
            .map(|v| (v.order, v.task.properties()))
            .expect("update_properties called with an id no longer in its space");
        let mut candidate = current.clone();
        candidate.apply_patch(patch);

        let mut existing_successors = self
            .successors
            .read()
            .get(&task_id)
            .cloned()
            .unwrap_or_default();
        existing_successors.sort_unstable();

        for later in vertices.iter().filter(|v| v.order > this_order) {
            if existing_successors.binary_search(&later.task.id).is_ok() {
                continue;
            }
            if P::is_serial(&candidate, &later.task.properties()) {
                return Err(RuntimeError::PatchStrengthening);
            }
        }
        drop(vertices);

        let this_task = {
            let vertices = self.vertices.read();
            vertices
                .iter()
                .find(|v| v.task.id == task_id)
                .map(|v| v.task.clone())
                .expect("task vanished from its own space during update")
        };
        this_task.patch_properties(patch);

        // Weakening may have made some already-wired edge unnecessary;
        // drop any that no longer hold under the new properties.
        let mut successors = self.successors.write();
        let list = successors.entry(task_id).or_default();
        let mut keep = Vec::with_capacity(list.len());
        for succ_id in list.drain(..) {
            let still_serial = self
                .vertices
                .read()
                .iter()
                .find(|v| v.task.id == succ_id)
                .map(|v| P::is_serial(&candidate, &v.task.properties()))
                .unwrap_or(false);
            if still_serial {
                keep.push(succ_id);
            } else if let Some(succ_task) = self
                .vertices
                .read()
                .iter()
                .find(|v| v.task.id == succ_id)
                .map(|v| v.task.clone())
            {
                events.remove_edge(this_task.post, succ_task.pre);
            }
        }
        *list = keep;
        log::debug!("task {task_id} properties patched");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.vertices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{IoAccessBuilder, IoAccessSet, IoPatch, Mode};
    use std::sync::Weak;

    fn make_task(
        events: &EventGraph,
        props: IoAccessSet,
    ) -> Arc<TaskHandle<IoAccessSet>> {
        let pre = events.create_event();
        let post = events.create_event();
        TaskHandle::new(props, Box::new(|| {}), pre, post, None, Weak::new(), 0)
    }

    #[test]
    fn two_writers_to_same_resource_serialize() {
        let events = EventGraph::new();
        let graph = PrecedenceGraph::new();
        let a = make_task(&events, IoAccessBuilder::new().write("x").build());
        let b = make_task(&events, IoAccessBuilder::new().write("x").build());
        graph.insert(a.clone(), &events);
        graph.insert(b.clone(), &events);
        assert!(!events.is_reached(b.pre));
        events.reach(a.post);
        assert!(events.is_reached(b.pre));
    }

    #[test]
    fn two_readers_of_same_resource_are_both_ready() {
        let events = EventGraph::new();
        let graph = PrecedenceGraph::new();
        let a = make_task(&events, IoAccessBuilder::new().read("x").build());
        let b = make_task(&events, IoAccessBuilder::new().read("x").build());
        graph.insert(a.clone(), &events);
        graph.insert(b.clone(), &events);
        assert!(events.is_reached(a.pre));
        assert!(events.is_reached(b.pre));
    }

    #[test]
    fn insert_against_an_already_finished_task_needs_no_edge() {
        let events = EventGraph::new();
        let graph = PrecedenceGraph::new();
        let a = make_task(&events, IoAccessBuilder::new().write("x").build());
        graph.insert(a.clone(), &events);
        events.reach(a.post);
        let b = make_task(&events, IoAccessBuilder::new().write("x").build());
        graph.insert(b.clone(), &events);
        assert!(events.is_reached(b.pre));
    }

    #[test]
    fn update_rejects_a_strengthening_patch() {
        let events = EventGraph::new();
        let graph = PrecedenceGraph::new();
        let a = make_task(&events, IoAccessBuilder::new().read("x").build());
        let b = make_task(&events, IoAccessBuilder::new().read("x").build());
        graph.insert(a.clone(), &events);
        graph.insert(b.clone(), &events);
        let patch = IoPatch::new().set("x", Mode::Write);
        assert_eq!(
            graph.update(a.id, &patch, &events),
            Err(RuntimeError::PatchStrengthening)
        );
    }

    #[test]
    fn update_accepts_a_weakening_patch_and_unblocks_successor() {
        let events = EventGraph::new();
        let graph = PrecedenceGraph::new();
        let a = make_task(&events, IoAccessBuilder::new().write("x").build());
        let b = make_task(&events, IoAccessBuilder::new().read("x").build());
        graph.insert(a.clone(), &events);
        graph.insert(b.clone(), &events);
        assert!(!events.is_reached(b.pre));
        let patch = IoPatch::new().set("x", Mode::Read);
        graph.update(a.id, &patch, &events).unwrap();
        // a never posted, but the edge to b was a write/read edge that no
        // longer holds once a only reads x (two readers commute), so b
        // becomes ready immediately.
        assert!(events.is_reached(b.pre));
    }

    #[test]
    fn remove_drops_the_vertex() {
        let events = EventGraph::new();
        let graph = PrecedenceGraph::new();
        let a = make_task(&events, IoAccessBuilder::new().write("x").build());
        graph.insert(a.clone(), &events);
        assert_eq!(graph.len(), 1);
        graph.remove(a.id);
        assert!(graph.is_empty());
    }
}
