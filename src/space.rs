//! Task spaces: the nesting structure refinement builds. Every task may
//! lazily acquire a child space, and a space holds weak references to its
//! active children so that emptiness can be checked recursively without
//! keeping them alive past their own clean-up.

use std::sync::{Arc, Weak};

use crate::access::AccessPolicy;
use crate::event::EventGraph;
use crate::graph::PrecedenceGraph;
use crate::task::TaskHandle;

/// One scope in the task-space hierarchy: the root space, or a task's
/// child space created the first time that task spawns a sub-task.
pub struct TaskSpace<P: AccessPolicy> {
    pub depth: u32,
    pub parent_task: Option<Weak<TaskHandle<P>>>,
    graph: PrecedenceGraph<P>,
    active_children: parking_lot::Mutex<Vec<Weak<TaskSpace<P>>>>,
}

impl<P: AccessPolicy> TaskSpace<P> {
    pub fn root() -> Arc<Self> {
        Arc::new(TaskSpace {
            depth: 0,
            parent_task: None,
            graph: PrecedenceGraph::new(),
            active_children: parking_lot::Mutex::new(Vec::new()),
        })
    }

    pub fn child(parent_task: Weak<TaskHandle<P>>, depth: u32) -> Arc<Self> {
        Arc::new(TaskSpace {
            depth,
            parent_task: Some(parent_task),
            graph: PrecedenceGraph::new(),
            active_children: parking_lot::Mutex::new(Vec::new()),
        })
    }

    /// Register `child` as one of this space's children, for `empty()`'s
    /// recursive scan. Called once, right after a task's child space is
    /// created.
    pub fn register_child(self: &Arc<Self>, child: &Arc<TaskSpace<P>>) {
        self.active_children.lock().push(Arc::downgrade(child));
    }

    pub fn push(&self, task: Arc<TaskHandle<P>>, events: &EventGraph) -> Arc<TaskHandle<P>> {
        self.graph.insert(task, events)
    }

    pub fn remove(&self, task_id: crate::task::TaskId) {
        self.graph.remove(task_id);
    }

    pub fn graph(&self) -> &PrecedenceGraph<P> {
        &self.graph
    }

    /// Drain any queued-but-not-yet-inserted tasks, inserting and attempting
    /// to activate each. Under this implementation `push` inserts and wires
    /// a task into the precedence graph immediately (spec.md §4.C's `next`
    /// folded into `push`, rather than queued separately), and activation is
    /// driven by `on_reach` wakers registered at push time rather than by
    /// polling, so there is never any queued work left to drain here. The
    /// method still exists, and recurses into child spaces, to satisfy the
    /// task-space interface spec.md §4.E names and so a caller draining the
    /// root space also touches every nested space.
    pub fn init_until_ready(&self) {
        let children: Vec<Arc<TaskSpace<P>>> = self
            .active_children
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for child in children {
            child.init_until_ready();
        }
    }

    /// True iff this space has no tasks left, and recursively, none of its
    /// still-live children do either. Dead (dropped) children are pruned
    /// from the list as a side effect.
    pub fn empty(&self) -> bool {
        let mut children = self.active_children.lock();
        children.retain(|c| c.upgrade().is_some());
        self.graph.is_empty()
            && children
                .iter()
                .all(|c| c.upgrade().map(|s| s.empty()).unwrap_or(true))
    }
}
