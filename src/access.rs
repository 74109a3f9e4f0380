//! The access trait: the single extension point by which a task's
//! declared properties grow precedence-graph edges.

use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;

use crate::error::RuntimeError;

/// Reduces a pair of property sets to a boolean "must be serialized"
/// relation, and checks that a child's declared accesses are contained in
/// its parent's.
///
/// A concrete policy is a static matrix over some small set of access
/// modes; this trait is generic over the *property* type a
/// task carries, not over the modes themselves, so that policies which
/// bundle several (resource, mode) pairs into one property value (as
/// [`IoAccessSet`] does) can implement it directly.
pub trait AccessPolicy: Clone + Send + Sync + fmt::Debug + 'static {
    /// A delta applicable to a running task's properties. `apply_patch`
    /// must never be able to produce a property set that makes
    /// `is_serial` return `true` for a pair where it previously returned
    /// `false` without the caller being told (that case is caught by
    /// [`crate::graph::PrecedenceGraph::update`], which checks the
    /// before/after relation against every other vertex and raises
    /// [`RuntimeError::PatchStrengthening`]). `apply_patch` itself just
    /// mutates the value.
    type Patch: Send + Sync + 'static;

    /// Symmetric: true iff a task with properties `a` ordered before a
    /// task with properties `b` must preserve that order.
    fn is_serial(a: &Self, b: &Self) -> bool;

    /// Checked at child-task creation: the child's declared accesses must
    /// be a subset of the parent's. Advisory enforcement: on violation,
    /// return `Err(RuntimeError::ScopeViolation)`.
    fn assert_superset(parent: &Self, child: &Self) -> Result<(), RuntimeError>;

    /// Apply `patch` to `self` in place.
    fn apply_patch(&mut self, patch: &Self::Patch);
}

/// A runtime builder object that produces a property value of type `P`.
/// Replaces the template-heavy variadic property builder of the source
/// system: in Rust, a task's captured closure
/// already carries whatever arguments it needs, so the builder's only job
/// is to assemble the declared access set.
pub trait PropertiesBuilder<P: AccessPolicy> {
    fn build(self) -> P;
}

/// The default, permissive policy (`DefaultEnqueuePolicy<T>` in the
/// original `manager.hpp`): every pair of tasks in the same space is
/// serialized in insertion order, and no scope checking is performed. Used
/// by callers who want a plain sequential task chain without writing a
/// custom access policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Sequential;

impl AccessPolicy for Sequential {
    type Patch = ();

    fn is_serial(_a: &Self, _b: &Self) -> bool {
        true
    }

    fn assert_superset(_parent: &Self, _child: &Self) -> Result<(), RuntimeError> {
        Ok(())
    }

    fn apply_patch(&mut self, _patch: &Self::Patch) {}
}

/// Builder for [`Sequential`]; trivial, since the type carries no data.
#[derive(Clone, Copy, Debug, Default)]
pub struct SequentialBuilder;

impl PropertiesBuilder<Sequential> for SequentialBuilder {
    fn build(self) -> Sequential {
        Sequential
    }
}

/// Access mode for a single named resource (`rmngr/access/io.hpp`'s
/// `IOAccess::mode`, minus the `root` sentinel which had no equivalent
/// user-facing meaning here).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Mode {
    Read,
    Write,
    AtomicAdd,
    AtomicMul,
}

/// True iff two accesses to the *same* resource, in modes `a` and `b`, may
/// run concurrently (i.e. are *not* serial).
///
/// See DESIGN.md for why this matrix is not a literal transcription of the
/// retrieved `io.hpp` fragment: that fragment's edge set makes `write`/
/// `write` parallel and `read`/`read` serial, the reverse of the two
/// normative scenarios this runtime is built to satisfy: two concurrent
/// writers to the same resource must serialize, and two concurrent readers
/// must run in parallel. Two reads, two atomic-adds, or two atomic-muls
/// commute and may run concurrently; any other same-resource pairing
/// (including a mode against itself for `Write`) must serialize.
fn compatible(a: Mode, b: Mode) -> bool {
    use Mode::*;
    matches!(
        (a, b),
        (Read, Read) | (AtomicAdd, AtomicAdd) | (AtomicMul, AtomicMul)
    )
}

/// A single declared access: "this task touches `resource` in `mode`".
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct IoAccess {
    pub resource: String,
    pub mode: Mode,
}

/// A task's full declared access set under the I/O access policy. Opaque
/// to the scheduler; consumed only through [`AccessPolicy`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IoAccessSet {
    entries: Vec<IoAccess>,
}

impl IoAccessSet {
    pub fn entries(&self) -> &[IoAccess] {
        &self.entries
    }

    fn resources(&self) -> HashSet<&str> {
        self.entries.iter().map(|e| e.resource.as_str()).collect()
    }
}

/// A patch that replaces the mode of zero or more resources already named
/// in the properties it's applied to (or adds a new, weaker access not
/// previously declared). `update_properties` rejects, at the graph layer,
/// any patch that would strengthen a constraint.
#[derive(Clone, Debug, Default)]
pub struct IoPatch {
    changes: Vec<IoAccess>,
}

impl IoPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, resource: impl Into<String>, mode: Mode) -> Self {
        self.changes.push(IoAccess {
            resource: resource.into(),
            mode,
        });
        self
    }
}

impl AccessPolicy for IoAccessSet {
    type Patch = IoPatch;

    fn is_serial(a: &Self, b: &Self) -> bool {
        let b_resources = b.resources();
        a.entries.iter().any(|ea| {
            b_resources.contains(ea.resource.as_str())
                && b.entries
                    .iter()
                    .any(|eb| eb.resource == ea.resource && !compatible(ea.mode, eb.mode))
        })
    }

    /// Containment is checked at the *resource* level, not the mode: a
    /// child may touch a resource its parent declared in a different mode
    /// (e.g. a parent that writes `x` may spawn a child that only reads
    /// `x`), but it may never touch a resource the parent never declared
    /// at all.
    fn assert_superset(parent: &Self, child: &Self) -> Result<(), RuntimeError> {
        let parent_resources = parent.resources();
        let ok = child
            .entries
            .iter()
            .all(|c| parent_resources.contains(c.resource.as_str()));
        if ok {
            Ok(())
        } else {
            Err(RuntimeError::ScopeViolation)
        }
    }

    fn apply_patch(&mut self, patch: &Self::Patch) {
        for change in &patch.changes {
            if let Some(existing) = self
                .entries
                .iter_mut()
                .find(|e| e.resource == change.resource)
            {
                existing.mode = change.mode;
            } else {
                self.entries.push(change.clone());
            }
        }
    }
}

/// Builder for [`IoAccessSet`]: `IoAccessBuilder::new().read("x").write("y").build()`.
#[derive(Clone, Debug, Default)]
pub struct IoAccessBuilder {
    entries: Vec<IoAccess>,
}

impl IoAccessBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(mut self, resource: impl Into<String>) -> Self {
        self.entries.push(IoAccess {
            resource: resource.into(),
            mode: Mode::Read,
        });
        self
    }

    pub fn write(mut self, resource: impl Into<String>) -> Self {
        self.entries.push(IoAccess {
            resource: resource.into(),
            mode: Mode::Write,
        });
        self
    }

    pub fn atomic_add(mut self, resource: impl Into<String>) -> Self {
        self.entries.push(IoAccess {
            resource: resource.into(),
            mode: Mode::AtomicAdd,
        });
        self
    }

    pub fn atomic_mul(mut self, resource: impl Into<String>) -> Self {
        self.entries.push(IoAccess {
            resource: resource.into(),
            mode: Mode::AtomicMul,
        });
        self
    }
}

impl PropertiesBuilder<IoAccessSet> for IoAccessBuilder {
    fn build(self) -> IoAccessSet {
        IoAccessSet {
            entries: self.entries,
        }
    }
}
