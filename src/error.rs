//! Error taxonomy for the runtime.
//!
//! These are *kinds*, not a hierarchy: every fallible public operation
//! returns `Result<T, RuntimeError>`.

use thiserror::Error;

/// Errors the runtime can surface to a caller, or raise internally as a
/// fatal condition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// A child task declared an access not contained in its parent's
    /// declared accesses. Raised synchronously at `emplace_task`.
    #[error("child task properties are not a subset of the parent's")]
    ScopeViolation,

    /// `update_properties` would add a precedence edge that did not exist
    /// before the patch. Patches may only weaken constraints.
    #[error("property patch would strengthen a precedence constraint")]
    PatchStrengthening,

    /// An edge was added to an event that had already been reached.
    /// Indicates a wiring race and is treated as a runtime bug.
    #[error("attempted to add a dependency to an already-reached event")]
    LateDependency,

    /// `update_properties`, `current_task_id`, `backtrace`, `scope_depth`
    /// or `create_event` was called with no task running on the calling
    /// thread.
    #[error("operation requires a currently running task")]
    NotInTask,

    /// `Runtime::init` was called on an already-initialized runtime.
    #[error("runtime is already initialized")]
    AlreadyInitialized,

    /// An operation that requires an initialized runtime was called before
    /// `init` or after `finalize`.
    #[error("runtime is not initialized")]
    NotInitialized,

    /// A task body panicked. The runtime is now poisoned: the post-event
    /// that would unblock its successors can never be reached, so no
    /// further tasks are started and `finalize` returns this error.
    #[error("a task body panicked; runtime is poisoned")]
    BodyFault,
}
