//! `TaskFuture`: the delayed future `emplace_task` hands back. spec.md §1
//! explicitly scopes "the user-facing future/promise wrapper" out of the
//! core as a thin external collaborator; this is the minimal shape the
//! core needs to return a result, not a general async/await integration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::RuntimeError;
use crate::event::{EventGraph, EventId};
use crate::task;

/// Fulfilled when the originating task's post-event is reached.
pub struct TaskFuture<R> {
    slot: Arc<Mutex<Option<R>>>,
    events: Arc<EventGraph>,
    post: EventId,
    poisoned: Arc<AtomicBool>,
}

impl<R> TaskFuture<R> {
    pub(crate) fn new(
        slot: Arc<Mutex<Option<R>>>,
        events: Arc<EventGraph>,
        post: EventId,
        poisoned: Arc<AtomicBool>,
    ) -> Self {
        TaskFuture {
            slot,
            events,
            post,
            poisoned,
        }
    }

    /// Non-blocking readiness check.
    pub fn is_ready(&self) -> bool {
        self.events.is_reached(self.post)
    }

    /// Block until the task's result is available and return it.
    ///
    /// If called from inside another task's body, cooperatively yields on
    /// the post-event instead of blocking the worker outright, so the
    /// worker is free to run other ready tasks in the meantime. Called from
    /// outside any task, busy-idles via `std::thread::yield_now` until the
    /// result lands. Bails with `Err(BodyFault)` as soon as the runtime is
    /// observed poisoned, rather than waiting on a post-event that a
    /// `BodyFault` elsewhere may have made unreachable.
    pub fn get(self) -> Result<R, RuntimeError> {
        if task::is_in_task() {
            while !self.events.is_reached(self.post) {
                if self.poisoned.load(Ordering::SeqCst) {
                    return Err(RuntimeError::BodyFault);
                }
                task::yield_now(self.post);
            }
        } else {
            while !self.events.is_reached(self.post) {
                if self.poisoned.load(Ordering::SeqCst) {
                    return Err(RuntimeError::BodyFault);
                }
                std::thread::yield_now();
            }
        }
        Ok(self
            .slot
            .lock()
            .take()
            .expect("TaskFuture::get called more than once on the same future"))
    }
}
