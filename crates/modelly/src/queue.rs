#![forbid(unsafe_code)]

//! Coalescing notification queue.
//!
//! [`DeferredQueue::push`] schedules a callback on the injected
//! [`Scheduler`]. A push made while an earlier callback is still pending
//! cancels it, so a synchronous burst of pushes produces exactly one
//! invocation: the last one.
//!
//! The callback reads whatever state exists when it runs; nothing is
//! captured at push time beyond the callback itself.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use tracing::trace;

use crate::scheduler::{SharedScheduler, TaskId};

/// Per-channel deferred notification queue.
pub struct DeferredQueue {
    scheduler: SharedScheduler,
    pending: Rc<Cell<Option<TaskId>>>,
}

impl DeferredQueue {
    #[must_use]
    pub fn new(scheduler: SharedScheduler) -> Self {
        Self {
            scheduler,
            pending: Rc::new(Cell::new(None)),
        }
    }

    /// Schedule `callback`, replacing any callback still pending.
    pub fn push(&self, callback: impl FnOnce() + 'static) {
        if let Some(previous) = self.pending.take() {
            self.scheduler.cancel(previous);
            trace!(task = previous.get(), "notification coalesced");
        }
        let pending = Rc::clone(&self.pending);
        let id = self.scheduler.schedule(Box::new(move || {
            pending.set(None);
            callback();
        }));
        self.pending.set(Some(id));
    }

    /// Whether a callback is scheduled and has not run yet.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.get().is_some()
    }
}

impl Drop for DeferredQueue {
    fn drop(&mut self) {
        if let Some(id) = self.pending.take() {
            self.scheduler.cancel(id);
        }
    }
}

impl fmt::Debug for DeferredQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredQueue")
            .field("pending", &self.pending.get())
            .finish_non_exhaustive()
    }
}
