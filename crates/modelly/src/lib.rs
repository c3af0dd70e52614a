#![forbid(unsafe_code)]

//! Observable data models with coalesced update notifications.
//!
//! # Role
//! `modelly` is a state layer for UI-style applications. A component holds a
//! model, listens for its update event, and re-renders once per logical
//! batch of changes rather than once per field write.
//!
//! # Primary pieces
//! - [`Channel`]: observable model base; event emitter plus observed fields.
//! - [`model!`]: typed newtypes over `Channel` with per-field accessors.
//! - [`Observed`] / [`observe`]: the write pipeline for plain records.
//! - [`DeferredQueue`]: per-channel coalescing of notifications.
//! - [`Scheduler`]: the injected deferred-callback primitive, with
//!   [`FrameScheduler`] and [`ImmediateScheduler`] hosts.
//!
//! # Data flow
//! ```text
//! model.set_email(..)
//!   → Observed::set           identity check, pre-update hook
//!   → rewire nested channels  move parent listener old child → new child
//!   → DeferredQueue::push     cancel pending, schedule one callback
//!   → (next tick) Channel::emit(UPDATE)
//!   → listeners
//! ```
//!
//! Everything is single-threaded (`Rc`/`RefCell`); the scheduled callback is
//! the only asynchronous boundary.

pub mod channel;
pub mod error;
pub mod listener;
pub mod model;
pub mod observer;
pub mod queue;
pub mod scheduler;
pub mod value;

pub use channel::{Channel, Wait, events};
pub use error::{SchedulerError, WaitError};
pub use listener::{Listener, WeakListener};
pub use observer::{BeforeUpdate, Hooks, Observed, is_observer, observe};
pub use queue::DeferredQueue;
pub use scheduler::{
    Callback, FrameScheduler, HostScheduler, ImmediateScheduler, Scheduler, SchedulerConfig,
    SchedulerKind, SharedScheduler, TaskId,
};
pub use value::{FromValue, Record, Value};
