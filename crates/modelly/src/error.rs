#![forbid(unsafe_code)]

//! Error types.
//!
//! Only two things can fail: building a scheduler for a host that lacks the
//! primitive, and awaiting an event on a channel that went away. Listener
//! failures are panics and propagate to whoever called `emit`.

use std::fmt;

use crate::scheduler::SchedulerKind;

/// Errors from selecting or constructing a deferred-callback scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// The host does not provide the primitive this scheduler needs.
    Unavailable { kind: SchedulerKind, reason: String },
    /// A configuration value named a scheduler that does not exist.
    UnknownKind(String),
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { kind, reason } => {
                write!(f, "{kind} scheduler unavailable: {reason}")
            }
            Self::UnknownKind(value) => write!(f, "unknown scheduler kind: {value:?}"),
        }
    }
}

impl std::error::Error for SchedulerError {}

/// Error from awaiting a [`Wait`](crate::channel::Wait) future.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    /// The channel was dropped before the event fired.
    Closed,
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => f.write_str("channel dropped before the event fired"),
        }
    }
}

impl std::error::Error for WaitError {}
