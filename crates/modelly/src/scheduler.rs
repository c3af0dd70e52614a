#![forbid(unsafe_code)]

//! Deferred-callback primitives.
//!
//! The notification queue needs exactly one capability from its host:
//! run a zero-argument callback after the current synchronous execution
//! completes, with a way to cancel a callback that has not run yet. That
//! capability is the [`Scheduler`] trait, injected into every channel.
//!
//! Two hosts are provided:
//!
//! - [`FrameScheduler`]: the host pumps frames explicitly via
//!   [`FrameScheduler::run_frame`], the way an animation-frame loop would.
//!   Fully deterministic; used by tests and by render loops that already own
//!   a frame clock.
//! - [`ImmediateScheduler`]: each callback becomes a task on a tokio
//!   [`LocalSet`], so it runs on the next turn of the async executor.
//!
//! [`SchedulerConfig`] picks one, optionally from the `MODELLY_SCHEDULER`
//! environment variable.
//!
//! # Invariants
//!
//! 1. `schedule` never runs the callback before returning.
//! 2. A cancelled callback never runs.
//! 3. Cancelling an unknown or already-run task is a no-op.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::rc::Rc;
use std::str::FromStr;

use tokio::task::{JoinHandle, LocalSet};
use tracing::{debug, trace};

use crate::error::SchedulerError;

/// Boxed deferred callback.
pub type Callback = Box<dyn FnOnce()>;

/// Shared handle to a scheduler, as held by channels.
pub type SharedScheduler = Rc<dyn Scheduler>;

/// Identifies a scheduled callback for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

/// A platform deferred-callback primitive.
pub trait Scheduler {
    /// Arrange for `callback` to run once, after the current synchronous
    /// execution completes.
    fn schedule(&self, callback: Callback) -> TaskId;

    /// Cancel a callback that has not run yet.
    fn cancel(&self, id: TaskId);
}

fn next_task_id(counter: &Cell<u64>) -> TaskId {
    let id = counter.get();
    counter.set(id.wrapping_add(1));
    TaskId(id)
}

// ---------------------------------------------------------------------------
// FrameScheduler
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FrameQueues {
    /// Scheduled for the next frame.
    pending: Vec<(TaskId, Callback)>,
    /// Detached for the frame currently running.
    running: VecDeque<(TaskId, Callback)>,
}

/// Host-pumped frame loop.
///
/// Callbacks scheduled during a frame run in the following frame, never in
/// the one that is executing.
///
/// # Failure Modes
///
/// A panicking callback unwinds out of [`run_frame`](Self::run_frame). The
/// callbacks that had not run yet in that frame stay queued and run first on
/// the next call.
#[derive(Default)]
pub struct FrameScheduler {
    next_id: Cell<u64>,
    queues: RefCell<FrameQueues>,
    frames: Cell<u64>,
}

impl FrameScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of callbacks waiting for a frame.
    #[must_use]
    pub fn pending(&self) -> usize {
        let queues = self.queues.borrow();
        queues.pending.len() + queues.running.len()
    }

    /// Number of frames run so far.
    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frames.get()
    }

    /// Run every callback scheduled before this call, in scheduling order.
    ///
    /// Returns the number of callbacks that ran.
    pub fn run_frame(&self) -> usize {
        {
            let mut queues = self.queues.borrow_mut();
            let FrameQueues { pending, running } = &mut *queues;
            running.extend(pending.drain(..));
        }
        let frame = self.frames.get() + 1;
        self.frames.set(frame);

        let mut ran = 0;
        loop {
            // Pop under a short borrow so callbacks may schedule or cancel.
            let next = self.queues.borrow_mut().running.pop_front();
            let Some((id, callback)) = next else {
                break;
            };
            trace!(frame, task = id.get(), "frame callback");
            callback();
            ran += 1;
        }
        ran
    }

    /// Run frames until nothing is pending or `max_frames` frames have run.
    ///
    /// Returns the number of frames run.
    pub fn run_until_idle(&self, max_frames: usize) -> usize {
        let mut frames = 0;
        while frames < max_frames && self.pending() > 0 {
            self.run_frame();
            frames += 1;
        }
        frames
    }
}

impl Scheduler for FrameScheduler {
    fn schedule(&self, callback: Callback) -> TaskId {
        let id = next_task_id(&self.next_id);
        self.queues.borrow_mut().pending.push((id, callback));
        trace!(task = id.get(), "frame callback scheduled");
        id
    }

    fn cancel(&self, id: TaskId) {
        let mut queues = self.queues.borrow_mut();
        let before = queues.pending.len() + queues.running.len();
        queues.pending.retain(|(task, _)| *task != id);
        queues.running.retain(|(task, _)| *task != id);
        if queues.pending.len() + queues.running.len() != before {
            trace!(task = id.get(), "frame callback cancelled");
        }
    }
}

impl fmt::Debug for FrameScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameScheduler")
            .field("pending", &self.pending())
            .field("frames", &self.frames.get())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ImmediateScheduler
// ---------------------------------------------------------------------------

/// Runs callbacks as tasks on a tokio [`LocalSet`].
///
/// Tasks only make progress while the set is driven, through
/// [`run_until`](Self::run_until).
pub struct ImmediateScheduler {
    local: LocalSet,
    next_id: Cell<u64>,
    tasks: Rc<RefCell<HashMap<TaskId, JoinHandle<()>>>>,
}

impl ImmediateScheduler {
    /// Create a scheduler bound to the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Unavailable`] when called outside a tokio
    /// runtime.
    pub fn new() -> Result<Self, SchedulerError> {
        tokio::runtime::Handle::try_current().map_err(|err| SchedulerError::Unavailable {
            kind: SchedulerKind::Immediate,
            reason: err.to_string(),
        })?;
        Ok(Self {
            local: LocalSet::new(),
            next_id: Cell::new(0),
            tasks: Rc::default(),
        })
    }

    /// Drive scheduled callbacks while `future` runs.
    pub async fn run_until<F: Future>(&self, future: F) -> F::Output {
        self.local.run_until(future).await
    }

    /// Number of callbacks that have not run yet.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tasks.borrow().len()
    }
}

impl Scheduler for ImmediateScheduler {
    fn schedule(&self, callback: Callback) -> TaskId {
        let id = next_task_id(&self.next_id);
        let tasks = Rc::clone(&self.tasks);
        let handle = self.local.spawn_local(async move {
            tasks.borrow_mut().remove(&id);
            callback();
        });
        self.tasks.borrow_mut().insert(id, handle);
        trace!(task = id.get(), "immediate callback scheduled");
        id
    }

    fn cancel(&self, id: TaskId) {
        if let Some(handle) = self.tasks.borrow_mut().remove(&id) {
            handle.abort();
            trace!(task = id.get(), "immediate callback cancelled");
        }
    }
}

impl fmt::Debug for ImmediateScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImmediateScheduler")
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Which deferred-callback host to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerKind {
    /// Host-pumped frames.
    Frame,
    /// tokio local tasks.
    Immediate,
    /// `Immediate` inside a tokio runtime, `Frame` otherwise.
    ///
    /// Either way the host must keep driving the result: pump
    /// [`FrameScheduler::run_frame`], or await inside
    /// [`ImmediateScheduler::run_until`]. Holding only
    /// [`HostScheduler::shared`] queues notifications that never fire.
    #[default]
    Auto,
}

impl fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Frame => "frame",
            Self::Immediate => "immediate",
            Self::Auto => "auto",
        })
    }
}

impl FromStr for SchedulerKind {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "frame" | "raf" => Ok(Self::Frame),
            "immediate" | "tokio" => Ok(Self::Immediate),
            "auto" | "" => Ok(Self::Auto),
            _ => Err(SchedulerError::UnknownKind(s.to_owned())),
        }
    }
}

/// Scheduler selection.
#[derive(Debug, Clone, Default)]
pub struct SchedulerConfig {
    pub kind: SchedulerKind,
}

impl SchedulerConfig {
    /// Environment variable read by [`from_env`](Self::from_env).
    pub const ENV_VAR: &'static str = "MODELLY_SCHEDULER";

    #[must_use]
    pub fn frame() -> Self {
        Self {
            kind: SchedulerKind::Frame,
        }
    }

    #[must_use]
    pub fn immediate() -> Self {
        Self {
            kind: SchedulerKind::Immediate,
        }
    }

    #[must_use]
    pub fn with_kind(mut self, kind: SchedulerKind) -> Self {
        self.kind = kind;
        self
    }

    /// Read the scheduler kind from `MODELLY_SCHEDULER`; unset means `auto`.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::UnknownKind`] for an unrecognized value.
    pub fn from_env() -> Result<Self, SchedulerError> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// [`from_env`](Self::from_env) with a custom environment lookup.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::UnknownKind`] for an unrecognized value.
    pub fn from_env_with<F>(get_env: F) -> Result<Self, SchedulerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let kind = match get_env(Self::ENV_VAR) {
            Some(value) => value.parse()?,
            None => SchedulerKind::Auto,
        };
        Ok(Self { kind })
    }

    /// Construct the configured scheduler.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Unavailable`] when `Immediate` is requested
    /// outside a tokio runtime. `Auto` never fails.
    ///
    /// The returned [`HostScheduler`] keeps the concrete host so it can be
    /// driven. An `Immediate` host only runs callbacks while a future is
    /// awaited through [`ImmediateScheduler::run_until`].
    pub fn build(&self) -> Result<HostScheduler, SchedulerError> {
        let host = match self.kind {
            SchedulerKind::Frame => HostScheduler::Frame(Rc::new(FrameScheduler::new())),
            SchedulerKind::Immediate => HostScheduler::Immediate(Rc::new(ImmediateScheduler::new()?)),
            SchedulerKind::Auto => match ImmediateScheduler::new() {
                Ok(immediate) => HostScheduler::Immediate(Rc::new(immediate)),
                Err(err) => {
                    debug!(%err, "falling back to frame scheduler");
                    HostScheduler::Frame(Rc::new(FrameScheduler::new()))
                }
            },
        };
        debug!(requested = %self.kind, selected = %host.kind(), "scheduler selected");
        Ok(host)
    }
}

/// A constructed scheduler, keeping the concrete type so the host can drive it.
#[derive(Debug, Clone)]
pub enum HostScheduler {
    Frame(Rc<FrameScheduler>),
    Immediate(Rc<ImmediateScheduler>),
}

impl HostScheduler {
    #[must_use]
    pub fn kind(&self) -> SchedulerKind {
        match self {
            Self::Frame(_) => SchedulerKind::Frame,
            Self::Immediate(_) => SchedulerKind::Immediate,
        }
    }

    /// Type-erased handle for channels.
    #[must_use]
    pub fn shared(&self) -> SharedScheduler {
        match self {
            Self::Frame(frame) => Rc::clone(frame) as SharedScheduler,
            Self::Immediate(immediate) => Rc::clone(immediate) as SharedScheduler,
        }
    }
}
