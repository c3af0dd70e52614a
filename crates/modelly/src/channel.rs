#![forbid(unsafe_code)]

//! Observable model base with a per-event listener registry.
//!
//! A [`Channel`] is an observed record plus an event emitter. Every write to
//! one of its fields (at any depth of nested plain records) queues a single
//! deferred [`events::UPDATE`] emission; a burst of writes in one
//! synchronous turn produces one emission.
//!
//! # Nested channels
//!
//! When a field holds another channel (directly, or inside nested plain
//! records), the parent's notification listener is registered on the
//! child's update event, so a child update re-emits on the parent in the
//! same turn. Replacing or deleting that field unregisters the listener from
//! the old child before the new child is registered. The link holds the
//! parent weakly, and dropping the parent unregisters it.
//!
//! # Invariants
//!
//! 1. A listener is registered at most once per event type.
//! 2. `emit` delivers to the listeners registered when it started, in
//!    registration order.
//! 3. Listener registry and notification queue never appear in
//!    [`snapshot`](Channel::snapshot) or structural equality.
//!
//! # Failure Modes
//!
//! - **Listener panic**: propagates out of `emit`, and out of whatever drove
//!   the scheduler. The registry is not borrowed while listeners run, so it
//!   stays consistent.
//! - **Cycles**: a channel reachable from its own fields re-emits forever.
//!   Channel graphs must be acyclic.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tracing::trace;

use crate::error::WaitError;
use crate::listener::{Listener, ListenerRegistry, WeakListener};
use crate::observer::{BeforeUpdate, Hooks, Observed, observe};
use crate::queue::DeferredQueue;
use crate::scheduler::SharedScheduler;
use crate::value::{Record, Value};

/// Event type keys.
pub mod events {
    /// Emitted, without arguments, once per burst of field changes.
    pub const UPDATE: &str = "update";
}

struct ChannelInner {
    listeners: RefCell<ListenerRegistry>,
    fields: Observed,
}

/// Handle to an observable model.
///
/// Cloning shares the model.
#[derive(Clone)]
pub struct Channel {
    inner: Rc<ChannelInner>,
}

/// Moves the parent's notification listener from channels reachable through
/// `prev` to channels reachable through `next`.
fn rewire(prev: Option<&Value>, next: Option<&Value>, listener: &Listener) {
    for child in prev.map(Value::reachable_channels).unwrap_or_default() {
        unlink(&child, listener);
    }
    for child in next.map(Value::reachable_channels).unwrap_or_default() {
        if child.inner.listeners.borrow_mut().insert(events::UPDATE, listener) {
            trace!("nested channel linked");
        }
    }
}

fn unlink(child: &Channel, listener: &Listener) {
    let removed = child.inner.listeners.borrow_mut().remove(events::UPDATE, listener);
    if removed.is_some() {
        trace!("nested channel unlinked");
    }
}

impl Drop for ChannelInner {
    fn drop(&mut self) {
        let listener = self.fields.hooks().listener();
        let children: Vec<Channel> = self
            .fields
            .values()
            .iter()
            .flat_map(Value::reachable_channels)
            .collect();
        for child in &children {
            // Never panic in drop.
            let Ok(mut listeners) = child.inner.listeners.try_borrow_mut() else {
                continue;
            };
            let removed = listeners.remove(events::UPDATE, listener);
            drop(listeners);
            if removed.is_some() {
                trace!("nested channel unlinked on parent drop");
            }
        }
    }
}

impl Channel {
    /// Create a channel with no fields.
    #[must_use]
    pub fn new(scheduler: SharedScheduler) -> Self {
        Self::with_fields(scheduler, Record::new())
    }

    /// Create a channel seeded with `fields`.
    ///
    /// Seeding is not a change: no notification is queued. Nested channels in
    /// `fields` are linked immediately.
    #[must_use]
    pub fn with_fields(scheduler: SharedScheduler, fields: Record) -> Self {
        let queue = Rc::new(DeferredQueue::new(scheduler));
        let inner = Rc::new_cyclic(|owner: &Weak<ChannelInner>| {
            let owner = owner.clone();
            let listener = Listener::new(move |_| {
                if let Some(inner) = owner.upgrade() {
                    Channel { inner }.emit(events::UPDATE, &[]);
                }
            });
            let before_update: BeforeUpdate = Rc::new(rewire);
            let hooks = Hooks::new(listener, queue, before_update);
            ChannelInner {
                listeners: RefCell::default(),
                fields: observe(fields, &hooks),
            }
        });
        Self { inner }
    }

    // -- listeners ----------------------------------------------------------

    /// Register `listener` for `event`. Already-registered listeners are
    /// ignored.
    pub fn on(&self, event: &str, listener: &Listener) {
        if !self.inner.listeners.borrow_mut().insert(event, listener) {
            trace!(event, "duplicate listener ignored");
        }
    }

    /// Alias for [`on`](Self::on).
    pub fn add_listener(&self, event: &str, listener: &Listener) {
        self.on(event, listener);
    }

    /// Register `listener` to run at most once, on the next `event`.
    ///
    /// Returns the registered wrapper, which can be passed to
    /// [`off`](Self::off) to cancel before it fires.
    pub fn once(&self, event: &str, listener: impl Fn(&[Value]) + 'static) -> Listener {
        let owner = Rc::downgrade(&self.inner);
        let event_key = event.to_owned();
        let wrapper = Listener::new_cyclic(move |me: WeakListener| {
            let fired = Cell::new(false);
            move |args: &[Value]| {
                if fired.replace(true) {
                    return;
                }
                if let (Some(inner), Some(me)) = (owner.upgrade(), me.upgrade()) {
                    Channel { inner }.off(&event_key, &me);
                }
                listener(args);
            }
        });
        self.on(event, &wrapper);
        wrapper
    }

    /// Remove `listener` from `event`. Absent listeners are ignored.
    pub fn off(&self, event: &str, listener: &Listener) {
        let removed = self.inner.listeners.borrow_mut().remove(event, listener);
        if removed.is_none() {
            trace!(event, "removal of unregistered listener ignored");
        }
    }

    /// Alias for [`off`](Self::off).
    pub fn remove_listener(&self, event: &str, listener: &Listener) {
        self.off(event, listener);
    }

    #[must_use]
    pub fn has_listener(&self, event: &str, listener: &Listener) -> bool {
        self.inner.listeners.borrow().contains(event, listener)
    }

    #[must_use]
    pub fn listener_count(&self, event: &str) -> usize {
        self.inner.listeners.borrow().count(event)
    }

    /// Shorthand for `on(events::UPDATE, listener)`.
    pub fn listen(&self, listener: &Listener) {
        self.on(events::UPDATE, listener);
    }

    /// Shorthand for `off(events::UPDATE, listener)`.
    pub fn unlisten(&self, listener: &Listener) {
        self.off(events::UPDATE, listener);
    }

    /// Call every listener registered for `event` when this call starts.
    ///
    /// # Panics
    ///
    /// Propagates a panic from any listener; later listeners do not run.
    pub fn emit(&self, event: &str, args: &[Value]) {
        let listeners = self.inner.listeners.borrow().snapshot(event);
        trace!(event, listeners = listeners.len(), "emit");
        for listener in &listeners {
            listener.call(args);
        }
    }

    /// Resolve with the arguments of the next `event`.
    ///
    /// Resolves to [`WaitError::Closed`] if the channel is dropped first.
    /// Dropping the returned future before the event unregisters it.
    #[must_use]
    pub fn wait(&self, event: &str) -> Wait {
        let (tx, rx) = oneshot::channel();
        let tx = RefCell::new(Some(tx));
        let wrapper = self.once(event, move |args| {
            if let Some(tx) = tx.borrow_mut().take() {
                let _ = tx.send(args.to_vec());
            }
        });
        Wait {
            rx,
            channel: Rc::downgrade(&self.inner),
            event: event.to_owned(),
            listener: wrapper.downgrade(),
        }
    }

    // -- fields -------------------------------------------------------------

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.fields.get(key)
    }

    /// Write a field. See [`Observed::set`].
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.inner.fields.set(key, value);
    }

    /// Delete a field. See [`Observed::delete`].
    pub fn delete(&self, key: &str) -> Option<Value> {
        self.inner.fields.delete(key)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.fields.contains_key(key)
    }

    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.inner.fields.keys()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.fields.is_empty()
    }

    /// Deep copy of the enumerable fields.
    #[must_use]
    pub fn snapshot(&self) -> Record {
        self.inner.fields.snapshot()
    }

    /// The observed record backing this channel.
    #[must_use]
    pub fn fields(&self) -> &Observed {
        &self.inner.fields
    }

    /// Whether an update emission is queued.
    #[must_use]
    pub fn is_update_pending(&self) -> bool {
        self.inner.fields.hooks().queue().is_pending()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Channel) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq<Record> for Channel {
    fn eq(&self, other: &Record) -> bool {
        self.snapshot() == *other
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("fields", &self.inner.fields)
            .field("listeners", &self.inner.listeners.borrow().total())
            .finish()
    }
}

/// Future returned by [`Channel::wait`].
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct Wait {
    rx: oneshot::Receiver<Vec<Value>>,
    channel: Weak<ChannelInner>,
    event: String,
    /// Weak so that dropping the channel still closes `rx`.
    listener: WeakListener,
}

impl Future for Wait {
    type Output = Result<Vec<Value>, WaitError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.map_err(|_| WaitError::Closed))
    }
}

impl Drop for Wait {
    fn drop(&mut self) {
        if let (Some(inner), Some(listener)) = (self.channel.upgrade(), self.listener.upgrade()) {
            Channel { inner }.off(&self.event, &listener);
        }
    }
}
