#![forbid(unsafe_code)]

//! Observation wrapper for plain records.
//!
//! [`observe`] turns a raw [`Record`] into an [`Observed`] handle whose
//! writes and deletions run through one pipeline:
//!
//! ```text
//! set(key, next)
//!   → prev.is_same(next)?  yes → no-op
//!   → before_update(prev, next, listener)      // nested listener rewiring
//!   → store next (raw records wrapped first)
//!   → queue.push(listener)                     // coalesced notification
//! ```
//!
//! `delete(key)` runs the same pipeline with `next = None`, and is a no-op
//! when the key is absent.
//!
//! # Invariants
//!
//! 1. Reads return the stored value unmodified; observed values come back as
//!    the same handle.
//! 2. Wrapping is eager and recursive: no raw record is ever stored inside an
//!    observed record.
//! 3. Already-observed values (objects and channels) are stored as-is.
//! 4. No `RefCell` borrow is held while the pre-update hook or the queue run.
//!
//! Nested observed records share the hooks of the record that wrapped them,
//! so a write at any depth notifies the owning channel.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use tracing::trace;

use crate::listener::Listener;
use crate::queue::DeferredQueue;
use crate::value::{Record, Value};

/// Pre-update hook: `(previous, next, notification_listener)`.
///
/// `None` means the field is absent (before insertion, or after deletion).
pub type BeforeUpdate = Rc<dyn Fn(Option<&Value>, Option<&Value>, &Listener)>;

/// Everything an observed record needs to report a change.
#[derive(Clone)]
pub struct Hooks {
    listener: Listener,
    queue: Rc<DeferredQueue>,
    before_update: BeforeUpdate,
}

impl Hooks {
    pub fn new(listener: Listener, queue: Rc<DeferredQueue>, before_update: BeforeUpdate) -> Self {
        Self {
            listener,
            queue,
            before_update,
        }
    }

    /// The notification listener pushed onto the queue on every change.
    #[must_use]
    pub fn listener(&self) -> &Listener {
        &self.listener
    }

    #[must_use]
    pub fn queue(&self) -> &DeferredQueue {
        &self.queue
    }

    fn before_update(&self, prev: Option<&Value>, next: Option<&Value>) {
        (self.before_update)(prev, next, &self.listener);
    }

    fn notify(&self) {
        let listener = self.listener.clone();
        self.queue.push(move || listener.call(&[]));
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("listener", &self.listener)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

struct ObservedInner {
    fields: RefCell<BTreeMap<String, Value>>,
    hooks: Hooks,
}

/// Handle to an observed plain record.
///
/// Cloning shares the record. Equality via [`Value`] is structural; use
/// [`ptr_eq`](Self::ptr_eq) for identity.
#[derive(Clone)]
pub struct Observed {
    inner: Rc<ObservedInner>,
}

/// Wrap `target` so that its mutations report through `hooks`.
///
/// Every initial field is passed to the pre-update hook as an insertion
/// (`prev = None`), so nested channels in `target` are wired up, but no
/// notification is queued: construction is not a change.
pub fn observe(target: Record, hooks: &Hooks) -> Observed {
    for value in target.values() {
        hooks.before_update(None, Some(value));
    }
    wrap_record(target, hooks)
}

/// Whether `value` is already observed and would be stored as-is.
#[must_use]
pub fn is_observer(value: &Value) -> bool {
    value.is_observed()
}

fn wrap_record(target: Record, hooks: &Hooks) -> Observed {
    let fields = target
        .into_iter()
        .map(|(key, value)| (key, wrap_value(value, hooks)))
        .collect();
    Observed {
        inner: Rc::new(ObservedInner {
            fields: RefCell::new(fields),
            hooks: hooks.clone(),
        }),
    }
}

fn wrap_value(value: Value, hooks: &Hooks) -> Value {
    match value {
        Value::Record(record) => Value::Object(wrap_record(record, hooks)),
        other => other,
    }
}

impl Observed {
    /// Current value of `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.fields.borrow().get(key).cloned()
    }

    /// Write `key`. A value that [`is_same`](Value::is_same) as the stored one
    /// is ignored.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        let prev = self.get(&key);
        if prev.as_ref().is_some_and(|prev| prev.is_same(&value)) {
            trace!(key = %key, "write of identical value ignored");
            return;
        }

        let hooks = &self.inner.hooks;
        hooks.before_update(prev.as_ref(), Some(&value));
        let stored = wrap_value(value, hooks);
        self.inner.fields.borrow_mut().insert(key, stored);
        // Release the old value only after the map borrow ends; it may be the
        // last handle to a channel.
        drop(prev);
        hooks.notify();
    }

    /// Remove `key`, returning the removed value. Absent keys are a no-op.
    pub fn delete(&self, key: &str) -> Option<Value> {
        let Some(prev) = self.get(key) else {
            trace!(key, "delete of absent field ignored");
            return None;
        };

        let hooks = &self.inner.hooks;
        hooks.before_update(Some(&prev), None);
        let removed = self.inner.fields.borrow_mut().remove(key);
        hooks.notify();
        removed
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.fields.borrow().contains_key(key)
    }

    /// Field names in enumeration order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.inner.fields.borrow().keys().cloned().collect()
    }

    /// Field values in enumeration order.
    #[must_use]
    pub fn values(&self) -> Vec<Value> {
        self.inner.fields.borrow().values().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.fields.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.fields.borrow().is_empty()
    }

    /// Deep copy of the enumerable data as a raw record.
    #[must_use]
    pub fn snapshot(&self) -> Record {
        self.inner
            .fields
            .borrow()
            .iter()
            .map(|(key, value)| (key.clone(), value.to_plain()))
            .collect()
    }

    #[must_use]
    pub fn hooks(&self) -> &Hooks {
        &self.inner.hooks
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Observed) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq<Record> for Observed {
    fn eq(&self, other: &Record) -> bool {
        self.snapshot() == *other
    }
}

impl fmt::Debug for Observed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.inner.fields.borrow().iter())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{FrameScheduler, SharedScheduler};
    use std::cell::Cell;

    type HookLog = Rc<RefCell<Vec<(Option<Value>, Option<Value>)>>>;

    struct Harness {
        frames: Rc<FrameScheduler>,
        hooks: Hooks,
        notified: Rc<Cell<u32>>,
        hook_log: HookLog,
    }

    fn harness() -> Harness {
        let frames = Rc::new(FrameScheduler::new());
        let queue = Rc::new(DeferredQueue::new(Rc::clone(&frames) as SharedScheduler));
        let notified = Rc::new(Cell::new(0));
        let notified_clone = Rc::clone(&notified);
        let listener = Listener::new(move |_| notified_clone.set(notified_clone.get() + 1));
        let hook_log: HookLog = Rc::default();
        let hook_log_clone = Rc::clone(&hook_log);
        let before_update: BeforeUpdate = Rc::new(
            move |prev: Option<&Value>, next: Option<&Value>, _listener: &Listener| {
            hook_log_clone
                .borrow_mut()
                .push((prev.cloned(), next.cloned()));
            },
        );
        Harness {
            frames,
            hooks: Hooks::new(listener, queue, before_update),
            notified,
            hook_log,
        }
    }

    #[test]
    fn reads_pass_through() {
        let h = harness();
        let obs = observe(Record::new().with("a", 1).with("b", "x"), &h.hooks);
        assert_eq!(obs.get("a"), Some(Value::from(1)));
        assert_eq!(obs.get("missing"), None);
        assert_eq!(obs.keys(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(obs.len(), 2);
        assert!(obs == Record::new().with("a", 1).with("b", "x"));
    }

    #[test]
    fn construction_does_not_notify() {
        let h = harness();
        let _obs = observe(Record::new().with("a", 1), &h.hooks);
        assert_eq!(h.frames.pending(), 0);
        // Initial fields are reported as insertions.
        assert_eq!(*h.hook_log.borrow(), vec![(None, Some(Value::from(1)))]);
    }

    #[test]
    fn write_runs_hook_then_notifies_once_per_frame() {
        let h = harness();
        let obs = observe(Record::new(), &h.hooks);
        obs.set("a", 1);
        obs.set("a", 2);
        obs.set("b", true);
        assert_eq!(h.notified.get(), 0);
        assert_eq!(h.hook_log.borrow().len(), 3);
        assert_eq!(
            h.hook_log.borrow()[1],
            (Some(Value::from(1)), Some(Value::from(2)))
        );

        h.frames.run_frame();
        assert_eq!(h.notified.get(), 1);
    }

    #[test]
    fn identical_write_is_noop() {
        let h = harness();
        let obs = observe(Record::new().with("a", 1), &h.hooks);
        h.hook_log.borrow_mut().clear();
        obs.set("a", 1);
        assert!(h.hook_log.borrow().is_empty());
        assert_eq!(h.frames.pending(), 0);
    }

    #[test]
    fn delete_present_and_absent() {
        let h = harness();
        let obs = observe(Record::new().with("a", 1), &h.hooks);
        h.hook_log.borrow_mut().clear();

        assert_eq!(obs.delete("missing"), None);
        assert!(h.hook_log.borrow().is_empty());
        assert_eq!(h.frames.pending(), 0);

        assert_eq!(obs.delete("a"), Some(Value::from(1)));
        assert_eq!(*h.hook_log.borrow(), vec![(Some(Value::from(1)), None)]);
        assert!(!obs.contains_key("a"));
        h.frames.run_frame();
        assert_eq!(h.notified.get(), 1);
    }

    #[test]
    fn raw_records_are_wrapped_recursively() {
        let h = harness();
        let obs = observe(Record::new(), &h.hooks);
        obs.set(
            "profile",
            Record::new().with("address", Record::new().with("city", "Austin")),
        );
        h.frames.run_frame();
        assert_eq!(h.notified.get(), 1);

        let profile = obs.get("profile").unwrap();
        assert!(is_observer(&profile));
        let address = profile.as_object().unwrap().get("address").unwrap();
        assert!(is_observer(&address));

        // A write two levels down notifies the owner.
        address.as_object().unwrap().set("city", "Dallas");
        h.frames.run_frame();
        assert_eq!(h.notified.get(), 2);
        assert_eq!(
            obs.snapshot(),
            Record::new().with(
                "profile",
                Record::new().with("address", Record::new().with("city", "Dallas"))
            )
        );
    }

    #[test]
    fn observed_values_are_stored_as_is() {
        let h = harness();
        let obs = observe(Record::new(), &h.hooks);
        let child = observe(Record::new().with("n", 1), &h.hooks);
        obs.set("child", child.clone());
        let stored = obs.get("child").unwrap();
        assert!(stored.as_object().unwrap().ptr_eq(&child));

        // Re-assigning the same handle is not a change.
        h.frames.run_frame();
        obs.set("child", child);
        assert_eq!(h.frames.pending(), 0);
    }

    #[test]
    fn fresh_record_always_counts_as_change() {
        let h = harness();
        let obs = observe(Record::new().with("r", Record::new()), &h.hooks);
        obs.set("r", Record::new());
        assert_eq!(h.frames.pending(), 1);
    }
}
