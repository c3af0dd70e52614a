#![forbid(unsafe_code)]

//! Listener handles and the per-event listener registry.
//!
//! A [`Listener`] is a reference-counted callback. Its identity is the
//! allocation: clones of one listener are the same listener, two listeners
//! built from identical closures are not. The registry uses that identity to
//! reject duplicates and to find the entry to remove.

use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::value::Value;

type ListenerFn = dyn Fn(&[Value]);

/// An event listener with reference identity.
#[derive(Clone)]
pub struct Listener {
    callback: Rc<ListenerFn>,
}

impl Listener {
    pub fn new(callback: impl Fn(&[Value]) + 'static) -> Self {
        Self {
            callback: Rc::new(callback),
        }
    }

    /// Build a listener whose closure holds a weak handle to itself.
    pub(crate) fn new_cyclic<F>(build: impl FnOnce(WeakListener) -> F) -> Self
    where
        F: Fn(&[Value]) + 'static,
    {
        let callback: Rc<F> = Rc::new_cyclic(|weak: &Weak<F>| {
            let weak: Weak<ListenerFn> = weak.clone();
            build(WeakListener { callback: weak })
        });
        Self { callback }
    }

    pub fn call(&self, args: &[Value]) {
        (self.callback)(args);
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Listener) -> bool {
        Rc::ptr_eq(&self.callback, &other.callback)
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakListener {
        WeakListener {
            callback: Rc::downgrade(&self.callback),
        }
    }
}

impl PartialEq for Listener {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Listener {}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Listener")
            .field(&Rc::as_ptr(&self.callback).cast::<()>())
            .finish()
    }
}

/// Non-owning listener handle.
#[derive(Clone)]
pub struct WeakListener {
    callback: Weak<ListenerFn>,
}

impl WeakListener {
    #[must_use]
    pub fn upgrade(&self) -> Option<Listener> {
        self.callback.upgrade().map(|callback| Listener { callback })
    }
}

impl fmt::Debug for WeakListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakListener").finish_non_exhaustive()
    }
}

/// Event type → listeners in registration order.
#[derive(Default)]
pub(crate) struct ListenerRegistry {
    by_event: HashMap<String, Vec<Listener>>,
}

impl ListenerRegistry {
    pub(crate) fn contains(&self, event: &str, listener: &Listener) -> bool {
        self.by_event
            .get(event)
            .is_some_and(|list| list.iter().any(|l| l.ptr_eq(listener)))
    }

    /// Append unless already present. Returns whether it was added.
    pub(crate) fn insert(&mut self, event: &str, listener: &Listener) -> bool {
        if self.contains(event, listener) {
            return false;
        }
        self.by_event
            .entry(event.to_owned())
            .or_default()
            .push(listener.clone());
        true
    }

    /// Remove if present, handing back the registry's handle.
    ///
    /// Callers drop the returned handle after releasing their borrow: it may
    /// be the last owner of state that touches this registry on drop.
    pub(crate) fn remove(&mut self, event: &str, listener: &Listener) -> Option<Listener> {
        let list = self.by_event.get_mut(event)?;
        let pos = list.iter().position(|l| l.ptr_eq(listener))?;
        let removed = list.remove(pos);
        if list.is_empty() {
            self.by_event.remove(event);
        }
        Some(removed)
    }

    /// Copy of the listeners for `event`, taken before delivery starts.
    pub(crate) fn snapshot(&self, event: &str) -> Vec<Listener> {
        self.by_event.get(event).cloned().unwrap_or_default()
    }

    pub(crate) fn count(&self, event: &str) -> usize {
        self.by_event.get(event).map_or(0, Vec::len)
    }

    pub(crate) fn total(&self) -> usize {
        self.by_event.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn clones_share_identity() {
        let a = Listener::new(|_| {});
        let b = a.clone();
        let c = Listener::new(|_| {});
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn insert_rejects_duplicates() {
        let mut reg = ListenerRegistry::default();
        let a = Listener::new(|_| {});
        assert!(reg.insert("update", &a));
        assert!(!reg.insert("update", &a.clone()));
        assert_eq!(reg.count("update"), 1);

        // Same listener on another event is a separate registration.
        assert!(reg.insert("other", &a));
        assert_eq!(reg.total(), 2);
    }

    #[test]
    fn remove_absent_is_noop() {
        let mut reg = ListenerRegistry::default();
        let a = Listener::new(|_| {});
        assert!(reg.remove("update", &a).is_none());
        reg.insert("update", &a);
        assert_eq!(reg.remove("update", &a), Some(a.clone()));
        assert!(reg.remove("update", &a).is_none());
        assert_eq!(reg.count("update"), 0);
    }

    #[test]
    fn snapshot_preserves_order() {
        let mut reg = ListenerRegistry::default();
        let a = Listener::new(|_| {});
        let b = Listener::new(|_| {});
        let c = Listener::new(|_| {});
        reg.insert("e", &a);
        reg.insert("e", &b);
        reg.insert("e", &c);
        reg.remove("e", &b);
        reg.insert("e", &b);
        assert_eq!(reg.snapshot("e"), vec![a, c, b]);
        assert!(reg.snapshot("missing").is_empty());
    }

    #[test]
    fn call_passes_args() {
        let seen = Rc::new(Cell::new(0usize));
        let seen_clone = Rc::clone(&seen);
        let l = Listener::new(move |args| seen_clone.set(args.len()));
        l.call(&[Value::Null, Value::from(1)]);
        assert_eq!(seen.get(), 2);
    }

    #[test]
    fn weak_listener_upgrades_while_alive() {
        let l = Listener::new(|_| {});
        let weak = l.downgrade();
        assert_eq!(weak.upgrade(), Some(l.clone()));
        drop(l);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn cyclic_listener_sees_itself() {
        let found = Rc::new(Cell::new(false));
        let found_clone = Rc::clone(&found);
        let l = Listener::new_cyclic(move |me| {
            move |_args: &[Value]| found_clone.set(me.upgrade().is_some())
        });
        l.call(&[]);
        assert!(found.get());
    }
}
