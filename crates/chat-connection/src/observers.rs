//! Ordered observer registries.
//!
//! Callbacks are dispatched in registration order. The registry lock is
//! released before any callback runs, so a callback may subscribe or
//! unsubscribe without deadlocking.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    next_id: u64,
    entries: Vec<(u64, Callback<T>)>,
    /// Last published value, replayed to new subscribers.
    current: Option<T>,
}

/// A shared, ordered list of callbacks for values of type `T`.
pub(crate) struct Observers<T> {
    inner: Arc<Mutex<Registry<T>>>,
}

impl<T> Clone for Observers<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T: Clone + Send + 'static> Observers<T> {
    /// Registry for events; nothing is replayed on subscribe.
    pub(crate) fn new() -> Self {
        Self::with_current(None)
    }

    /// Registry for a value; new subscribers immediately receive the
    /// current value.
    pub(crate) fn retaining(initial: T) -> Self {
        Self::with_current(Some(initial))
    }

    fn with_current(current: Option<T>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Registry {
                next_id: 0,
                entries: Vec::new(),
                current,
            })),
        }
    }

    pub(crate) fn subscribe(&self, cb: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let cb: Callback<T> = Arc::new(cb);
        let (id, current) = {
            let mut reg = lock(&self.inner);
            let id = reg.next_id;
            reg.next_id += 1;
            reg.entries.push((id, cb.clone()));
            (id, reg.current.clone())
        };

        if let Some(value) = current {
            cb(&value);
        }

        let weak = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                lock(&inner).entries.retain(|(entry_id, _)| *entry_id != id);
            }
        })
    }

    /// Delivers a value without retaining it.
    pub(crate) fn emit(&self, value: &T) {
        let snapshot = self.snapshot();
        for cb in snapshot {
            cb(value);
        }
    }

    /// Stores a value as current and delivers it.
    pub(crate) fn publish(&self, value: T) {
        let snapshot = {
            let mut reg = lock(&self.inner);
            reg.current = Some(value.clone());
            reg.entries.iter().map(|(_, cb)| cb.clone()).collect::<Vec<_>>()
        };
        for cb in snapshot {
            cb(&value);
        }
    }

    pub(crate) fn current(&self) -> Option<T> {
        lock(&self.inner).current.clone()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        lock(&self.inner).entries.len()
    }

    fn snapshot(&self) -> Vec<Callback<T>> {
        lock(&self.inner)
            .entries
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect()
    }
}

/// Handle returned by every `on_*` registration.
///
/// Dropping the handle keeps the callback registered; call
/// [`Subscription::unsubscribe`] to remove it.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Removes the callback. Later dispatches will not reach it.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}
