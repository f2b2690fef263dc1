//! Typed change notifications with unsubscribe handles.
//!
//! Each payload kind (tasks, activity, save errors, sync state) gets its
//! own [`Observers`] list. Subscribing returns a [`Subscription`]; dropping
//! it (or calling [`Subscription::unsubscribe`]) removes the callback.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    next_id: u64,
    callbacks: Vec<(u64, Callback<T>)>,
}

pub struct Observers<T> {
    registry: Arc<Mutex<Registry<T>>>,
}

impl<T: 'static> Default for Observers<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Observers<T> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                callbacks: Vec::new(),
            })),
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = {
            let mut registry = self.registry.lock();
            let id = registry.next_id;
            registry.next_id += 1;
            registry.callbacks.push((id, Arc::new(callback)));
            id
        };
        let weak: Weak<Mutex<Registry<T>>> = Arc::downgrade(&self.registry);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(registry) = weak.upgrade() {
                    registry.lock().callbacks.retain(|(cb_id, _)| *cb_id != id);
                }
            })),
        }
    }

    /// Call every subscriber. Callbacks run outside the registry lock, so a
    /// callback may subscribe or unsubscribe.
    pub fn notify(&self, payload: &T) {
        let callbacks: Vec<Callback<T>> = self
            .registry
            .lock()
            .callbacks
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        for cb in callbacks {
            cb(payload);
        }
    }

    pub fn len(&self) -> usize {
        self.registry.lock().callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Unsubscribes on drop.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    /// Keep the callback registered for the lifetime of the observer list.
    pub fn detach(mut self) {
        self.cancel = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_notify_reaches_subscribers() {
        let observers: Observers<u32> = Observers::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let s = seen.clone();
        let _sub = observers.subscribe(move |v| {
            s.fetch_add(*v as usize, Ordering::SeqCst);
        });
        observers.notify(&2);
        observers.notify(&3);
        assert_eq!(seen.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let observers: Observers<()> = Observers::new();
        let sub = observers.subscribe(|_| {});
        assert_eq!(observers.len(), 1);
        drop(sub);
        assert!(observers.is_empty());
    }

    #[test]
    fn test_unsubscribe_only_removes_own_callback() {
        let observers: Observers<()> = Observers::new();
        let first = observers.subscribe(|_| {});
        let _second = observers.subscribe(|_| {});
        first.unsubscribe();
        assert_eq!(observers.len(), 1);
    }

    #[test]
    fn test_detach_keeps_callback() {
        let observers: Observers<()> = Observers::new();
        observers.subscribe(|_| {}).detach();
        assert_eq!(observers.len(), 1);
    }

    #[test]
    fn test_subscription_outliving_observers_is_harmless() {
        let observers: Observers<()> = Observers::new();
        let sub = observers.subscribe(|_| {});
        drop(observers);
        drop(sub);
    }
}
