//! # Observer Fan-out
//!
//! A registry of callback objects that all receive every notification.
//!
//! ## Overview
//!
//! [`ObserverList`] backs both the aggregator's observer set and the playback
//! channel's callback set. It provides:
//! - Independent registration and removal through [`ObserverId`] tokens
//! - Snapshot delivery: observers added during a notification are not called
//!   for it, observers removed during one are skipped if not yet reached
//! - Isolation: an observer that panics is logged and unregistered, the
//!   remaining observers still receive the notification
//!
//! Delivery happens on the notifying thread, so callbacks must return
//! promptly.
//!
//! ```
//! use core_runtime::ObserverList;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! let list: ObserverList<AtomicUsize> = ObserverList::new("counters");
//! let counter = Arc::new(AtomicUsize::new(0));
//! let id = list.register(counter.clone());
//!
//! list.notify(|c| {
//!     c.fetch_add(1, Ordering::SeqCst);
//! });
//! assert!(list.unregister(id));
//! list.notify(|c| {
//!     c.fetch_add(1, Ordering::SeqCst);
//! });
//! assert_eq!(counter.load(Ordering::SeqCst), 1);
//! ```

use parking_lot::RwLock;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Registration token returned by [`ObserverList::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer-{}", self.0)
    }
}

struct Entry<T: ?Sized> {
    id: ObserverId,
    observer: Arc<T>,
    active: Arc<AtomicBool>,
}

impl<T: ?Sized> Clone for Entry<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            observer: Arc::clone(&self.observer),
            active: Arc::clone(&self.active),
        }
    }
}

pub struct ObserverList<T: ?Sized> {
    label: &'static str,
    entries: RwLock<Vec<Entry<T>>>,
    next_id: AtomicU64,
}

impl<T: ?Sized + Send + Sync> ObserverList<T> {
    /// `label` names the list in log output.
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            entries: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn register(&self, observer: Arc<T>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.write().push(Entry {
            id,
            observer,
            active: Arc::new(AtomicBool::new(true)),
        });
        id
    }

    /// Remove an observer. Returns `false` if the id was unknown.
    ///
    /// A notification already in progress on another thread skips the
    /// observer if it has not reached it yet.
    pub fn unregister(&self, id: ObserverId) -> bool {
        let mut entries = self.entries.write();
        match entries.iter().position(|entry| entry.id == id) {
            Some(index) => {
                let entry = entries.remove(index);
                entry.active.store(false, Ordering::Release);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: ObserverId) -> bool {
        self.entries.read().iter().any(|entry| entry.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut entries = self.entries.write();
        for entry in entries.drain(..) {
            entry.active.store(false, Ordering::Release);
        }
    }

    /// Call `deliver` once for every registered observer. Returns how many
    /// observers received the notification.
    pub fn notify<F>(&self, deliver: F) -> usize
    where
        F: Fn(&T),
    {
        let snapshot: Vec<Entry<T>> = self.entries.read().clone();

        let mut delivered = 0;
        let mut panicked = Vec::new();

        for entry in &snapshot {
            if !entry.active.load(Ordering::Acquire) {
                continue;
            }
            let observer = entry.observer.as_ref();
            match catch_unwind(AssertUnwindSafe(|| deliver(observer))) {
                Ok(()) => delivered += 1,
                Err(_) => panicked.push(entry.id),
            }
        }

        for id in panicked {
            warn!(list = self.label, observer = %id, "Observer panicked during delivery; unregistering it");
            self.unregister(id);
        }

        delivered
    }
}

impl<T: ?Sized> fmt::Debug for ObserverList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.entries.read().len();
        f.debug_struct("ObserverList")
            .field("label", &self.label)
            .field("observers", &count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    trait Listener: Send + Sync {
        fn hear(&self, value: u32);
    }

    #[derive(Default)]
    struct Recorder {
        heard: Mutex<Vec<u32>>,
    }

    impl Listener for Recorder {
        fn hear(&self, value: u32) {
            self.heard.lock().unwrap().push(value);
        }
    }

    struct Exploding;

    impl Listener for Exploding {
        fn hear(&self, _value: u32) {
            panic!("listener failure");
        }
    }

    #[test]
    fn test_every_observer_receives_each_notification_once() {
        let list: ObserverList<dyn Listener> = ObserverList::new("test");
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        list.register(a.clone());
        list.register(b.clone());

        assert_eq!(list.notify(|l| l.hear(1)), 2);
        assert_eq!(list.notify(|l| l.hear(2)), 2);

        assert_eq!(*a.heard.lock().unwrap(), vec![1, 2]);
        assert_eq!(*b.heard.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_unregistered_observer_stops_receiving() {
        let list: ObserverList<dyn Listener> = ObserverList::new("test");
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        let id_a = list.register(a.clone());
        list.register(b.clone());

        list.notify(|l| l.hear(1));
        assert!(list.unregister(id_a));
        assert!(!list.unregister(id_a));
        list.notify(|l| l.hear(2));

        assert_eq!(*a.heard.lock().unwrap(), vec![1]);
        assert_eq!(*b.heard.lock().unwrap(), vec![1, 2]);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_panicking_observer_is_removed_without_affecting_others() {
        let list: ObserverList<dyn Listener> = ObserverList::new("test");
        let healthy = Arc::new(Recorder::default());
        let bad_id = list.register(Arc::new(Exploding));
        list.register(healthy.clone());

        assert_eq!(list.notify(|l| l.hear(7)), 1);
        assert!(!list.contains(bad_id));
        assert_eq!(list.notify(|l| l.hear(8)), 1);
        assert_eq!(*healthy.heard.lock().unwrap(), vec![7, 8]);
    }

    #[test]
    fn test_observer_removed_mid_delivery_is_skipped() {
        struct Remover {
            list: Arc<ObserverList<dyn Listener>>,
            victim: Mutex<Option<ObserverId>>,
        }

        impl Listener for Remover {
            fn hear(&self, _value: u32) {
                if let Some(id) = self.victim.lock().unwrap().take() {
                    self.list.unregister(id);
                }
            }
        }

        let list: Arc<ObserverList<dyn Listener>> = Arc::new(ObserverList::new("test"));
        let remover = Arc::new(Remover {
            list: list.clone(),
            victim: Mutex::new(None),
        });
        let late = Arc::new(Recorder::default());

        list.register(remover.clone());
        let late_id = list.register(late.clone());
        *remover.victim.lock().unwrap() = Some(late_id);

        assert_eq!(list.notify(|l| l.hear(1)), 1);
        assert!(late.heard.lock().unwrap().is_empty());
    }

    #[test]
    fn test_clear() {
        let list: ObserverList<dyn Listener> = ObserverList::new("test");
        list.register(Arc::new(Recorder::default()));
        list.clear();
        assert!(list.is_empty());
        assert_eq!(list.notify(|l| l.hear(1)), 0);
    }
}
