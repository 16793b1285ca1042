//! Observer registry and snapshot fan-out
//!
//! Observers are called synchronously, in subscription order. Each call is
//! isolated: an observer that panics is logged and skipped, the others still
//! receive the snapshot. A removed observer is never called again, even by a
//! fan-out that was already under way when it was removed.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, warn};

use super::types::Track;

/// Callback invoked with every new snapshot
pub type Observer = Box<dyn FnMut(&[Track]) + Send + 'static>;

/// Identifies one registration in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub u64);

pub(crate) struct ObserverEntry {
    id: ObserverId,
    /// Cleared on removal, checked before every call
    active: AtomicBool,
    callback: Mutex<Observer>,
}

type SharedObserver = Arc<ObserverEntry>;

#[derive(Default)]
pub(crate) struct ObserverRegistry {
    next_id: u64,
    entries: Vec<SharedObserver>,
}

impl ObserverRegistry {
    pub fn add(&mut self, observer: Observer) -> ObserverId {
        let id = ObserverId(self.next_id);
        self.next_id += 1;
        self.entries.push(Arc::new(ObserverEntry {
            id,
            active: AtomicBool::new(true),
            callback: Mutex::new(observer),
        }));
        id
    }

    /// Remove an observer, returning whether it was registered
    ///
    /// A call already running when this returns is allowed to finish.
    pub fn remove(&mut self, id: ObserverId) -> bool {
        let Some(index) = self.entries.iter().position(|entry| entry.id == id) else {
            return false;
        };
        let entry = self.entries.remove(index);
        entry.active.store(false, Ordering::SeqCst);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy of the current observers so fan-out runs without holding the registry lock
    pub fn handles(&self) -> Vec<SharedObserver> {
        self.entries.clone()
    }
}

/// Deliver `snapshot` to each observer in order
///
/// Returns how many observers completed without panicking.
pub(crate) fn notify_all(observers: &[SharedObserver], snapshot: &[Track]) -> usize {
    let mut delivered = 0;
    for entry in observers {
        let mut callback = entry.callback.lock().unwrap_or_else(PoisonError::into_inner);
        if !entry.active.load(Ordering::SeqCst) {
            debug!("Observer {:?} was removed during fan-out, skipping", entry.id);
            continue;
        }
        match catch_unwind(AssertUnwindSafe(|| (&mut **callback)(snapshot))) {
            Ok(()) => delivered += 1,
            Err(_) => warn!("Observer {:?} panicked while handling a snapshot", entry.id),
        }
    }
    debug!("Delivered snapshot to {}/{} observers", delivered, observers.len());
    delivered
}

/// Lock a registry, recovering it if an earlier holder panicked
pub(crate) fn lock_registry(registry: &Mutex<ObserverRegistry>) -> MutexGuard<'_, ObserverRegistry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_removed_observer_skipped_by_earlier_handles() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut registry = ObserverRegistry::default();
        let first = {
            let count = Arc::clone(&count);
            registry.add(Box::new(move |_: &[Track]| {
                count.fetch_add(1, Ordering::SeqCst);
            }))
        };
        let second = {
            let count = Arc::clone(&count);
            registry.add(Box::new(move |_: &[Track]| {
                count.fetch_add(10, Ordering::SeqCst);
            }))
        };

        let handles = registry.handles();
        assert!(registry.remove(second));
        assert!(!registry.remove(second));

        assert_eq!(notify_all(&handles, &[]), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
        assert!(registry.remove(first));
        assert!(registry.is_empty());
    }
}
