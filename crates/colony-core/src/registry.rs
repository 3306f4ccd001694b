//! Thread-safe listener registry.
//!
//! Registration usually happens during setup and teardown, from threads
//! other than the driver. Dispatch never iterates the map while holding
//! the lock: it takes a [`snapshot`](ListenerRegistry::snapshot) of the
//! current tasks, so adding or removing a listener never waits on a tick
//! and a tick never observes a half-updated registry.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use colony_types::ListenerId;
use tracing::info;

use crate::listener::{ClockListener, ListenerTask};

/// Registered listeners keyed by handle.
#[derive(Debug, Default)]
pub struct ListenerRegistry {
    tasks: RwLock<BTreeMap<ListenerId, Arc<ListenerTask>>>,
}

impl ListenerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` and return its handle.
    pub fn add(&self, listener: Arc<dyn ClockListener>, min_duration_ms: u64) -> ListenerId {
        let id = ListenerId::new();
        let task = Arc::new(ListenerTask::new(id, listener, min_duration_ms));
        info!(
            listener = task.name(),
            listener_id = %id,
            min_duration_ms,
            "Listener registered"
        );
        self.tasks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, task);
        id
    }

    /// Unregister a listener. Returns `false` if the handle was unknown.
    ///
    /// A tick already in flight may still deliver to the removed listener;
    /// later ticks will not.
    pub fn remove(&self, id: ListenerId) -> bool {
        let removed = self
            .tasks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        if let Some(task) = &removed {
            info!(listener = task.name(), listener_id = %id, "Listener removed");
        }
        removed.is_some()
    }

    /// Look up one task.
    pub fn get(&self, id: ListenerId) -> Option<Arc<ListenerTask>> {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Copy of the current task list for one dispatch.
    pub fn snapshot(&self) -> Vec<Arc<ListenerTask>> {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.tasks.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether no listeners are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use colony_types::Pulse;

    use super::*;
    use crate::listener::ListenerError;

    struct Noop;

    impl ClockListener for Noop {
        fn on_pulse(&self, _pulse: &Pulse) -> Result<(), ListenerError> {
            Ok(())
        }
    }

    #[test]
    fn add_and_remove() {
        let registry = ListenerRegistry::new();
        assert!(registry.is_empty());
        let a = registry.add(Arc::new(Noop), 0);
        let b = registry.add(Arc::new(Noop), 250);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(b).unwrap().min_duration().as_millis(), 250);

        assert!(registry.remove(a));
        assert!(!registry.remove(a));
        assert_eq!(registry.len(), 1);
        assert!(registry.get(a).is_none());
    }

    #[test]
    fn snapshot_is_detached_from_later_changes() {
        let registry = ListenerRegistry::new();
        let a = registry.add(Arc::new(Noop), 0);
        let snapshot = registry.snapshot();
        registry.remove(a);
        let _ = registry.add(Arc::new(Noop), 0);
        let _ = registry.add(Arc::new(Noop), 0);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.first().map(|t| t.id()), Some(a));
        assert_eq!(registry.snapshot().len(), 2);
    }

    #[test]
    fn concurrent_registration() {
        let registry = Arc::new(ListenerRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let id = registry.add(Arc::new(Noop), 0);
                        let _ = registry.snapshot();
                        assert!(registry.remove(id));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(registry.is_empty());
    }
}
