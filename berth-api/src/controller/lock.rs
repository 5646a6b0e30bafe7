//! Per-container action locks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError, Weak};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Held for the whole of one mutating action on a container.
pub type ContainerGuard = OwnedMutexGuard<()>;

/// Lazily created mutex per container UUID. Entries hold weak references
/// and are pruned once no holder or waiter remains.
#[derive(Default)]
pub struct LockRegistry {
    locks: StdMutex<HashMap<Uuid, Weak<Mutex<()>>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(lock) = locks.get(&id).and_then(Weak::upgrade) {
            return lock;
        }
        locks.retain(|_, weak| weak.strong_count() > 0);
        let lock = Arc::new(Mutex::new(()));
        locks.insert(id, Arc::downgrade(&lock));
        lock
    }

    /// Wait for the container's lock. Waiters are served in FIFO order.
    pub async fn acquire(&self, id: Uuid) -> ContainerGuard {
        self.handle(id).lock_owned().await
    }

    /// True while an action holds the container's lock.
    pub fn is_held(&self, id: Uuid) -> bool {
        let lock = self
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .and_then(Weak::upgrade);
        lock.is_some_and(|lock| lock.try_lock().is_err())
    }

    /// Number of containers with a live lock.
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
