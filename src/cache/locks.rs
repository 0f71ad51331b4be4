use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::sync::{Mutex, OwnedMutexGuard};

type LockTable = StdMutex<HashMap<String, Arc<Mutex<()>>>>;

/// Per-key async locks, created lazily and dropped from the table once no
/// holder or waiter references them. Unrelated keys never contend.
#[derive(Default)]
pub struct KeyedLocks {
    table: Arc<LockTable>,
}

/// Exclusive hold on one key; released on drop
pub struct KeyLockGuard {
    key: String,
    lock: Arc<Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
    table: Arc<LockTable>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &str) -> KeyLockGuard {
        let lock = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(
                table
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        let guard = Arc::clone(&lock).lock_owned().await;
        KeyLockGuard {
            key: key.to_string(),
            lock,
            guard: Some(guard),
            table: Arc::clone(&self.table),
        }
    }

    /// Number of keys currently held or awaited
    pub fn len(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyLockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for KeyLockGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        // one reference in the table, one here: nobody else is waiting
        if Arc::strong_count(&self.lock) == 2
            && table
                .get(&self.key)
                .is_some_and(|l| Arc::ptr_eq(l, &self.lock))
        {
            table.remove(&self.key);
        }
    }
}
