//! Per-key async mutual exclusion without a global lock.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Map of per-key mutexes. Operations on one connection id or entry name
/// serialize; distinct keys proceed independently. Idle keys are dropped
/// when their last guard is released.
#[derive(Debug, Default, Clone)]
pub struct KeyedLock {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

/// Holds the lock for one key until dropped.
#[derive(Debug)]
pub struct KeyedLockGuard {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedLock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `key`.
    pub async fn lock(&self, key: &str) -> KeyedLockGuard {
        let mutex = Arc::clone(
            self.locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        let guard = mutex.lock_owned().await;
        KeyedLockGuard {
            locks: Arc::clone(&self.locks),
            key: key.to_string(),
            guard: Some(guard),
        }
    }

    /// Number of keys currently locked or waited on.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Drop for KeyedLockGuard {
    fn drop(&mut self) {
        // Map entry plus this guard's handle: nobody else is waiting.
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) <= 2);
        self.guard.take();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn same_key_serializes() {
        let locks = KeyedLock::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let inside = Arc::clone(&inside);
            tasks.push(tokio::spawn(async move {
                let _guard = locks.lock("conn-1").await;
                assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn distinct_keys_do_not_block_each_other() {
        let locks = KeyedLock::new();
        let _a = locks.lock("a").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock("b")).await;
        assert!(b.is_ok());
        assert_eq!(locks.len(), 2);
    }
}
