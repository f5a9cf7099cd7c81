use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Per-key async mutex map serializing operations on the same key (cell lock,
/// service lock — §4.3.1).
///
/// Entries are created on first use and dropped once the last guard for that
/// key is released, so the map never grows unbounded. Waiters queue FIFO on
/// the underlying `tokio::sync::Mutex`, so no key can starve another — this
/// is a map of independent locks, not one global lock.
pub struct KeyedLock<K> {
    locks: Arc<Mutex<HashMap<K, Arc<AsyncMutex<()>>>>>,
}

impl<K> Default for KeyedLock<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> KeyedLock<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Acquire the lock for `key`, blocking until any in-flight holder
    /// releases it. The key's map entry is removed once the returned guard
    /// (and any other waiters) are gone.
    pub async fn lock(&self, key: &K) -> KeyedLockGuard<K> {
        let entry = {
            let mut locks = self.locks.lock().expect("keyed lock map poisoned");
            locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let guard = entry.clone().lock_owned().await;
        KeyedLockGuard {
            guard: Some(guard),
            entry,
            key: key.clone(),
            map: self.locks.clone(),
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.locks.lock().expect("keyed lock map poisoned").len()
    }
}

/// RAII guard for [`KeyedLock::lock`]. Releases the per-key mutex on drop and
/// removes the map entry if no other waiter is holding a reference to it.
pub struct KeyedLockGuard<K> {
    guard: Option<OwnedMutexGuard<()>>,
    entry: Arc<AsyncMutex<()>>,
    key: K,
    map: Arc<Mutex<HashMap<K, Arc<AsyncMutex<()>>>>>,
}

impl<K> Drop for KeyedLockGuard<K>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.map.lock().expect("keyed lock map poisoned");
        // Two references remain when nobody else is waiting: the map's own
        // entry and this guard's `entry` clone (dropped right after we
        // return from this function).
        if Arc::strong_count(&self.entry) <= 2
            && let Some(current) = locks.get(&self.key)
            && Arc::ptr_eq(current, &self.entry)
        {
            locks.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn serializes_access_per_key() {
        let locks: Arc<KeyedLock<String>> = Arc::new(KeyedLock::new());
        let counter = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let locks = locks.clone();
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock(&"cell-1".to_string()).await;
                let before = counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                assert_eq!(counter.load(Ordering::SeqCst), before + 1);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn distinct_keys_do_not_block_each_other() {
        let locks: Arc<KeyedLock<String>> = Arc::new(KeyedLock::new());
        let a = locks.lock(&"a".to_string()).await;
        let b = tokio::time::timeout(Duration::from_millis(50), locks.lock(&"b".to_string()))
            .await
            .expect("lock on distinct key must not block");
        drop(a);
        drop(b);
    }

    #[tokio::test]
    async fn map_does_not_leak_entries_after_release() {
        let locks: KeyedLock<String> = KeyedLock::new();
        {
            let _guard = locks.lock(&"x".to_string()).await;
        }
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn fifo_no_starvation() {
        let locks: Arc<KeyedLock<String>> = Arc::new(KeyedLock::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        let first = locks.lock(&"k".to_string()).await;

        let mut handles = Vec::new();
        for i in 0..3 {
            let locks = locks.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let _g = locks.lock(&"k".to_string()).await;
                order.lock().unwrap().push(i);
            }));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(first);
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }
}
