use std::{hash::Hash, sync::Arc};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Process-local async locks keyed by document identifier.
///
/// Multi-document writes acquire their keys in ascending order so two writers
/// touching the same pair of documents cannot deadlock.
pub struct KeyedLocks<K> {
    locks: DashMap<K, Arc<Mutex<()>>>,
}

impl<K> Default for KeyedLocks<K>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Ord + Clone,
{
    /// No key locked yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock a single key.
    pub async fn lock(&self, key: K) -> KeyGuard<'_, K> {
        let guard = self.handle(key.clone()).lock_owned().await;
        KeyGuard {
            locks: &self.locks,
            key,
            guard: Some(guard),
        }
    }

    /// Lock every key in `keys`, duplicates collapsed, in sorted order.
    pub async fn lock_all(&self, keys: &[K]) -> Vec<KeyGuard<'_, K>> {
        let mut keys = keys.to_vec();
        keys.sort();
        keys.dedup();
        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            guards.push(self.lock(key).await);
        }
        guards
    }

    fn handle(&self, key: K) -> Arc<Mutex<()>> {
        self.locks.entry(key).or_default().clone()
    }

    /// Number of keys with a live mutex.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no key currently has a mutex.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Holds one key locked. The key's mutex is dropped from the map with the
/// last guard or waiter referencing it.
pub struct KeyGuard<'a, K>
where
    K: Eq + Hash,
{
    locks: &'a DashMap<K, Arc<Mutex<()>>>,
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K> Drop for KeyGuard<'_, K>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters hold their own handle, so only the map's reference is left
        // once nobody else wants the key.
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;

    #[tokio::test]
    async fn opposite_orders_do_not_deadlock() {
        let locks = Arc::new(KeyedLocks::<u32>::new());
        let mut tasks = Vec::new();
        for round in 0..50 {
            let locks = locks.clone();
            tasks.push(tokio::spawn(async move {
                let keys = if round % 2 == 0 { [1, 2] } else { [2, 1] };
                let _guards = locks.lock_all(&keys).await;
                tokio::task::yield_now().await;
            }));
        }
        let all = futures::future::join_all(tasks);
        assert!(timeout(Duration::from_secs(5), all).await.is_ok());
    }

    #[tokio::test]
    async fn duplicate_keys_lock_once() {
        let locks = KeyedLocks::<u32>::new();
        let guards = timeout(Duration::from_secs(1), locks.lock_all(&[7, 7]))
            .await
            .unwrap();
        assert_eq!(guards.len(), 1);
    }

    #[tokio::test]
    async fn released_keys_are_forgotten() {
        let locks = Arc::new(KeyedLocks::<u32>::new());
        let first = locks.lock(1).await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(1).await;
            })
        };
        tokio::task::yield_now().await;
        drop(first);
        // The waiter still needs the mutex.
        timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert!(locks.is_empty());

        for key in 0..100 {
            drop(locks.lock(key).await);
        }
        assert!(locks.is_empty());
    }
}
