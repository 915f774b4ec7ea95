//! In-memory storage adapters.
//!
//! Provides concurrent, sharded storage for counters, sessions and the
//! security journal.

use crate::application::ports::{Backend, Storage};
use crate::domain::error::StorageError;
use crate::domain::events::{RequestAuditEntry, SecurityEvent};
use crate::domain::records::{CounterRecord, SessionRecord};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;
use uuid::Uuid;

/// Thread-safe sharded storage backed by DashMap.
///
/// DashMap provides lock-free reads and fine-grained locking for writes.
/// Every read-check-write runs while holding the shard lock of its key, so
/// two requests for the same session or counter are serialized while
/// different keys proceed in parallel.
#[derive(Debug)]
pub struct ShardedStorage<K, V>
where
    K: Eq + Hash + Clone,
{
    map: DashMap<K, V, ahash::RandomState>,
}

impl<K, V> ShardedStorage<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create a new sharded storage instance.
    pub fn new() -> Self {
        Self {
            map: DashMap::with_hasher(ahash::RandomState::new()),
        }
    }

    /// Check if a key exists.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.contains_key(key)
    }
}

impl<K, V> Default for ShardedStorage<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Storage<K, V> for ShardedStorage<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + std::fmt::Debug,
    V: Clone + Send + Sync + std::fmt::Debug,
{
    fn get(&self, key: &K) -> Option<V> {
        self.map.get(key).map(|entry| entry.value().clone())
    }

    fn insert(&self, key: K, value: V) {
        self.map.insert(key, value);
    }

    fn with_entry_mut<F, R>(
        &self,
        key: K,
        mut factory: impl FnMut() -> V,
        mut accessor: F,
    ) -> Result<R, StorageError>
    where
        F: FnMut(&mut V, bool) -> R,
    {
        Ok(match self.map.entry(key) {
            Entry::Occupied(mut occupied) => accessor(occupied.get_mut(), false),
            Entry::Vacant(vacant) => {
                let mut value_ref = vacant.insert(factory());
                accessor(&mut value_ref, true)
            }
        })
    }

    fn update<F, R>(&self, key: &K, mut accessor: F) -> Result<Option<R>, StorageError>
    where
        F: FnMut(&mut V) -> R,
    {
        Ok(self
            .map
            .get_mut(key)
            .map(|mut value_ref| accessor(&mut value_ref)))
    }

    fn remove(&self, key: &K) -> Option<V> {
        self.map.remove(key).map(|(_, value)| value)
    }

    fn len(&self) -> usize {
        self.map.len()
    }

    fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn clear(&self) {
        self.map.clear()
    }

    fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&K, &V),
    {
        for entry in self.map.iter() {
            f(entry.key(), entry.value());
        }
    }

    fn retain<F>(&self, mut f: F) -> usize
    where
        F: FnMut(&K, &V) -> bool,
    {
        let mut removed = 0;
        self.map.retain(|key, value| {
            let keep = f(key, value);
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }
}

// Implement Storage for Arc<ShardedStorage> to allow it to be shared directly
impl<K, V> Storage<K, V> for Arc<ShardedStorage<K, V>>
where
    K: Hash + Eq + Clone + Send + Sync + std::fmt::Debug,
    V: Clone + Send + Sync + std::fmt::Debug,
{
    fn get(&self, key: &K) -> Option<V> {
        (**self).get(key)
    }

    fn insert(&self, key: K, value: V) {
        (**self).insert(key, value)
    }

    fn with_entry_mut<F, R>(
        &self,
        key: K,
        factory: impl FnMut() -> V,
        accessor: F,
    ) -> Result<R, StorageError>
    where
        F: FnMut(&mut V, bool) -> R,
    {
        (**self).with_entry_mut(key, factory, accessor)
    }

    fn update<F, R>(&self, key: &K, accessor: F) -> Result<Option<R>, StorageError>
    where
        F: FnMut(&mut V) -> R,
    {
        (**self).update(key, accessor)
    }

    fn remove(&self, key: &K) -> Option<V> {
        (**self).remove(key)
    }

    fn len(&self) -> usize {
        (**self).len()
    }

    fn is_empty(&self) -> bool {
        (**self).is_empty()
    }

    fn clear(&self) {
        (**self).clear()
    }

    fn for_each<F>(&self, f: F)
    where
        F: FnMut(&K, &V),
    {
        (**self).for_each(f)
    }

    fn retain<F>(&self, f: F) -> usize
    where
        F: FnMut(&K, &V) -> bool,
    {
        (**self).retain(f)
    }
}

/// Process-local backend holding every store in a [`ShardedStorage`].
///
/// Clones share the same maps.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    counters: Arc<ShardedStorage<String, CounterRecord>>,
    sessions: Arc<ShardedStorage<String, SessionRecord>>,
    events: Arc<ShardedStorage<Uuid, SecurityEvent>>,
    audits: Arc<ShardedStorage<Uuid, RequestAuditEntry>>,
}

impl InMemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backend for InMemoryBackend {
    type Counters = Arc<ShardedStorage<String, CounterRecord>>;
    type Sessions = Arc<ShardedStorage<String, SessionRecord>>;
    type Events = Arc<ShardedStorage<Uuid, SecurityEvent>>;
    type Audits = Arc<ShardedStorage<Uuid, RequestAuditEntry>>;

    fn counters(&self) -> &Self::Counters {
        &self.counters
    }

    fn sessions(&self) -> &Self::Sessions {
        &self.sessions
    }

    fn events(&self) -> &Self::Events {
        &self.events
    }

    fn audits(&self) -> &Self::Audits {
        &self.audits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_operations() {
        let storage = ShardedStorage::new();

        storage.insert("key1", 100);
        storage.insert("key2", 200);

        assert_eq!(storage.get(&"key1"), Some(100));
        assert_eq!(storage.get(&"key2"), Some(200));
        assert_eq!(storage.get(&"key3"), None);

        assert_eq!(storage.len(), 2);
        assert!(!storage.is_empty());
    }

    #[test]
    fn test_with_entry_mut_reports_creation() {
        let storage = ShardedStorage::new();

        let created = storage
            .with_entry_mut("key", || 0, |value, created| {
                *value += 1;
                created
            })
            .unwrap();
        assert!(created);

        let created = storage
            .with_entry_mut("key", || 0, |value, created| {
                *value += 1;
                created
            })
            .unwrap();
        assert!(!created);
        assert_eq!(storage.get(&"key"), Some(2));
    }

    #[test]
    fn test_update_absent_key() {
        let storage: ShardedStorage<&str, i32> = ShardedStorage::new();

        assert_eq!(storage.update(&"missing", |v| *v += 1), Ok(None));
        assert!(storage.is_empty());
    }

    #[test]
    fn test_remove() {
        let storage = ShardedStorage::new();

        storage.insert("key", 100);
        assert!(storage.contains_key("key"));

        assert_eq!(storage.remove(&"key"), Some(100));
        assert!(!storage.contains_key("key"));
    }

    #[test]
    fn test_retain_counts_removed() {
        let storage = ShardedStorage::new();
        for i in 0..10 {
            storage.insert(i, i * 10);
        }

        let removed = storage.retain(|_, value| *value >= 50);

        assert_eq!(removed, 5);
        assert_eq!(storage.len(), 5);
    }

    #[test]
    fn test_concurrent_entry_updates() {
        use std::thread;

        let storage = Arc::new(ShardedStorage::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let storage_clone = Arc::clone(&storage);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    storage_clone
                        .with_entry_mut("shared", || 0u32, |v, _| *v += 1)
                        .unwrap();
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(storage.get(&"shared"), Some(1000));
    }

    #[test]
    fn test_backend_clones_share_state() {
        let backend = InMemoryBackend::new();
        let clone = backend.clone();

        backend
            .counters()
            .insert("c".to_string(), CounterRecord::new("c", 0));

        assert_eq!(clone.counters().len(), 1);
    }
}
