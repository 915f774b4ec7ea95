//! Storage double whose writes can be made to fail.

use crate::application::ports::{Backend, Storage};
use crate::domain::error::StorageError;
use crate::domain::events::{RequestAuditEntry, SecurityEvent};
use crate::domain::records::{CounterRecord, SessionRecord};
use crate::infrastructure::storage::ShardedStorage;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// In-memory storage that can be switched into failing every
/// read-modify-write, as a remote store does when it is unreachable or
/// keeps losing compare-and-set races.
///
/// Plain reads, inserts and scans keep working. Clones share both the data
/// and the switch.
///
/// # Examples
///
/// ```
/// use counter_guard::application::ports::Storage;
/// use counter_guard::infrastructure::mocks::FlakyStorage;
///
/// let storage: FlakyStorage<&str, u32> = FlakyStorage::new();
/// storage.insert("hits", 1);
///
/// storage.fail_writes(true);
/// assert!(storage.update(&"hits", |v| *v += 1).is_err());
/// assert_eq!(storage.get(&"hits"), Some(1));
/// ```
#[derive(Debug)]
pub struct FlakyStorage<K, V>
where
    K: Eq + Hash + Clone,
{
    inner: Arc<ShardedStorage<K, V>>,
    failing: Arc<AtomicBool>,
}

impl<K, V> Clone for FlakyStorage<K, V>
where
    K: Eq + Hash + Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            failing: Arc::clone(&self.failing),
        }
    }
}

impl<K, V> FlakyStorage<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create an empty store with writes succeeding.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ShardedStorage::new()),
            failing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make read-modify-writes fail (`true`) or succeed again (`false`).
    pub fn fail_writes(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StorageError::Unavailable("writes disabled".to_string()))
        } else {
            Ok(())
        }
    }
}

impl<K, V> Default for FlakyStorage<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Storage<K, V> for FlakyStorage<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + Debug,
    V: Clone + Send + Sync + Debug,
{
    fn get(&self, key: &K) -> Option<V> {
        self.inner.get(key)
    }

    fn insert(&self, key: K, value: V) {
        self.inner.insert(key, value)
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
        self.check()?;
        self.inner.with_entry_mut(key, factory, accessor)
    }

    fn update<F, R>(&self, key: &K, accessor: F) -> Result<Option<R>, StorageError>
    where
        F: FnMut(&mut V) -> R,
    {
        self.check()?;
        self.inner.update(key, accessor)
    }

    fn remove(&self, key: &K) -> Option<V> {
        self.inner.remove(key)
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn clear(&self) {
        self.inner.clear()
    }

    fn for_each<F>(&self, f: F)
    where
        F: FnMut(&K, &V),
    {
        self.inner.for_each(f)
    }

    fn retain<F>(&self, f: F) -> usize
    where
        F: FnMut(&K, &V) -> bool,
    {
        self.inner.retain(f)
    }
}

/// Backend built from [`FlakyStorage`] stores, each with its own switch.
#[derive(Debug, Clone, Default)]
pub struct FlakyBackend {
    counters: FlakyStorage<String, CounterRecord>,
    sessions: FlakyStorage<String, SessionRecord>,
    events: FlakyStorage<Uuid, SecurityEvent>,
    audits: FlakyStorage<Uuid, RequestAuditEntry>,
}

impl FlakyBackend {
    /// Create an empty backend with every store writable.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backend for FlakyBackend {
    type Counters = FlakyStorage<String, CounterRecord>;
    type Sessions = FlakyStorage<String, SessionRecord>;
    type Events = FlakyStorage<Uuid, SecurityEvent>;
    type Audits = FlakyStorage<Uuid, RequestAuditEntry>;

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
    fn test_failing_writes_leave_value_untouched() {
        let storage: FlakyStorage<&str, u32> = FlakyStorage::new();
        storage.insert("k", 1);
        let clone = storage.clone();

        clone.fail_writes(true);
        let mut calls = 0;
        let result = storage.with_entry_mut("k", || 0, |v, _| {
            calls += 1;
            *v += 1;
        });

        assert!(matches!(result, Err(StorageError::Unavailable(_))));
        assert_eq!(calls, 0);
        assert_eq!(storage.get(&"k"), Some(1));

        clone.fail_writes(false);
        assert_eq!(storage.update(&"k", |v| *v + 1), Ok(Some(2)));
    }
}
