//! Ports (interfaces) for the application layer.
//!
//! In hexagonal architecture, ports define the interfaces that the application
//! layer needs. Infrastructure adapters implement these ports.

use crate::domain::error::StorageError;
use crate::domain::events::{RequestAuditEntry, SecurityEvent};
use crate::domain::records::{CounterRecord, SessionRecord, Timestamp};
use std::fmt::Debug;
use std::hash::Hash;
use uuid::Uuid;

/// Port for obtaining current time.
///
/// This abstraction allows the application layer to work with time
/// without depending on system clock implementation details.
/// Infrastructure provides concrete implementations (SystemClock, MockClock).
pub trait Clock: Send + Sync + Debug {
    /// Current time in milliseconds since the Unix epoch.
    fn now(&self) -> Timestamp;
}

/// Port for concurrent key-value storage.
///
/// Every method is atomic per key. Accessors passed to [`Storage::with_entry_mut`]
/// and [`Storage::update`] may run more than once when an adapter retries after
/// a concurrent write, so they must only touch the value they are given.
///
/// Those two methods return `Err` when the modified value was not stored.
/// The accessor's result is then discarded and the stored value is unchanged.
pub trait Storage<K, V>: Send + Sync + Debug
where
    K: Hash + Eq + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    /// Get a copy of the value stored under `key`.
    fn get(&self, key: &K) -> Option<V>;

    /// Insert a value, replacing any previous one.
    fn insert(&self, key: K, value: V);

    /// Access an entry with mutable access, creating it if necessary.
    ///
    /// # Arguments
    /// * `key` - The key to look up
    /// * `factory` - Function to create a new value if the key doesn't exist
    /// * `accessor` - Receives the value and whether it was just created
    ///
    /// # Returns
    /// The result from the accessor function, once the value is stored
    ///
    /// # Errors
    /// [`StorageError`] if the value could not be stored.
    fn with_entry_mut<F, R>(
        &self,
        key: K,
        factory: impl FnMut() -> V,
        accessor: F,
    ) -> Result<R, StorageError>
    where
        F: FnMut(&mut V, bool) -> R;

    /// Mutate an existing entry.
    ///
    /// Returns `Ok(None)` without calling the accessor if the key is absent.
    ///
    /// # Errors
    /// [`StorageError`] if the value could not be stored.
    fn update<F, R>(&self, key: &K, accessor: F) -> Result<Option<R>, StorageError>
    where
        F: FnMut(&mut V) -> R;

    /// Remove a key and return its value.
    fn remove(&self, key: &K) -> Option<V>;

    /// Get the number of entries in the storage.
    fn len(&self) -> usize;

    /// Check if the storage is empty.
    fn is_empty(&self) -> bool;

    /// Clear all entries from the storage.
    fn clear(&self);

    /// Iterate over all entries, providing access to both key and value.
    fn for_each<F>(&self, f: F)
    where
        F: FnMut(&K, &V);

    /// Remove entries for which the predicate returns false.
    ///
    /// Returns the number of entries removed.
    fn retain<F>(&self, f: F) -> usize
    where
        F: FnMut(&K, &V) -> bool;
}

/// Port bundling the four record stores the service persists.
///
/// Adapters hand out cheap shared handles, so components clone the backend
/// freely.
pub trait Backend: Clone + Send + Sync + Debug + 'static {
    /// Counters keyed by name
    type Counters: Storage<String, CounterRecord> + Clone + 'static;
    /// Sessions keyed by session identifier
    type Sessions: Storage<String, SessionRecord> + Clone + 'static;
    /// Security events keyed by id
    type Events: Storage<Uuid, SecurityEvent> + Clone + 'static;
    /// Audit entries keyed by id
    type Audits: Storage<Uuid, RequestAuditEntry> + Clone + 'static;

    /// Counter store.
    fn counters(&self) -> &Self::Counters;

    /// Session store.
    fn sessions(&self) -> &Self::Sessions;

    /// Security event store.
    fn events(&self) -> &Self::Events;

    /// Audit entry store.
    fn audits(&self) -> &Self::Audits;
}
