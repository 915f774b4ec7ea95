//! Redis-backed storage implementation.
//!
//! Provides a distributed storage backend using Redis, allowing admission
//! state, counters and the security journal to be shared across multiple
//! application instances.
//!
//! ## Architecture
//!
//! - Keys: `{key_prefix}{kind}:{record key}`, e.g. `counter-guard:session:abc`
//! - Values: records serialized with bincode
//! - Read-modify-write: optimistic compare-and-set. The value is read,
//!   modified locally, and written back by a Lua script only if the stored
//!   bytes are still the ones that were read; otherwise the cycle retries.
//!
//! ## Runtime
//!
//! The `Storage` port is synchronous. Inside a tokio runtime the adapter uses
//! `block_in_place`, which requires the multi-threaded runtime; outside any
//! runtime it spins up a temporary current-thread runtime.
//!
//! ## Error Handling
//!
//! - Read-modify-writes that are not stored return a [`StorageError`]: Redis
//!   unreachable, an encoding failure, or every compare-and-set lost
//! - Other failures are logged as warnings; a failed read behaves like a
//!   missing record and a failed plain write is skipped
//! - Undecodable values are logged and treated as missing
//!
//! ## Example
//!
//! ```rust,ignore
//! use counter_guard::{CounterGuard, RedisBackend, RedisStorageConfig};
//!
//! #[tokio::main(flavor = "multi_thread")]
//! async fn main() {
//!     let config = RedisStorageConfig {
//!         key_prefix: "my-app:".to_string(),
//!         ..RedisStorageConfig::default()
//!     };
//!     let backend = RedisBackend::connect_with_config("redis://127.0.0.1/", config)
//!         .await
//!         .expect("Failed to connect to Redis");
//!
//!     let guard = CounterGuard::builder()
//!         .with_backend(backend)
//!         .build()
//!         .expect("valid configuration");
//! }
//! ```

use crate::application::ports::{Backend, Storage};
use crate::domain::error::StorageError;
use crate::domain::events::{RequestAuditEntry, SecurityEvent};
use crate::domain::records::{CounterRecord, SessionRecord};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError, RedisResult, Script};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Write ARGV[3] only if the key still holds ARGV[2] (ARGV[1] = '1') or is
/// still absent (ARGV[1] = '0').
const COMPARE_AND_SET: &str = r"
local current = redis.call('GET', KEYS[1])
if ARGV[1] == '1' then
  if current ~= ARGV[2] then return 0 end
elseif current then
  return 0
end
redis.call('SET', KEYS[1], ARGV[3])
return 1
";

/// Delete the key only if it still holds ARGV[1].
const COMPARE_AND_DELETE: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
";

/// Configuration for Redis storage.
#[derive(Debug, Clone)]
pub struct RedisStorageConfig {
    /// Key prefix for Redis keys (default: "counter-guard:")
    pub key_prefix: String,
    /// Compare-and-set cycles attempted before giving up on a contended key
    pub max_cas_attempts: u32,
}

impl Default for RedisStorageConfig {
    fn default() -> Self {
        Self {
            key_prefix: "counter-guard:".to_string(),
            max_cas_attempts: 32,
        }
    }
}

#[derive(Debug)]
struct Scripts {
    compare_and_set: Script,
    compare_and_delete: Script,
}

/// Redis-backed storage for one kind of record.
///
/// Keys are stored in their `Display` form and parsed back with `FromStr`
/// when scanning.
pub struct RedisStorage<K, V> {
    connection: ConnectionManager,
    namespace: String,
    max_cas_attempts: u32,
    scripts: Arc<Scripts>,
    _records: PhantomData<fn() -> (K, V)>,
}

impl<K, V> fmt::Debug for RedisStorage<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStorage")
            .field("namespace", &self.namespace)
            .field("max_cas_attempts", &self.max_cas_attempts)
            .finish_non_exhaustive()
    }
}

impl<K, V> Clone for RedisStorage<K, V> {
    fn clone(&self) -> Self {
        Self {
            connection: self.connection.clone(),
            namespace: self.namespace.clone(),
            max_cas_attempts: self.max_cas_attempts,
            scripts: Arc::clone(&self.scripts),
            _records: PhantomData,
        }
    }
}

/// Run a future to completion from synchronous code.
///
/// Returns `None` only if no runtime is available and none can be created.
fn bridge<T>(fut: impl Future<Output = T>) -> Option<T> {
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        // We're in an async context - block this worker without stalling others
        Some(tokio::task::block_in_place(|| handle.block_on(fut)))
    } else {
        match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => Some(rt.block_on(fut)),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to create runtime for Redis access");
                None
            }
        }
    }
}

impl<K, V> RedisStorage<K, V>
where
    K: fmt::Display + FromStr,
    V: Serialize + DeserializeOwned,
{
    /// Create a store for one record kind over an existing connection.
    ///
    /// `kind` separates record kinds sharing a prefix, e.g. `session`.
    pub fn new(connection: ConnectionManager, config: &RedisStorageConfig, kind: &str) -> Self {
        Self {
            connection,
            namespace: format!("{}{}:", config.key_prefix, kind),
            max_cas_attempts: config.max_cas_attempts.max(1),
            scripts: Arc::new(Scripts {
                compare_and_set: Script::new(COMPARE_AND_SET),
                compare_and_delete: Script::new(COMPARE_AND_DELETE),
            }),
            _records: PhantomData,
        }
    }

    /// Get the Redis key for a record key.
    fn key(&self, key: &K) -> String {
        format!("{}{}", self.namespace, key)
    }

    fn parse_key(&self, redis_key: &str) -> Option<K> {
        redis_key
            .strip_prefix(&self.namespace)
            .and_then(|raw| raw.parse().ok())
    }

    async fn compare_and_delete(
        &self,
        conn: &mut ConnectionManager,
        redis_key: &str,
        expected: &[u8],
    ) -> RedisResult<bool> {
        let deleted: i32 = self
            .scripts
            .compare_and_delete
            .key(redis_key)
            .arg(expected.to_vec())
            .invoke_async(conn)
            .await?;
        Ok(deleted == 1)
    }

    /// Collect every key in this store's namespace.
    async fn scan_keys(&self, conn: &mut ConnectionManager) -> RedisResult<Vec<String>> {
        let pattern = format!("{}*", self.namespace);
        let mut found = Vec::new();
        let mut cursor = 0u64;
        loop {
            let (new_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(conn)
                .await?;
            found.extend(keys);
            if new_cursor == 0 {
                return Ok(found);
            }
            cursor = new_cursor;
        }
    }

    /// Read-modify-write shared by `with_entry_mut` and `update`.
    ///
    /// `seed` supplies the value for an absent key, or `None` to skip it.
    async fn modify<R>(
        &self,
        redis_key: &str,
        seed: impl FnMut() -> Option<V>,
        accessor: impl FnMut(&mut V, bool) -> R,
    ) -> Result<Option<R>, StorageError> {
        let mut cell = RedisCell {
            conn: self.connection.clone(),
            redis_key,
            script: &self.scripts.compare_and_set,
        };
        read_modify_write(&mut cell, redis_key, self.max_cas_attempts, seed, accessor).await
    }
}

fn decode<V: DeserializeOwned>(redis_key: &str, bytes: &[u8]) -> Option<V> {
    match bincode::deserialize(bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(error = %e, key = %redis_key, "Undecodable record in Redis");
            None
        }
    }
}

fn encode<V: Serialize>(redis_key: &str, value: &V) -> Result<Vec<u8>, StorageError> {
    bincode::serialize(value).map_err(|e| {
        tracing::warn!(error = %e, key = %redis_key, "Failed to encode record for Redis");
        StorageError::Encoding(e.to_string())
    })
}

fn unavailable(redis_key: &str, error: &RedisError, message: &'static str) -> StorageError {
    tracing::warn!(error = %error, key = %redis_key, "{}", message);
    StorageError::Unavailable(error.to_string())
}

fn no_runtime() -> StorageError {
    StorageError::Unavailable("no async runtime available".to_string())
}

/// Compare-and-set access to a single key.
trait CasCell {
    /// Current raw value, `None` if absent.
    async fn load(&mut self) -> RedisResult<Option<Vec<u8>>>;

    /// Write `bytes` if the key still holds `expected` (`None` = absent).
    async fn swap(&mut self, expected: Option<&[u8]>, bytes: &[u8]) -> RedisResult<bool>;
}

struct RedisCell<'a> {
    conn: ConnectionManager,
    redis_key: &'a str,
    script: &'a Script,
}

impl CasCell for RedisCell<'_> {
    async fn load(&mut self) -> RedisResult<Option<Vec<u8>>> {
        self.conn.get(self.redis_key).await
    }

    async fn swap(&mut self, expected: Option<&[u8]>, bytes: &[u8]) -> RedisResult<bool> {
        let swapped: i32 = self
            .script
            .key(self.redis_key)
            .arg(if expected.is_some() { "1" } else { "0" })
            .arg(expected.map(<[u8]>::to_vec).unwrap_or_default())
            .arg(bytes.to_vec())
            .invoke_async(&mut self.conn)
            .await?;
        Ok(swapped == 1)
    }
}

/// Optimistic read-modify-write against `cell`.
///
/// Returns `Ok(None)` when the key is absent and `seed` declines to create
/// it. The accessor's result is only returned once its value is stored.
async fn read_modify_write<C, V, R>(
    cell: &mut C,
    redis_key: &str,
    max_attempts: u32,
    mut seed: impl FnMut() -> Option<V>,
    mut accessor: impl FnMut(&mut V, bool) -> R,
) -> Result<Option<R>, StorageError>
where
    C: CasCell,
    V: Serialize + DeserializeOwned,
{
    for attempt in 1..=max_attempts {
        let raw = cell
            .load()
            .await
            .map_err(|e| unavailable(redis_key, &e, "Failed to read record from Redis"))?;

        let (mut value, created) = match raw.as_deref().and_then(|b| decode::<V>(redis_key, b)) {
            Some(value) => (value, false),
            None => match seed() {
                Some(value) => (value, true),
                None => return Ok(None),
            },
        };
        let result = accessor(&mut value, created);
        let bytes = encode(redis_key, &value)?;

        let swapped = cell
            .swap(raw.as_deref(), &bytes)
            .await
            .map_err(|e| unavailable(redis_key, &e, "Failed to persist record to Redis"))?;
        if swapped {
            return Ok(Some(result));
        }
        tracing::trace!(key = %redis_key, attempt, "Concurrent write, retrying");
    }

    tracing::warn!(
        key = %redis_key,
        attempts = max_attempts,
        "Gave up persisting contended record to Redis"
    );
    Err(StorageError::Contended {
        attempts: max_attempts,
    })
}

impl<K, V> Storage<K, V> for RedisStorage<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + fmt::Display + FromStr,
    V: Clone + Send + Sync + Serialize + DeserializeOwned,
{
    fn get(&self, key: &K) -> Option<V> {
        let redis_key = self.key(key);
        bridge(async {
            let mut conn = self.connection.clone();
            match conn.get::<_, Option<Vec<u8>>>(redis_key.as_str()).await {
                Ok(raw) => raw.and_then(|bytes| decode::<V>(&redis_key, &bytes)),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        key = %redis_key,
                        "Failed to read record from Redis"
                    );
                    None
                }
            }
        })
        .flatten()
    }

    fn insert(&self, key: K, value: V) {
        let redis_key = self.key(&key);
        let Ok(bytes) = encode(&redis_key, &value) else {
            return;
        };
        bridge(async {
            let mut conn = self.connection.clone();
            if let Err(e) = conn.set::<_, _, ()>(redis_key.as_str(), bytes).await {
                tracing::warn!(error = %e, key = %redis_key, "Failed to write record to Redis");
            }
        });
    }

    fn with_entry_mut<F, R>(
        &self,
        key: K,
        mut factory: impl FnMut() -> V,
        accessor: F,
    ) -> Result<R, StorageError>
    where
        F: FnMut(&mut V, bool) -> R,
    {
        let redis_key = self.key(&key);
        bridge(self.modify(&redis_key, || Some(factory()), accessor))
            .ok_or_else(no_runtime)??
            // The seed always yields a value
            .ok_or_else(|| StorageError::Unavailable("record was not created".to_string()))
    }

    fn update<F, R>(&self, key: &K, mut accessor: F) -> Result<Option<R>, StorageError>
    where
        F: FnMut(&mut V) -> R,
    {
        let redis_key = self.key(key);
        bridge(self.modify(&redis_key, || None, |value, _| accessor(value)))
            .ok_or_else(no_runtime)?
    }

    fn remove(&self, key: &K) -> Option<V> {
        let redis_key = self.key(key);
        bridge(async {
            let mut conn = self.connection.clone();
            let raw: Option<Vec<u8>> = match conn.get(redis_key.as_str()).await {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        key = %redis_key,
                        "Failed to read record from Redis"
                    );
                    return None;
                }
            };
            let bytes = raw?;
            match self.compare_and_delete(&mut conn, &redis_key, &bytes).await {
                Ok(true) => decode::<V>(&redis_key, &bytes),
                Ok(false) => None,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        key = %redis_key,
                        "Failed to delete record from Redis"
                    );
                    None
                }
            }
        })
        .flatten()
    }

    /// Returns the number of stored records.
    ///
    /// Requires a full SCAN of the namespace; avoid on hot paths.
    fn len(&self) -> usize {
        bridge(async {
            let mut conn = self.connection.clone();
            match self.scan_keys(&mut conn).await {
                Ok(keys) => keys.len(),
                Err(e) => {
                    tracing::warn!(error = %e, namespace = %self.namespace, "Failed to scan Redis");
                    0
                }
            }
        })
        .unwrap_or(0)
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clear(&self) {
        bridge(async {
            let mut conn = self.connection.clone();
            let keys = match self.scan_keys(&mut conn).await {
                Ok(keys) => keys,
                Err(e) => {
                    tracing::warn!(error = %e, namespace = %self.namespace, "Failed to scan Redis");
                    return;
                }
            };
            for chunk in keys.chunks(100) {
                if let Err(e) = conn.del::<_, ()>(chunk.to_vec()).await {
                    tracing::warn!(
                        error = %e,
                        namespace = %self.namespace,
                        "Failed to clear Redis keys"
                    );
                }
            }
        });
    }

    fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&K, &V),
    {
        bridge(async {
            let mut conn = self.connection.clone();
            let keys = match self.scan_keys(&mut conn).await {
                Ok(keys) => keys,
                Err(e) => {
                    tracing::warn!(error = %e, namespace = %self.namespace, "Failed to scan Redis");
                    return;
                }
            };
            for redis_key in keys {
                let Some(key) = self.parse_key(&redis_key) else {
                    continue;
                };
                // Keys deleted since the scan read as None and are skipped
                if let Ok(Some(bytes)) = conn.get::<_, Option<Vec<u8>>>(redis_key.as_str()).await {
                    if let Some(value) = decode::<V>(&redis_key, &bytes) {
                        f(&key, &value);
                    }
                }
            }
        });
    }

    fn retain<F>(&self, mut f: F) -> usize
    where
        F: FnMut(&K, &V) -> bool,
    {
        bridge(async {
            let mut conn = self.connection.clone();
            let keys = match self.scan_keys(&mut conn).await {
                Ok(keys) => keys,
                Err(e) => {
                    tracing::warn!(error = %e, namespace = %self.namespace, "Failed to scan Redis");
                    return 0;
                }
            };
            let mut removed = 0;
            for redis_key in keys {
                let Some(key) = self.parse_key(&redis_key) else {
                    continue;
                };
                let fetched = conn.get::<_, Option<Vec<u8>>>(redis_key.as_str()).await;
                let Ok(Some(bytes)) = fetched else {
                    continue;
                };
                let Some(value) = decode::<V>(&redis_key, &bytes) else {
                    continue;
                };
                if f(&key, &value) {
                    continue;
                }
                match self.compare_and_delete(&mut conn, &redis_key, &bytes).await {
                    Ok(true) => removed += 1,
                    // Rewritten since it was read; it gets judged on the next pass
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            key = %redis_key,
                            "Failed to delete key from Redis during retain"
                        );
                    }
                }
            }
            removed
        })
        .unwrap_or(0)
    }
}

/// Backend keeping every store in Redis.
#[derive(Debug, Clone)]
pub struct RedisBackend {
    counters: RedisStorage<String, CounterRecord>,
    sessions: RedisStorage<String, SessionRecord>,
    events: RedisStorage<Uuid, SecurityEvent>,
    audits: RedisStorage<Uuid, RequestAuditEntry>,
}

impl RedisBackend {
    /// Connect to Redis with default configuration.
    ///
    /// # Arguments
    /// * `url` - Redis connection URL (e.g., "redis://127.0.0.1/")
    ///
    /// # Errors
    /// Returns error if connection fails.
    pub async fn connect(url: &str) -> Result<Self, RedisError> {
        Self::connect_with_config(url, RedisStorageConfig::default()).await
    }

    /// Connect to Redis with custom configuration.
    ///
    /// # Errors
    /// Returns error if connection fails.
    pub async fn connect_with_config(
        url: &str,
        config: RedisStorageConfig,
    ) -> Result<Self, RedisError> {
        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self::from_connection(connection, &config))
    }

    /// Build a backend over an existing connection.
    pub fn from_connection(connection: ConnectionManager, config: &RedisStorageConfig) -> Self {
        Self {
            counters: RedisStorage::new(connection.clone(), config, "counter"),
            sessions: RedisStorage::new(connection.clone(), config, "session"),
            events: RedisStorage::new(connection.clone(), config, "event"),
            audits: RedisStorage::new(connection, config, "audit"),
        }
    }
}

impl Backend for RedisBackend {
    type Counters = RedisStorage<String, CounterRecord>;
    type Sessions = RedisStorage<String, SessionRecord>;
    type Events = RedisStorage<Uuid, SecurityEvent>;
    type Audits = RedisStorage<Uuid, RequestAuditEntry>;

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
    use redis::ErrorKind;

    /// In-process cell; `contended` makes every swap lose to another writer.
    #[derive(Default)]
    struct StubCell {
        stored: Option<Vec<u8>>,
        contended: bool,
        unreachable: bool,
        swaps: u32,
    }

    impl CasCell for StubCell {
        async fn load(&mut self) -> RedisResult<Option<Vec<u8>>> {
            if self.unreachable {
                return Err(RedisError::from((ErrorKind::IoError, "connection refused")));
            }
            Ok(self.stored.clone())
        }

        async fn swap(&mut self, expected: Option<&[u8]>, bytes: &[u8]) -> RedisResult<bool> {
            self.swaps += 1;
            if self.contended || self.stored.as_deref() != expected {
                return Ok(false);
            }
            self.stored = Some(bytes.to_vec());
            Ok(true)
        }
    }

    fn stored_value(cell: &StubCell) -> Option<u64> {
        cell.stored
            .as_deref()
            .and_then(|bytes| bincode::deserialize(bytes).ok())
    }

    #[tokio::test]
    async fn test_stored_write_returns_result() {
        let mut cell = StubCell {
            stored: Some(bincode::serialize(&4u64).unwrap()),
            ..StubCell::default()
        };

        let result = read_modify_write(&mut cell, "k", 3, || None, |value: &mut u64, _| {
            *value += 1;
            *value
        })
        .await;

        assert_eq!(result, Ok(Some(5)));
        assert_eq!(stored_value(&cell), Some(5));
    }

    #[tokio::test]
    async fn test_absent_key_is_seeded_or_skipped() {
        let mut cell = StubCell::default();

        let skipped = read_modify_write(&mut cell, "k", 3, || None, |_: &mut u64, created| created)
            .await;
        assert_eq!(skipped, Ok(None));
        assert_eq!(cell.swaps, 0);

        let created =
            read_modify_write(&mut cell, "k", 3, || Some(7u64), |_, created| created).await;
        assert_eq!(created, Ok(Some(true)));
        assert_eq!(stored_value(&cell), Some(7));
    }

    #[tokio::test]
    async fn test_contended_write_gives_up_with_error() {
        let mut cell = StubCell {
            stored: Some(bincode::serialize(&0u64).unwrap()),
            contended: true,
            ..StubCell::default()
        };
        let mut runs = 0;

        let result = read_modify_write(&mut cell, "k", 4, || None, |value: &mut u64, _| {
            runs += 1;
            *value += 1;
            *value
        })
        .await;

        assert_eq!(result, Err(StorageError::Contended { attempts: 4 }));
        assert_eq!((runs, cell.swaps), (4, 4));
        assert_eq!(stored_value(&cell), Some(0));
    }

    #[tokio::test]
    async fn test_unreachable_store_never_runs_accessor() {
        let mut cell = StubCell {
            unreachable: true,
            ..StubCell::default()
        };
        let mut runs = 0;

        let result = read_modify_write(&mut cell, "k", 4, || Some(0u64), |_, _| runs += 1).await;

        assert!(matches!(result, Err(StorageError::Unavailable(_))));
        assert_eq!(runs, 0);
        assert_eq!(cell.swaps, 0);
    }
}
