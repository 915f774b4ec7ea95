//! Session store.
//!
//! Keeps one [`SessionRecord`] per session identifier. Records are created
//! lazily on the first request and only ever removed by retention cleanup.

use crate::application::ports::Storage;
use crate::domain::error::StorageError;
use crate::domain::records::{ClientMeta, SessionRecord, Timestamp, Violations};

/// Partial update applied atomically to a session.
///
/// Only the fields that are `Some` are written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionPatch {
    /// New block flag
    pub is_blocked: Option<bool>,
    /// New block end; `Some(None)` clears it
    pub block_until: Option<Option<Timestamp>>,
    /// New violation count
    pub violation_count: Option<Violations>,
    /// New last-activity time
    pub last_activity: Option<Timestamp>,
}

impl SessionPatch {
    /// Patch that lifts any block and zeroes the violation count.
    pub fn unblock() -> Self {
        Self {
            is_blocked: Some(false),
            block_until: Some(None),
            violation_count: Some(Violations::ZERO),
            last_activity: None,
        }
    }

    /// Patch that blocks the session until `until`.
    pub fn block_until(until: Timestamp) -> Self {
        Self {
            is_blocked: Some(true),
            block_until: Some(Some(until)),
            ..Self::default()
        }
    }

    fn apply(&self, record: &mut SessionRecord) {
        if let Some(is_blocked) = self.is_blocked {
            record.is_blocked = is_blocked;
        }
        if let Some(block_until) = self.block_until {
            record.block_until = block_until;
        }
        if let Some(violations) = self.violation_count {
            record.violation_count = violations;
        }
        if let Some(last_activity) = self.last_activity {
            record.last_activity = last_activity;
        }
    }
}

/// Store of per-session admission state.
///
/// Generic over the storage adapter; in production use the sessions store
/// of a [`Backend`](crate::application::ports::Backend).
#[derive(Debug, Clone)]
pub struct SessionStore<S>
where
    S: Storage<String, SessionRecord> + Clone,
{
    storage: S,
}

impl<S> SessionStore<S>
where
    S: Storage<String, SessionRecord> + Clone,
{
    /// Create a session store over a storage adapter.
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Fetch a session, creating it if this is the first time it is seen.
    ///
    /// Returns the record and whether it was created by this call.
    pub fn get_or_create(
        &self,
        session_id: &str,
        meta: &ClientMeta,
        now: Timestamp,
    ) -> Result<(SessionRecord, bool), StorageError> {
        self.admit_with(session_id, meta, now, |record, created| {
            (record.clone(), created)
        })
    }

    /// Run a read-check-write against a session under its per-key lock.
    ///
    /// The record is created first if absent. Client details from `meta` are
    /// refreshed on existing records before `f` runs.
    ///
    /// # Errors
    /// [`StorageError`] if the updated record was not stored; `f`'s result
    /// must then be discarded.
    pub fn admit_with<F, R>(
        &self,
        session_id: &str,
        meta: &ClientMeta,
        now: Timestamp,
        mut f: F,
    ) -> Result<R, StorageError>
    where
        F: FnMut(&mut SessionRecord, bool) -> R,
    {
        self.storage.with_entry_mut(
            session_id.to_string(),
            || SessionRecord::new(session_id, meta, now),
            |record, created| {
                if !created {
                    record.touch_meta(meta);
                }
                f(record, created)
            },
        )
    }

    /// Apply a partial update to an existing session.
    ///
    /// Returns the updated record, or `None` if the session does not exist.
    pub fn patch(
        &self,
        session_id: &str,
        patch: &SessionPatch,
    ) -> Result<Option<SessionRecord>, StorageError> {
        self.storage.update(&session_id.to_string(), |record| {
            patch.apply(record);
            record.clone()
        })
    }

    /// Get a copy of a session.
    pub fn get(&self, session_id: &str) -> Option<SessionRecord> {
        self.storage.get(&session_id.to_string())
    }

    /// Number of stored sessions.
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// Check if no sessions are stored.
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Iterate over all sessions.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&SessionRecord),
    {
        self.storage.for_each(|_, record| f(record));
    }

    /// Delete sessions whose last activity is older than `cutoff`.
    ///
    /// Returns the number of sessions removed.
    pub fn remove_inactive(&self, cutoff: Timestamp) -> usize {
        self.storage
            .retain(|_, record| record.last_activity >= cutoff)
    }
}
