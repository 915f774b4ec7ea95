//! Counter mutation engine.
//!
//! Applies increment, decrement and reset under optimistic concurrency: a
//! supplied expected version must equal the stored one, and every successful
//! mutation bumps the version by exactly one. The check and the write happen
//! under the counter's per-key lock.

use crate::application::ports::Storage;
use crate::domain::error::GuardError;
use crate::domain::records::{Action, CounterRecord, MutationRequest, Timestamp};
use crate::domain::validation::validate_value;

/// Engine owning counter value and version writes.
#[derive(Debug, Clone)]
pub struct CounterEngine<C>
where
    C: Storage<String, CounterRecord> + Clone,
{
    storage: C,
}

impl<C> CounterEngine<C>
where
    C: Storage<String, CounterRecord> + Clone,
{
    /// Create an engine over counter storage.
    pub fn new(storage: C) -> Self {
        Self { storage }
    }

    /// Read a counter.
    pub fn get(&self, name: &str) -> Option<CounterRecord> {
        self.storage.get(&name.to_string())
    }

    /// Create a counter at value 0, version 0, unless it already exists.
    ///
    /// Returns the stored record either way.
    ///
    /// # Errors
    /// `Storage` if a new counter could not be stored.
    pub fn initialize(&self, name: &str, now: Timestamp) -> Result<CounterRecord, GuardError> {
        Ok(self.storage.with_entry_mut(
            name.to_string(),
            || CounterRecord::new(name, now),
            |record, _| record.clone(),
        )?)
    }

    /// Apply a mutation on behalf of `session_id`.
    ///
    /// Increment and decrement create an absent counter, ignoring any
    /// expected version; reset requires the counter to exist.
    ///
    /// # Errors
    /// - `VersionMismatch` if the expected version is stale
    /// - `ValueOutOfRange` if the result would leave the allowed range
    /// - `NotFound` when resetting an absent counter
    /// - `Storage` if the store did not persist the mutation
    pub fn apply(
        &self,
        request: &MutationRequest,
        session_id: &str,
        now: Timestamp,
    ) -> Result<CounterRecord, GuardError> {
        match request.action {
            Action::Reset => self
                .storage
                .update(&request.name, |record| {
                    mutate(record, request, true, session_id, now)
                })?
                .unwrap_or_else(|| {
                    Err(GuardError::NotFound {
                        name: request.name.clone(),
                    })
                }),
            Action::Increment | Action::Decrement => self.storage.with_entry_mut(
                request.name.clone(),
                || CounterRecord::new(request.name.as_str(), now),
                |record, created| mutate(record, request, !created, session_id, now),
            )?,
        }
    }
}

fn mutate(
    record: &mut CounterRecord,
    request: &MutationRequest,
    check_version: bool,
    session_id: &str,
    now: Timestamp,
) -> Result<CounterRecord, GuardError> {
    if check_version {
        if let Some(expected) = request.expected_version {
            if expected != record.version {
                return Err(GuardError::VersionMismatch {
                    expected,
                    actual: record.version,
                });
            }
        }
    }

    let attempted = match request.action {
        Action::Increment => record.value.saturating_add(1),
        Action::Decrement => record.value.saturating_sub(1),
        Action::Reset => 0,
    };
    // Counter values are integers far inside f64's exact range.
    if validate_value(attempted as f64).is_err() {
        return Err(GuardError::ValueOutOfRange { attempted });
    }

    record.value = attempted;
    record.version += 1;
    record.last_updated = now;
    record.last_modified_by = Some(session_id.to_string());
    Ok(record.clone())
}
