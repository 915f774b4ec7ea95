//! Security journal: append-only security events and request audit entries.
//!
//! Every recorded security event is also emitted as a `tracing` event under
//! the `counter_guard::security` target. The journal is never read on the
//! admission path.

use crate::application::ports::Storage;
use crate::domain::error::StorageError;
use crate::domain::events::{
    AuditResult, EventType, RequestAuditEntry, SecurityEvent, Severity, Signal,
};
use crate::domain::records::Timestamp;
use uuid::Uuid;

/// Filter for listing security events. Unset fields match everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventFilter {
    /// Only events of this type
    pub event_type: Option<EventType>,
    /// Only events of this severity
    pub severity: Option<Severity>,
    /// Only resolved (`true`) or unresolved (`false`) events
    pub resolved: Option<bool>,
}

impl EventFilter {
    /// Match every event.
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to one event type.
    pub fn with_event_type(mut self, event_type: EventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    /// Restrict to one severity.
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    /// Restrict by resolution state.
    pub fn with_resolved(mut self, resolved: bool) -> Self {
        self.resolved = Some(resolved);
        self
    }

    /// Check if an event passes the filter.
    pub fn matches(&self, event: &SecurityEvent) -> bool {
        self.event_type.map_or(true, |t| t == event.event_type)
            && self.severity.map_or(true, |s| s == event.severity)
            && self.resolved.map_or(true, |r| r == event.resolved)
    }
}

/// Filter for listing audit entries. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditFilter {
    /// Only entries from this session
    pub session_id: Option<String>,
    /// Only entries with this result
    pub result: Option<AuditResult>,
}

impl AuditFilter {
    /// Match every entry.
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to one session.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Restrict to one result.
    pub fn with_result(mut self, result: AuditResult) -> Self {
        self.result = Some(result);
        self
    }

    /// Check if an entry passes the filter.
    pub fn matches(&self, entry: &RequestAuditEntry) -> bool {
        self.session_id
            .as_deref()
            .map_or(true, |id| id == entry.session_id)
            && self.result.map_or(true, |r| r == entry.result)
    }
}

/// Append-only store of security events and audit entries.
#[derive(Debug, Clone)]
pub struct SecurityJournal<E, A>
where
    E: Storage<Uuid, SecurityEvent> + Clone,
    A: Storage<Uuid, RequestAuditEntry> + Clone,
{
    events: E,
    audits: A,
}

impl<E, A> SecurityJournal<E, A>
where
    E: Storage<Uuid, SecurityEvent> + Clone,
    A: Storage<Uuid, RequestAuditEntry> + Clone,
{
    /// Create a journal over event and audit storage.
    pub fn new(events: E, audits: A) -> Self {
        Self { events, audits }
    }

    /// Stamp, store and log a security event.
    pub fn record_event(
        &self,
        signal: Signal,
        session_id: &str,
        client_address: Option<&str>,
        now: Timestamp,
    ) -> SecurityEvent {
        let event = signal.into_event(session_id, client_address, now);
        log_event(&event);
        self.events.insert(event.id, event.clone());
        event
    }

    /// Store an audit entry.
    pub fn record_audit(&self, entry: RequestAuditEntry) -> Uuid {
        let id = entry.id;
        self.audits.insert(id, entry);
        id
    }

    /// Amend an admission entry with the outcome of the mutation it admitted.
    ///
    /// Returns `Ok(false)` if the entry no longer exists.
    ///
    /// # Errors
    /// [`StorageError`] if the amended entry was not stored.
    pub fn settle_audit(
        &self,
        id: Uuid,
        result: AuditResult,
        processing_ms: u64,
    ) -> Result<bool, StorageError> {
        Ok(self
            .audits
            .update(&id, |entry| {
                entry.result = result;
                entry.processing_ms = processing_ms;
            })?
            .is_some())
    }

    /// Mark a security event as resolved.
    ///
    /// Returns the updated event, or `None` if it does not exist.
    ///
    /// # Errors
    /// [`StorageError`] if the resolved event was not stored.
    pub fn resolve_event(&self, id: Uuid) -> Result<Option<SecurityEvent>, StorageError> {
        self.events.update(&id, |event| {
            event.resolved = true;
            event.clone()
        })
    }

    /// Get a single event.
    pub fn event(&self, id: Uuid) -> Option<SecurityEvent> {
        self.events.get(&id)
    }

    /// Get a single audit entry.
    pub fn audit(&self, id: Uuid) -> Option<RequestAuditEntry> {
        self.audits.get(&id)
    }

    /// List matching events, newest first, at most `limit`.
    pub fn events(&self, filter: &EventFilter, limit: usize) -> Vec<SecurityEvent> {
        let mut found = Vec::new();
        self.events.for_each(|_, event| {
            if filter.matches(event) {
                found.push(event.clone());
            }
        });
        found.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        found.truncate(limit);
        found
    }

    /// List matching audit entries, newest first, at most `limit`.
    pub fn audits(&self, filter: &AuditFilter, limit: usize) -> Vec<RequestAuditEntry> {
        let mut found = Vec::new();
        self.audits.for_each(|_, entry| {
            if filter.matches(entry) {
                found.push(entry.clone());
            }
        });
        found.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        found.truncate(limit);
        found
    }

    /// Iterate over all events.
    pub fn for_each_event<F>(&self, mut f: F)
    where
        F: FnMut(&SecurityEvent),
    {
        self.events.for_each(|_, event| f(event));
    }

    /// Delete events older than `cutoff`. Returns the number removed.
    pub fn purge_events_before(&self, cutoff: Timestamp) -> usize {
        self.events.retain(|_, event| event.timestamp >= cutoff)
    }

    /// Delete audit entries older than `cutoff`. Returns the number removed.
    pub fn purge_audits_before(&self, cutoff: Timestamp) -> usize {
        self.audits.retain(|_, entry| entry.timestamp >= cutoff)
    }
}

fn log_event(event: &SecurityEvent) {
    let details = format!("{:?}", event.details);
    match event.severity {
        Severity::High | Severity::Critical => tracing::warn!(
            target: "counter_guard::security",
            event_id = %event.id,
            session_id = %event.session_id,
            event_type = %event.event_type,
            severity = %event.severity,
            details = %details,
            "security event"
        ),
        Severity::Low | Severity::Medium => tracing::info!(
            target: "counter_guard::security",
            event_id = %event.id,
            session_id = %event.session_id,
            event_type = %event.event_type,
            severity = %event.severity,
            details = %details,
            "security event"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::InputSnapshot;
    use crate::infrastructure::storage::ShardedStorage;
    use std::sync::Arc;

    type TestJournal = SecurityJournal<
        Arc<ShardedStorage<Uuid, SecurityEvent>>,
        Arc<ShardedStorage<Uuid, RequestAuditEntry>>,
    >;

    fn journal() -> TestJournal {
        SecurityJournal::new(Arc::new(ShardedStorage::new()), Arc::new(ShardedStorage::new()))
    }

    fn audit_entry(session_id: &str, result: AuditResult, at: Timestamp) -> RequestAuditEntry {
        RequestAuditEntry {
            id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            action: "increment".to_string(),
            input: InputSnapshot::new(),
            result,
            timestamp: at,
            processing_ms: 0,
            client_address: None,
        }
    }

    #[test]
    fn test_events_newest_first_with_limit() {
        let journal = journal();
        for at in [10, 30, 20] {
            journal.record_event(
                Signal::new(EventType::RateLimit, Severity::Medium),
                "s",
                None,
                at,
            );
        }

        let events = journal.events(&EventFilter::all(), 2);
        let times: Vec<_> = events.iter().map(|e| e.timestamp).collect();
        assert_eq!(times, vec![30, 20]);
    }

    #[test]
    fn test_event_filter() {
        let journal = journal();
        journal.record_event(Signal::new(EventType::RateLimit, Severity::Medium), "s", None, 1);
        let blocked =
            journal.record_event(Signal::new(EventType::Blocked, Severity::Critical), "s", None, 2);
        journal.resolve_event(blocked.id).unwrap();

        let filter = EventFilter::all().with_event_type(EventType::Blocked);
        assert_eq!(journal.events(&filter, 10).len(), 1);

        let filter = EventFilter::all().with_resolved(false);
        let unresolved = journal.events(&filter, 10);
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].event_type, EventType::RateLimit);

        let filter = EventFilter::all().with_severity(Severity::Low);
        assert!(journal.events(&filter, 10).is_empty());
    }

    #[test]
    fn test_resolve_missing_event() {
        assert_eq!(journal().resolve_event(Uuid::new_v4()), Ok(None));
    }

    #[test]
    fn test_settle_audit() {
        let journal = journal();
        let id = journal.record_audit(audit_entry("s", AuditResult::Success, 5));

        assert_eq!(journal.settle_audit(id, AuditResult::VersionMismatch, 3), Ok(true));

        let entry = journal.audit(id).unwrap();
        assert_eq!(entry.result, AuditResult::VersionMismatch);
        assert_eq!(entry.processing_ms, 3);
        assert_eq!(journal.settle_audit(Uuid::new_v4(), AuditResult::Success, 0), Ok(false));
    }

    #[test]
    fn test_audit_filter() {
        let journal = journal();
        journal.record_audit(audit_entry("a", AuditResult::Success, 1));
        journal.record_audit(audit_entry("a", AuditResult::RateLimited, 2));
        journal.record_audit(audit_entry("b", AuditResult::Success, 3));

        let filter = AuditFilter::all().with_session("a");
        assert_eq!(journal.audits(&filter, 10).len(), 2);

        let filter = AuditFilter::all()
            .with_session("a")
            .with_result(AuditResult::RateLimited);
        let found = journal.audits(&filter, 10);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].timestamp, 2);
    }

    #[test]
    fn test_purge() {
        let journal = journal();
        journal.record_event(Signal::new(EventType::RateLimit, Severity::Medium), "s", None, 1);
        journal.record_event(Signal::new(EventType::RateLimit, Severity::Medium), "s", None, 100);
        journal.record_audit(audit_entry("s", AuditResult::Success, 1));

        assert_eq!(journal.purge_events_before(50), 1);
        assert_eq!(journal.purge_audits_before(50), 1);
        assert_eq!(journal.events(&EventFilter::all(), 10).len(), 1);
    }
}
