//! Administrative operations: inspection, event resolution, manual blocking
//! and retention cleanup.

use crate::application::journal::{AuditFilter, EventFilter, SecurityJournal};
use crate::application::ports::{Backend, Clock};
use crate::application::sessions::{SessionPatch, SessionStore};
use crate::domain::error::AdminError;
use crate::domain::events::{EventType, RequestAuditEntry, SecurityEvent, Severity, Signal};
use crate::domain::records::{ClientMeta, SessionRecord, Violations, DAY_MS, HOUR_MS};
use crate::domain::stats::{SecurityStats, StatsAccumulator};
use crate::domain::validation::validate_session_id;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Number of records deleted by a cleanup, per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Security events removed
    pub events: usize,
    /// Audit entries removed
    pub audits: usize,
    /// Sessions removed
    pub sessions: usize,
}

impl CleanupReport {
    /// Total records removed.
    pub fn total(&self) -> usize {
        self.events + self.audits + self.sessions
    }
}

/// Administrative interface over the shared stores.
#[derive(Debug, Clone)]
pub struct AdminConsole<B: Backend> {
    sessions: SessionStore<B::Sessions>,
    journal: SecurityJournal<B::Events, B::Audits>,
    clock: Arc<dyn Clock>,
}

impl<B: Backend> AdminConsole<B> {
    /// Create a console over a backend.
    pub fn new(backend: &B, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: SessionStore::new(backend.sessions().clone()),
            journal: SecurityJournal::new(backend.events().clone(), backend.audits().clone()),
            clock,
        }
    }

    /// Security events matching `filter`, newest first.
    pub fn list_security_events(&self, filter: &EventFilter, limit: usize) -> Vec<SecurityEvent> {
        self.journal.events(filter, limit)
    }

    /// Sessions ordered by most recent activity.
    pub fn list_active_sessions(&self, limit: usize) -> Vec<SessionRecord> {
        let mut sessions = Vec::new();
        self.sessions.for_each(|record| sessions.push(record.clone()));
        sessions.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        sessions.truncate(limit);
        sessions
    }

    /// Sessions whose block has not yet expired, ending soonest first.
    pub fn list_blocked_sessions(&self) -> Vec<SessionRecord> {
        let now = self.clock.now();
        let mut blocked = Vec::new();
        self.sessions.for_each(|record| {
            if record.is_blocked_at(now) {
                blocked.push(record.clone());
            }
        });
        blocked.sort_by_key(|record| record.block_until);
        blocked
    }

    /// Audit entries matching `filter`, newest first.
    pub fn list_audit_logs(&self, filter: &AuditFilter, limit: usize) -> Vec<RequestAuditEntry> {
        self.journal.audits(filter, limit)
    }

    /// Aggregate statistics over the trailing hour and day.
    pub fn security_stats(&self) -> SecurityStats {
        let mut acc = StatsAccumulator::new(self.clock.now());
        self.journal.for_each_event(|event| acc.record_event(event));
        self.sessions.for_each(|record| acc.record_session(record));
        acc.finish()
    }

    /// Mark a security event as handled.
    ///
    /// # Errors
    /// `EventNotFound` if no event has this id, `Storage` if the change was
    /// not stored.
    pub fn resolve_security_event(&self, id: Uuid) -> Result<SecurityEvent, AdminError> {
        let event = self
            .journal
            .resolve_event(id)?
            .ok_or(AdminError::EventNotFound(id))?;
        tracing::info!(event_id = %id, event_type = %event.event_type, "security event resolved");
        Ok(event)
    }

    /// Block a session for `duration_ms`, creating it if unknown.
    ///
    /// # Errors
    /// - `InvalidSessionId` if `session_id` would be rejected on requests
    /// - `InvalidDuration` if `duration_ms` is zero
    /// - `Storage` if the block was not stored
    pub fn block_session(
        &self,
        session_id: &str,
        duration_ms: u64,
        reason: &str,
    ) -> Result<SessionRecord, AdminError> {
        validate_session_id(session_id).map_err(AdminError::InvalidSessionId)?;
        if duration_ms == 0 {
            return Err(AdminError::InvalidDuration);
        }
        let now = self.clock.now();
        let until = now.saturating_add(duration_ms);

        let record = self
            .sessions
            .admit_with(session_id, &ClientMeta::default(), now, |record, _| {
                record.block(until);
                record.clone()
            })?;

        let signal = Signal::new(EventType::AdminBlock, Severity::High)
            .with_detail("reason", reason)
            .with_detail("duration_ms", duration_ms);
        self.journal
            .record_event(signal, session_id, record.client_address.as_deref(), now);

        tracing::info!(session_id, duration_ms, reason, "session blocked by admin");
        Ok(record)
    }

    /// Lift a block and forgive every violation.
    ///
    /// # Errors
    /// `SessionNotFound` if the session does not exist, `Storage` if the
    /// change was not stored.
    pub fn unblock_session(&self, session_id: &str) -> Result<SessionRecord, AdminError> {
        let record = self
            .sessions
            .patch(session_id, &SessionPatch::unblock())?
            .ok_or_else(|| AdminError::SessionNotFound(session_id.to_string()))?;

        let now = self.clock.now();
        let signal = Signal::new(EventType::AdminUnblock, Severity::Low)
            .with_detail("violations", Violations::ZERO);
        self.journal
            .record_event(signal, session_id, record.client_address.as_deref(), now);

        tracing::info!(session_id, "session unblocked by admin");
        Ok(record)
    }

    /// Delete records older than `older_than_days`.
    ///
    /// Events and audit entries are judged by timestamp, sessions by last
    /// activity.
    pub fn cleanup_old_records(&self, older_than_days: u64) -> CleanupReport {
        let cutoff = self
            .clock
            .now()
            .saturating_sub(older_than_days.saturating_mul(DAY_MS));

        let report = CleanupReport {
            events: self.journal.purge_events_before(cutoff),
            audits: self.journal.purge_audits_before(cutoff),
            sessions: self.sessions.remove_inactive(cutoff),
        };

        tracing::info!(
            older_than_days,
            events = report.events,
            audits = report.audits,
            sessions = report.sessions,
            "old records cleaned up"
        );
        report
    }

    /// Sessions active within the last hour.
    pub fn active_session_count(&self) -> usize {
        let cutoff = self.clock.now().saturating_sub(HOUR_MS);
        let mut count = 0;
        self.sessions.for_each(|record| {
            if record.last_activity >= cutoff {
                count += 1;
            }
        });
        count
    }
}
