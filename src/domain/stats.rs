//! Aggregate security statistics.
//!
//! Built by streaming events and sessions through a [`StatsAccumulator`],
//! so the storage layer only has to provide a scan.

use crate::domain::events::{EventType, SecurityEvent, Severity};
use crate::domain::records::{SessionRecord, Timestamp, Violations, DAY_MS, HOUR_MS};
use serde::Serialize;
use std::collections::BTreeMap;

/// Number of sessions reported in [`SecurityStats::top_violators`].
pub const TOP_VIOLATORS: usize = 10;

/// A session with a non-zero violation count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViolatorSummary {
    /// Session identifier
    pub session_id: String,
    /// Current violation count
    pub violations: Violations,
    /// Whether the session is blocked right now
    pub blocked: bool,
    /// Last evaluated request
    pub last_activity: Timestamp,
}

/// Point-in-time overview of security activity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SecurityStats {
    /// Events recorded during the last hour
    pub events_last_hour: usize,
    /// Events recorded during the last 24 hours
    pub events_last_day: usize,
    /// Events not yet resolved, regardless of age
    pub unresolved_events: usize,
    /// Last-24-hour events grouped by type
    pub by_type: BTreeMap<EventType, usize>,
    /// Last-24-hour events grouped by severity
    pub by_severity: BTreeMap<Severity, usize>,
    /// Sessions active during the last hour
    pub active_sessions: usize,
    /// Sessions blocked right now
    pub blocked_sessions: usize,
    /// Sessions with the highest violation counts, worst first
    pub top_violators: Vec<ViolatorSummary>,
}

/// Streams records into a [`SecurityStats`].
#[derive(Debug)]
pub struct StatsAccumulator {
    now: Timestamp,
    stats: SecurityStats,
    violators: Vec<ViolatorSummary>,
}

impl StatsAccumulator {
    /// Start accumulating relative to `now`.
    pub fn new(now: Timestamp) -> Self {
        Self {
            now,
            stats: SecurityStats::default(),
            violators: Vec::new(),
        }
    }

    /// Count a security event.
    pub fn record_event(&mut self, event: &SecurityEvent) {
        if !event.resolved {
            self.stats.unresolved_events += 1;
        }

        let age = self.now.saturating_sub(event.timestamp);
        if age > DAY_MS {
            return;
        }

        self.stats.events_last_day += 1;
        if age <= HOUR_MS {
            self.stats.events_last_hour += 1;
        }
        *self.stats.by_type.entry(event.event_type).or_insert(0) += 1;
        *self.stats.by_severity.entry(event.severity).or_insert(0) += 1;
    }

    /// Count a session.
    pub fn record_session(&mut self, session: &SessionRecord) {
        let blocked = session.is_blocked_at(self.now);
        if blocked {
            self.stats.blocked_sessions += 1;
        }
        if self.now.saturating_sub(session.last_activity) <= HOUR_MS {
            self.stats.active_sessions += 1;
        }
        if !session.violation_count.is_zero() {
            self.violators.push(ViolatorSummary {
                session_id: session.session_id.clone(),
                violations: session.violation_count,
                blocked,
                last_activity: session.last_activity,
            });
        }
    }

    /// Finish and return the statistics.
    pub fn finish(mut self) -> SecurityStats {
        self.violators.sort_by(|a, b| {
            b.violations
                .cmp(&a.violations)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        self.violators.truncate(TOP_VIOLATORS);
        self.stats.top_violators = self.violators;
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::Signal;
    use crate::domain::records::ClientMeta;

    const NOW: Timestamp = 10 * DAY_MS;

    fn event(event_type: EventType, severity: Severity, at: Timestamp) -> SecurityEvent {
        Signal::new(event_type, severity).into_event("s", None, at)
    }

    #[test]
    fn test_event_windows() {
        let mut acc = StatsAccumulator::new(NOW);
        acc.record_event(&event(EventType::RateLimit, Severity::Medium, NOW - 1_000));
        acc.record_event(&event(EventType::Blocked, Severity::Critical, NOW - 2 * HOUR_MS));
        acc.record_event(&event(EventType::RateLimit, Severity::Medium, NOW - 2 * DAY_MS));

        let stats = acc.finish();

        assert_eq!(stats.events_last_hour, 1);
        assert_eq!(stats.events_last_day, 2);
        assert_eq!(stats.unresolved_events, 3);
        assert_eq!(stats.by_type.get(&EventType::RateLimit), Some(&1));
        assert_eq!(stats.by_type.get(&EventType::Blocked), Some(&1));
        assert_eq!(stats.by_severity.get(&Severity::Critical), Some(&1));
    }

    #[test]
    fn test_resolved_events_not_counted_as_unresolved() {
        let mut acc = StatsAccumulator::new(NOW);
        let mut resolved = event(EventType::InvalidInput, Severity::Medium, NOW);
        resolved.resolved = true;
        acc.record_event(&resolved);

        let stats = acc.finish();
        assert_eq!(stats.unresolved_events, 0);
        assert_eq!(stats.events_last_hour, 1);
    }

    #[test]
    fn test_top_violators_ordering_and_cap() {
        let mut acc = StatsAccumulator::new(NOW);
        for i in 0..15u32 {
            let mut session = SessionRecord::new(format!("s{:02}", i), &ClientMeta::default(), NOW);
            session.violation_count = Violations::whole(i);
            acc.record_session(&session);
        }

        let stats = acc.finish();

        assert_eq!(stats.top_violators.len(), TOP_VIOLATORS);
        assert_eq!(stats.top_violators[0].session_id, "s14");
        assert_eq!(stats.top_violators[9].session_id, "s05");
        assert_eq!(stats.active_sessions, 15);
    }

    #[test]
    fn test_blocked_and_inactive_sessions() {
        let mut acc = StatsAccumulator::new(NOW);

        let mut blocked = SessionRecord::new("blocked", &ClientMeta::default(), NOW);
        blocked.block(NOW + 60_000);
        acc.record_session(&blocked);

        let mut expired = SessionRecord::new("expired", &ClientMeta::default(), NOW - 3 * HOUR_MS);
        expired.block(NOW - 1);
        acc.record_session(&expired);

        let stats = acc.finish();
        assert_eq!(stats.blocked_sessions, 1);
        assert_eq!(stats.active_sessions, 1);
        assert!(stats.top_violators.is_empty());
    }
}
