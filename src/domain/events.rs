//! Security events and request audit entries.
//!
//! Both are append-only. A security event may later be marked resolved by an
//! administrator; an audit entry written at admission is settled once with
//! the outcome of the mutation it admitted.

use crate::domain::records::Timestamp;
use crate::domain::validation::ILLEGAL_CHARS;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Maximum length kept for each sanitized input value.
pub const MAX_SNAPSHOT_VALUE_LEN: usize = 100;

/// Kind of security-relevant occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Request arrived faster than the minimum interval
    RateLimit,
    /// Request volume exceeded the window limit
    DdosAttempt,
    /// Request cadence too fast for a human
    AutomationDetected,
    /// Input failed validation
    InvalidInput,
    /// Request from a session that is still blocked
    BlockedAccessAttempt,
    /// Session was blocked by the admission controller
    Blocked,
    /// Session was blocked by an administrator
    AdminBlock,
    /// Session was unblocked by an administrator
    AdminUnblock,
}

impl EventType {
    /// All event types, in declaration order.
    pub const ALL: [EventType; 8] = [
        EventType::RateLimit,
        EventType::DdosAttempt,
        EventType::AutomationDetected,
        EventType::InvalidInput,
        EventType::BlockedAccessAttempt,
        EventType::Blocked,
        EventType::AdminBlock,
        EventType::AdminUnblock,
    ];

    /// Wire name of the event type.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::RateLimit => "rate_limit",
            EventType::DdosAttempt => "ddos_attempt",
            EventType::AutomationDetected => "automation_detected",
            EventType::InvalidInput => "invalid_input",
            EventType::BlockedAccessAttempt => "blocked_access_attempt",
            EventType::Blocked => "blocked",
            EventType::AdminBlock => "admin_block",
            EventType::AdminUnblock => "admin_unblock",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of a security event, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// All severities, least severe first.
    pub const ALL: [Severity; 4] = [
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    /// Wire name of the severity.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded security-relevant occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityEvent {
    /// Unique identifier, used to resolve the event
    pub id: Uuid,
    /// Session the event concerns
    pub session_id: String,
    /// Client address at the time of the event
    pub client_address: Option<String>,
    /// What happened
    pub event_type: EventType,
    /// How bad it is
    pub severity: Severity,
    /// Free-form detail fields
    pub details: BTreeMap<String, String>,
    /// When it happened
    pub timestamp: Timestamp,
    /// Set by an administrator once handled
    pub resolved: bool,
}

/// Security event content before it is stamped and stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signal {
    /// What happened
    pub event_type: EventType,
    /// How bad it is
    pub severity: Severity,
    /// Free-form detail fields
    pub details: BTreeMap<String, String>,
}

impl Signal {
    /// Create a signal with no details.
    pub fn new(event_type: EventType, severity: Severity) -> Self {
        Self {
            event_type,
            severity,
            details: BTreeMap::new(),
        }
    }

    /// Add a detail field.
    pub fn with_detail(mut self, key: &str, value: impl ToString) -> Self {
        self.details.insert(key.to_string(), value.to_string());
        self
    }

    /// Stamp the signal into a storable event.
    pub fn into_event(
        self,
        session_id: &str,
        client_address: Option<&str>,
        now: Timestamp,
    ) -> SecurityEvent {
        SecurityEvent {
            id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            client_address: client_address.map(str::to_string),
            event_type: self.event_type,
            severity: self.severity,
            details: self.details,
            timestamp: now,
            resolved: false,
        }
    }
}

/// Outcome code recorded in an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditResult {
    Success,
    Blocked,
    RateLimited,
    InvalidInput,
    VersionMismatch,
    ValueOutOfRange,
    CounterNotFound,
    StorageFailure,
}

impl AuditResult {
    /// Wire name of the result.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditResult::Success => "success",
            AuditResult::Blocked => "blocked",
            AuditResult::RateLimited => "rate_limited",
            AuditResult::InvalidInput => "invalid_input",
            AuditResult::VersionMismatch => "version_mismatch",
            AuditResult::ValueOutOfRange => "value_out_of_range",
            AuditResult::CounterNotFound => "counter_not_found",
            AuditResult::StorageFailure => "storage_failure",
        }
    }
}

impl fmt::Display for AuditResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sanitized copy of the request input.
pub type InputSnapshot = BTreeMap<String, String>;

/// One audit entry per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestAuditEntry {
    /// Unique identifier
    pub id: Uuid,
    /// Requesting session
    pub session_id: String,
    /// Action name, e.g. `increment`
    pub action: String,
    /// Sanitized request input
    pub input: InputSnapshot,
    /// Outcome of the request
    pub result: AuditResult,
    /// When the request was received
    pub timestamp: Timestamp,
    /// Wall time spent processing, in milliseconds
    pub processing_ms: u64,
    /// Client address of the request
    pub client_address: Option<String>,
}

/// Strip markup characters and truncate a value for an audit snapshot.
pub fn sanitize_value(value: &str) -> String {
    value
        .chars()
        .filter(|c| !ILLEGAL_CHARS.contains(c))
        .take(MAX_SNAPSHOT_VALUE_LEN)
        .collect()
}

/// Build a sanitized snapshot from raw key/value pairs.
pub fn snapshot<'a, I>(fields: I) -> InputSnapshot
where
    I: IntoIterator<Item = (&'a str, String)>,
{
    fields
        .into_iter()
        .map(|(key, value)| (key.to_string(), sanitize_value(&value)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_markup() {
        assert_eq!(sanitize_value("<script>alert('x')</script>"), "scriptalert(x)/script");
        assert_eq!(sanitize_value("a&b\\c\"d"), "abcd");
    }

    #[test]
    fn test_sanitize_truncates() {
        let long = "x".repeat(500);
        assert_eq!(sanitize_value(&long).len(), MAX_SNAPSHOT_VALUE_LEN);
    }

    #[test]
    fn test_snapshot() {
        let snap = snapshot([("name", "<b>".to_string()), ("expected_version", "3".to_string())]);
        assert_eq!(snap.get("name").map(String::as_str), Some("b"));
        assert_eq!(snap.get("expected_version").map(String::as_str), Some("3"));
    }

    #[test]
    fn test_signal_into_event() {
        let event = Signal::new(EventType::RateLimit, Severity::Medium)
            .with_detail("since_last_ms", 40)
            .into_event("s1", Some("10.0.0.1"), 1_234);

        assert_eq!(event.session_id, "s1");
        assert_eq!(event.client_address.as_deref(), Some("10.0.0.1"));
        assert_eq!(event.event_type, EventType::RateLimit);
        assert_eq!(event.severity, Severity::Medium);
        assert_eq!(event.timestamp, 1_234);
        assert_eq!(event.details.get("since_last_ms").map(String::as_str), Some("40"));
        assert!(!event.resolved);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(EventType::BlockedAccessAttempt.to_string(), "blocked_access_attempt");
        assert_eq!(AuditResult::ValueOutOfRange.to_string(), "value_out_of_range");
        assert_eq!(Severity::Critical.to_string(), "critical");
    }
}
