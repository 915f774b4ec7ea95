//! Persisted record types: counters and sessions.
//!
//! Timestamps are milliseconds since the Unix epoch throughout the crate.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;

/// One day in milliseconds.
pub const DAY_MS: u64 = 86_400_000;

/// One hour in milliseconds.
pub const HOUR_MS: u64 = 3_600_000;

/// A named counter and its optimistic-concurrency version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterRecord {
    /// Unique counter name
    pub name: String,
    /// Current value, always within the allowed range
    pub value: i64,
    /// Incremented by one on every successful mutation
    pub version: u64,
    /// Time of the last successful mutation
    pub last_updated: Timestamp,
    /// Session that performed the last mutation
    pub last_modified_by: Option<String>,
}

impl CounterRecord {
    /// Create an untouched counter at value 0, version 0.
    pub fn new(name: impl Into<String>, now: Timestamp) -> Self {
        Self {
            name: name.into(),
            value: 0,
            version: 0,
            last_updated: now,
            last_modified_by: None,
        }
    }
}

/// Violation count stored in tenths.
///
/// Compliant requests decay the count by 0.1, so an integer number of tenths
/// keeps the arithmetic exact and the count can never go negative.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Violations(u32);

impl Violations {
    /// No violations.
    pub const ZERO: Violations = Violations(0);

    const ONE: u32 = 10;

    /// Build from a whole number of violations.
    pub const fn whole(count: u32) -> Self {
        Violations(count.saturating_mul(Self::ONE))
    }

    /// Build from a raw number of tenths.
    pub const fn from_tenths(tenths: u32) -> Self {
        Violations(tenths)
    }

    /// Raw number of tenths.
    pub fn tenths(&self) -> u32 {
        self.0
    }

    /// Value as a real number.
    pub fn as_f64(&self) -> f64 {
        f64::from(self.0) / f64::from(Self::ONE)
    }

    /// Record one more violation.
    pub fn increment(&mut self) {
        self.0 = self.0.saturating_add(Self::ONE);
    }

    /// Forgive one whole violation, floored at zero.
    pub fn forgive_one(&mut self) {
        self.0 = self.0.saturating_sub(Self::ONE);
    }

    /// Reward a compliant request by 0.1, floored at zero.
    pub fn decay(&mut self) {
        self.0 = self.0.saturating_sub(1);
    }

    /// Check if the count is zero.
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Violations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.0 / Self::ONE, self.0 % Self::ONE)
    }
}

/// Client details supplied alongside a session identifier.
///
/// None of these are trusted; they are recorded for audit purposes only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMeta {
    /// Client network address, as reported by the transport
    pub address: Option<String>,
    /// Client user agent string
    pub user_agent: Option<String>,
    /// Opaque identity hint such as a browser fingerprint
    pub identity_hint: Option<String>,
}

/// Per-session admission state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Self-asserted session identifier
    pub session_id: String,
    /// Client address seen on the most recent request
    pub client_address: Option<String>,
    /// Client user agent seen on the most recent request
    pub user_agent: Option<String>,
    /// Opaque identity hint seen on the most recent request
    pub identity_hint: Option<String>,
    /// Time of the last evaluated request
    pub last_activity: Timestamp,
    /// Requests counted in the current volume window
    pub request_count: u32,
    /// Start of the current volume window
    pub window_start: Timestamp,
    /// Accumulated violations, decayed by compliant behaviour
    pub violation_count: Violations,
    /// Whether the session is currently denied
    pub is_blocked: bool,
    /// End of the current block, set whenever `is_blocked` is true
    pub block_until: Option<Timestamp>,
    /// Time the record was created
    pub created_at: Timestamp,
}

impl SessionRecord {
    /// Create the record for a session seen for the first time.
    pub fn new(session_id: impl Into<String>, meta: &ClientMeta, now: Timestamp) -> Self {
        Self {
            session_id: session_id.into(),
            client_address: meta.address.clone(),
            user_agent: meta.user_agent.clone(),
            identity_hint: meta.identity_hint.clone(),
            last_activity: now,
            request_count: 1,
            window_start: now,
            violation_count: Violations::ZERO,
            is_blocked: false,
            block_until: None,
            created_at: now,
        }
    }

    /// Refresh client details from the latest request.
    pub fn touch_meta(&mut self, meta: &ClientMeta) {
        if meta.address.is_some() {
            self.client_address = meta.address.clone();
        }
        if meta.user_agent.is_some() {
            self.user_agent = meta.user_agent.clone();
        }
        if meta.identity_hint.is_some() {
            self.identity_hint = meta.identity_hint.clone();
        }
    }

    /// Check if the session is blocked at `now`.
    pub fn is_blocked_at(&self, now: Timestamp) -> bool {
        self.is_blocked && self.block_until.is_some_and(|until| now < until)
    }

    /// Place the session under a block ending at `until`.
    pub fn block(&mut self, until: Timestamp) {
        self.is_blocked = true;
        self.block_until = Some(until);
    }

    /// Lift any block.
    pub fn clear_block(&mut self) {
        self.is_blocked = false;
        self.block_until = None;
    }
}

/// Mutating action requested by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Add one to the counter
    Increment,
    /// Subtract one from the counter
    Decrement,
    /// Set the counter back to zero
    Reset,
}

impl Action {
    /// Name recorded in audit entries.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Increment => "increment",
            Action::Decrement => "decrement",
            Action::Reset => "reset",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated mutation, ready for admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRequest {
    /// Action to apply
    pub action: Action,
    /// Counter name, already whitelisted
    pub name: String,
    /// Version the client last observed, if any
    pub expected_version: Option<u64>,
}

/// Identity and client details accompanying every request.
///
/// Passed explicitly into each call; there is no process-wide session object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// Self-asserted session identifier
    pub session_id: String,
    /// Untrusted client details
    pub client: ClientMeta,
}

impl RequestContext {
    /// Create a context carrying only a session identifier.
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            client: ClientMeta::default(),
        }
    }

    /// Attach a client address.
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.client.address = Some(address.into());
        self
    }

    /// Attach a user agent.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.client.user_agent = Some(user_agent.into());
        self
    }

    /// Attach an opaque identity hint.
    pub fn with_identity_hint(mut self, hint: impl Into<String>) -> Self {
        self.client.identity_hint = Some(hint.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violations_arithmetic() {
        let mut v = Violations::ZERO;
        v.increment();
        v.increment();
        assert_eq!(v, Violations::whole(2));

        v.decay();
        assert_eq!(v.tenths(), 19);
        assert!((v.as_f64() - 1.9).abs() < f64::EPSILON);

        v.forgive_one();
        v.forgive_one();
        assert_eq!(v, Violations::ZERO);

        v.decay();
        assert!(v.is_zero());
    }

    #[test]
    fn test_violations_display() {
        assert_eq!(Violations::from_tenths(53).to_string(), "5.3");
        assert_eq!(Violations::ZERO.to_string(), "0.0");
    }

    #[test]
    fn test_new_session_defaults() {
        let meta = ClientMeta {
            address: Some("10.0.0.1".to_string()),
            ..ClientMeta::default()
        };
        let record = SessionRecord::new("abc", &meta, 1_000);

        assert_eq!(record.request_count, 1);
        assert_eq!(record.window_start, 1_000);
        assert_eq!(record.last_activity, 1_000);
        assert_eq!(record.created_at, 1_000);
        assert!(record.violation_count.is_zero());
        assert!(!record.is_blocked);
        assert_eq!(record.client_address.as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn test_block_window() {
        let mut record = SessionRecord::new("abc", &ClientMeta::default(), 0);
        record.block(5_000);

        assert!(record.is_blocked_at(4_999));
        assert!(!record.is_blocked_at(5_000));

        record.clear_block();
        assert!(!record.is_blocked);
        assert_eq!(record.block_until, None);
    }

    #[test]
    fn test_touch_meta_keeps_known_values() {
        let mut record = SessionRecord::new(
            "abc",
            &ClientMeta {
                user_agent: Some("agent/1".to_string()),
                ..ClientMeta::default()
            },
            0,
        );
        record.touch_meta(&ClientMeta {
            address: Some("10.0.0.2".to_string()),
            ..ClientMeta::default()
        });

        assert_eq!(record.user_agent.as_deref(), Some("agent/1"));
        assert_eq!(record.client_address.as_deref(), Some("10.0.0.2"));
    }
}
