//! Admission policy: the per-session security state machine.
//!
//! A session moves between `Active` and `Blocked`. Each evaluated request is
//! checked, in order, for block state, automation-speed cadence, rate-limit
//! cadence and window volume. Violations accumulate until the block
//! threshold, after which every further violation produces a block whose
//! duration doubles with the violation count.

use crate::domain::events::{EventType, Severity, Signal};
use crate::domain::records::{SessionRecord, Timestamp, Violations};
use std::fmt;
use std::time::Duration;

/// Error returned when policy thresholds are inconsistent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyError {
    /// Volume window must be greater than zero
    ZeroWindow,
    /// At least one request must be allowed per window
    ZeroRequestLimit,
    /// Block threshold must be greater than zero
    ZeroBlockThreshold,
    /// Base block duration must be greater than zero
    ZeroBaseBlock,
    /// Maximum block duration must not be shorter than the base duration
    MaxBlockBelowBase,
    /// Automation interval must not exceed the minimum request interval
    AutomationAboveMinInterval,
}

impl fmt::Display for PolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyError::ZeroWindow => write!(f, "volume window must be greater than 0"),
            PolicyError::ZeroRequestLimit => {
                write!(f, "max requests per window must be greater than 0")
            }
            PolicyError::ZeroBlockThreshold => write!(f, "block threshold must be greater than 0"),
            PolicyError::ZeroBaseBlock => write!(f, "base block duration must be greater than 0"),
            PolicyError::MaxBlockBelowBase => {
                write!(f, "max block duration must be at least the base block duration")
            }
            PolicyError::AutomationAboveMinInterval => {
                write!(f, "automation interval must not exceed the minimum request interval")
            }
        }
    }
}

impl std::error::Error for PolicyError {}

/// Decision for a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Let the request reach the counter
    Proceed,
    /// Deny; the client may retry after the given delay
    RateLimited {
        /// Suggested wait before retrying
        retry_after_ms: u64,
    },
    /// Deny; the session is blocked for the given time
    Blocked {
        /// Time until the block ends
        retry_after_ms: u64,
    },
}

impl Verdict {
    /// Check if this verdict admits the request.
    pub fn is_proceed(&self) -> bool {
        matches!(self, Verdict::Proceed)
    }
}

/// Result of evaluating one request against a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assessment {
    /// What to do with the request
    pub verdict: Verdict,
    /// Security events raised while evaluating, in order
    pub signals: Vec<Signal>,
    /// Whether an expired block was lifted during evaluation
    pub unblocked: bool,
}

impl Assessment {
    /// Admit without raising anything.
    pub fn proceed() -> Self {
        Self {
            verdict: Verdict::Proceed,
            signals: Vec::new(),
            unblocked: false,
        }
    }
}

/// Thresholds governing admission.
///
/// # Example
/// ```
/// use counter_guard::{AdmissionPolicy, Violations};
/// use std::time::Duration;
///
/// let policy = AdmissionPolicy::default();
/// assert_eq!(
///     policy.block_duration(Violations::whole(6)),
///     Some(Duration::from_secs(120))
/// );
/// assert_eq!(policy.block_duration(Violations::whole(4)), None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionPolicy {
    automation_interval: Duration,
    min_interval: Duration,
    window: Duration,
    max_requests_per_window: u32,
    block_threshold: Violations,
    base_block: Duration,
    max_block: Duration,
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self {
            automation_interval: Duration::from_millis(50),
            min_interval: Duration::from_millis(100),
            window: Duration::from_secs(10),
            max_requests_per_window: 100,
            block_threshold: Violations::whole(5),
            base_block: Duration::from_secs(60),
            max_block: Duration::from_secs(24 * 60 * 60),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl AdmissionPolicy {
    /// Create a policy with the default thresholds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests closer together than this are treated as automated.
    pub fn with_automation_interval(mut self, interval: Duration) -> Self {
        self.automation_interval = interval;
        self
    }

    /// Requests closer together than this are rate limited.
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Set the volume window and the number of requests it admits.
    pub fn with_window(mut self, window: Duration, max_requests: u32) -> Self {
        self.window = window;
        self.max_requests_per_window = max_requests;
        self
    }

    /// Set the violation count at which sessions get blocked.
    pub fn with_block_threshold(mut self, threshold: u32) -> Self {
        self.block_threshold = Violations::whole(threshold);
        self
    }

    /// Set the first block duration and the cap for escalated blocks.
    pub fn with_block_durations(mut self, base: Duration, max: Duration) -> Self {
        self.base_block = base;
        self.max_block = max;
        self
    }

    /// Check the thresholds for consistency.
    ///
    /// # Errors
    /// Returns the first inconsistency found.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.window.is_zero() {
            return Err(PolicyError::ZeroWindow);
        }
        if self.max_requests_per_window == 0 {
            return Err(PolicyError::ZeroRequestLimit);
        }
        if self.block_threshold.is_zero() {
            return Err(PolicyError::ZeroBlockThreshold);
        }
        if self.base_block.is_zero() {
            return Err(PolicyError::ZeroBaseBlock);
        }
        if self.max_block < self.base_block {
            return Err(PolicyError::MaxBlockBelowBase);
        }
        if self.automation_interval > self.min_interval {
            return Err(PolicyError::AutomationAboveMinInterval);
        }
        Ok(())
    }

    /// Violation count at which sessions get blocked.
    pub fn block_threshold(&self) -> Violations {
        self.block_threshold
    }

    /// Length of the volume window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Block duration for a violation count.
    ///
    /// `base × 2^(v − threshold)`, capped at the maximum block. Counts below
    /// the threshold never block.
    pub fn block_duration(&self, violations: Violations) -> Option<Duration> {
        if violations < self.block_threshold {
            return None;
        }
        let exponent = violations.as_f64() - self.block_threshold.as_f64();
        let scaled = millis(self.base_block) as f64 * exponent.exp2();
        let capped = scaled.min(millis(self.max_block) as f64);
        Some(Duration::from_millis(capped as u64))
    }

    /// Evaluate a request from an existing session at `now`.
    ///
    /// Mutates the record in place; the caller persists it atomically.
    pub fn assess(&self, record: &mut SessionRecord, now: Timestamp) -> Assessment {
        let mut unblocked = false;

        if record.is_blocked {
            match record.block_until {
                Some(until) if now < until => {
                    let remaining = until - now;
                    return Assessment {
                        verdict: Verdict::Blocked {
                            retry_after_ms: remaining,
                        },
                        signals: vec![
                            Signal::new(EventType::BlockedAccessAttempt, Severity::High)
                                .with_detail("remaining_ms", remaining),
                        ],
                        unblocked: false,
                    };
                }
                _ => {
                    record.clear_block();
                    record.violation_count.forgive_one();
                    unblocked = true;
                }
            }
        }

        if now.saturating_sub(record.window_start) > millis(self.window) {
            record.request_count = 0;
            record.window_start = now;
        }

        let since_last = now.saturating_sub(record.last_activity);
        let min_interval = millis(self.min_interval);

        // Automation takes precedence: a sub-automation gap never reaches
        // the rate-limit branch.
        if since_last < millis(self.automation_interval) {
            let signal = Signal::new(EventType::AutomationDetected, Severity::High)
                .with_detail("since_last_ms", since_last);
            return self.penalize(
                record,
                now,
                signal,
                Severity::Critical,
                min_interval.saturating_sub(since_last).max(1),
                true,
                unblocked,
            );
        }

        if since_last < min_interval {
            let signal = Signal::new(EventType::RateLimit, Severity::Medium)
                .with_detail("since_last_ms", since_last);
            return self.penalize(
                record,
                now,
                signal,
                Severity::High,
                min_interval.saturating_sub(since_last),
                true,
                unblocked,
            );
        }

        record.request_count = record.request_count.saturating_add(1);
        if record.request_count > self.max_requests_per_window {
            let window_end = record.window_start.saturating_add(millis(self.window));
            let signal = Signal::new(EventType::DdosAttempt, Severity::Critical)
                .with_detail("request_count", record.request_count)
                .with_detail("window_ms", millis(self.window));
            // Cadence is not the problem here, so last activity stays put
            return self.penalize(
                record,
                now,
                signal,
                Severity::Critical,
                window_end.saturating_sub(now).max(1),
                false,
                unblocked,
            );
        }

        record.last_activity = now;
        record.violation_count.decay();

        Assessment {
            verdict: Verdict::Proceed,
            signals: Vec::new(),
            unblocked,
        }
    }

    fn penalize(
        &self,
        record: &mut SessionRecord,
        now: Timestamp,
        signal: Signal,
        block_severity: Severity,
        retry_after_ms: u64,
        refresh_activity: bool,
        unblocked: bool,
    ) -> Assessment {
        record.violation_count.increment();
        if refresh_activity {
            record.last_activity = now;
        }

        let trigger = signal.event_type;
        let mut signals = vec![signal];

        let verdict = match self.block_duration(record.violation_count) {
            Some(duration) => {
                let duration_ms = millis(duration);
                record.block(now.saturating_add(duration_ms));
                signals.push(
                    Signal::new(EventType::Blocked, block_severity)
                        .with_detail("trigger", trigger)
                        .with_detail("violations", record.violation_count)
                        .with_detail("duration_ms", duration_ms),
                );
                Verdict::Blocked {
                    retry_after_ms: duration_ms,
                }
            }
            None => Verdict::RateLimited { retry_after_ms },
        };

        Assessment {
            verdict,
            signals,
            unblocked,
        }
    }
}
