//! Observability metrics for admission and mutation outcomes.
//!
//! Counts are process-local even when storage is shared.

use crate::domain::error::GuardError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Metrics tracking admission and mutation statistics.
///
/// All metrics use atomic operations for thread-safe updates and reads.
/// Clones share the same counters.
#[derive(Debug, Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    admitted: AtomicU64,
    rate_limited: AtomicU64,
    blocked: AtomicU64,
    invalid_input: AtomicU64,
    version_conflicts: AtomicU64,
    mutations_applied: AtomicU64,
    storage_failures: AtomicU64,
}

impl Metrics {
    /// Create a new metrics tracker.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::default()),
        }
    }

    pub(crate) fn record_admitted(&self) {
        self.inner.admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_applied(&self) {
        self.inner.mutations_applied.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a request rejected with `error`.
    ///
    /// Range and not-found failures are not tracked separately.
    pub(crate) fn record_rejection(&self, error: &GuardError) {
        let counter = match error {
            GuardError::RateLimited { .. } => &self.inner.rate_limited,
            GuardError::Blocked { .. } => &self.inner.blocked,
            GuardError::InvalidInput(_) => &self.inner.invalid_input,
            GuardError::VersionMismatch { .. } => &self.inner.version_conflicts,
            GuardError::Storage(_) => &self.inner.storage_failures,
            GuardError::ValueOutOfRange { .. } | GuardError::NotFound { .. } => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Requests that passed admission.
    pub fn admitted(&self) -> u64 {
        self.inner.admitted.load(Ordering::Relaxed)
    }

    /// Requests denied with `RateLimited`.
    pub fn rate_limited(&self) -> u64 {
        self.inner.rate_limited.load(Ordering::Relaxed)
    }

    /// Requests denied with `Blocked`.
    pub fn blocked(&self) -> u64 {
        self.inner.blocked.load(Ordering::Relaxed)
    }

    /// Requests rejected by validation.
    pub fn invalid_input(&self) -> u64 {
        self.inner.invalid_input.load(Ordering::Relaxed)
    }

    /// Mutations rejected for a stale version.
    pub fn version_conflicts(&self) -> u64 {
        self.inner.version_conflicts.load(Ordering::Relaxed)
    }

    /// Mutations that changed a counter.
    pub fn mutations_applied(&self) -> u64 {
        self.inner.mutations_applied.load(Ordering::Relaxed)
    }

    /// Requests that failed because the store did not persist a change.
    pub fn storage_failures(&self) -> u64 {
        self.inner.storage_failures.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            admitted: self.admitted(),
            rate_limited: self.rate_limited(),
            blocked: self.blocked(),
            invalid_input: self.invalid_input(),
            version_conflicts: self.version_conflicts(),
            mutations_applied: self.mutations_applied(),
            storage_failures: self.storage_failures(),
        }
    }

    /// Reset all metrics to zero.
    ///
    /// Useful for testing or when starting a new monitoring period.
    pub fn reset(&self) {
        for counter in [
            &self.inner.admitted,
            &self.inner.rate_limited,
            &self.inner.blocked,
            &self.inner.invalid_input,
            &self.inner.version_conflicts,
            &self.inner.mutations_applied,
            &self.inner.storage_failures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A point-in-time snapshot of metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Requests that passed admission
    pub admitted: u64,
    /// Requests denied with `RateLimited`
    pub rate_limited: u64,
    /// Requests denied with `Blocked`
    pub blocked: u64,
    /// Requests rejected by validation
    pub invalid_input: u64,
    /// Mutations rejected for a stale version
    pub version_conflicts: u64,
    /// Mutations that changed a counter
    pub mutations_applied: u64,
    /// Requests that failed because the store did not persist a change
    pub storage_failures: u64,
}

impl MetricsSnapshot {
    /// Requests denied by admission (rate limited or blocked).
    pub fn denied(&self) -> u64 {
        self.rate_limited.saturating_add(self.blocked)
    }

    /// Calculate the denial rate (0.0 to 1.0).
    ///
    /// Returns the ratio of denied requests to all evaluated requests.
    /// Returns 0.0 if nothing has been evaluated.
    pub fn denial_rate(&self) -> f64 {
        let total = self.admitted.saturating_add(self.denied());
        if total == 0 {
            0.0
        } else {
            self.denied() as f64 / total as f64
        }
    }
}
