//! The `CounterGuard` facade.
//!
//! Wires a storage backend, a clock, the admission policy and metrics into
//! the single entry point clients call. Every mutating operation runs
//! validation, then admission, then the version-checked mutation, and
//! settles the request's audit entry with the outcome.

use crate::application::admin::AdminConsole;
use crate::application::admission::AdmissionController;
use crate::application::counter::CounterEngine;
use crate::application::metrics::Metrics;
use crate::application::ports::{Backend, Clock};
use crate::application::retention::{RetentionConfig, RetentionSweeper};
use crate::domain::error::GuardError;
use crate::domain::events::{snapshot, InputSnapshot};
use crate::domain::policy::{AdmissionPolicy, PolicyError};
use crate::domain::records::{Action, CounterRecord, MutationRequest, RequestContext};
use crate::domain::validation::{
    validate_name, validate_session_id, validate_version, ValidationError,
};
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::storage::InMemoryBackend;
use std::sync::Arc;
use std::time::Instant;

/// Error returned when building a `CounterGuard` fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// Admission policy validation failed
    InvalidPolicy(PolicyError),
}

impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildError::InvalidPolicy(e) => write!(f, "invalid admission policy: {}", e),
        }
    }
}

impl std::error::Error for BuildError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BuildError::InvalidPolicy(e) => Some(e),
        }
    }
}

impl From<PolicyError> for BuildError {
    fn from(e: PolicyError) -> Self {
        BuildError::InvalidPolicy(e)
    }
}

/// Builder for constructing a `CounterGuard`.
#[derive(Debug)]
pub struct CounterGuardBuilder<B: Backend = InMemoryBackend> {
    backend: B,
    policy: AdmissionPolicy,
    clock: Option<Arc<dyn Clock>>,
    metrics: Option<Metrics>,
}

impl<B: Backend> CounterGuardBuilder<B> {
    /// Set the admission policy.
    pub fn with_policy(mut self, policy: AdmissionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set a custom clock (mainly for testing).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Share an existing metrics handle instead of creating a fresh one.
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Use a different storage backend.
    ///
    /// Every store (counters, sessions, events, audit entries) lives in the
    /// given backend. Instances sharing a backend share all state.
    pub fn with_backend<B2: Backend>(self, backend: B2) -> CounterGuardBuilder<B2> {
        CounterGuardBuilder {
            backend,
            policy: self.policy,
            clock: self.clock,
            metrics: self.metrics,
        }
    }

    /// Build the guard with the configured settings.
    ///
    /// # Errors
    /// Returns `BuildError` if the policy is invalid.
    pub fn build(self) -> Result<CounterGuard<B>, BuildError> {
        self.policy.validate()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock::new()));
        let metrics = self.metrics.unwrap_or_default();

        Ok(CounterGuard {
            admission: AdmissionController::new(&self.backend, self.policy, metrics.clone()),
            counters: CounterEngine::new(self.backend.counters().clone()),
            admin: AdminConsole::new(&self.backend, Arc::clone(&clock)),
            clock,
            metrics,
        })
    }
}

/// Guarded access to the shared counter.
///
/// Cloning is cheap; clones share stores, metrics and clock.
#[derive(Debug, Clone)]
pub struct CounterGuard<B: Backend = InMemoryBackend> {
    admission: AdmissionController<B>,
    counters: CounterEngine<B::Counters>,
    admin: AdminConsole<B>,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
}

impl CounterGuard<InMemoryBackend> {
    /// Create a builder over a fresh in-memory backend.
    ///
    /// Defaults:
    /// - Policy: [`AdmissionPolicy::default`]
    /// - Clock: system time
    /// - Metrics: a fresh handle
    pub fn builder() -> CounterGuardBuilder<InMemoryBackend> {
        CounterGuardBuilder {
            backend: InMemoryBackend::new(),
            policy: AdmissionPolicy::default(),
            clock: None,
            metrics: None,
        }
    }

    /// Create a guard with default settings.
    ///
    /// # Panics
    /// This method cannot panic because the default policy is valid.
    pub fn new() -> Self {
        Self::builder()
            .build()
            .expect("default configuration is always valid")
    }
}

impl Default for CounterGuard<InMemoryBackend> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> CounterGuard<B> {
    /// Read a counter.
    ///
    /// Read-only: no admission, no audit entry.
    ///
    /// # Errors
    /// `InvalidInput` for a bad name, `NotFound` if the counter is absent.
    pub fn get_counter(&self, name: &str) -> Result<CounterRecord, GuardError> {
        validate_name(name)?;
        self.counters.get(name).ok_or_else(|| GuardError::NotFound {
            name: name.to_string(),
        })
    }

    /// Create the counter at value 0, version 0, unless it already exists.
    ///
    /// # Errors
    /// `InvalidInput` for a bad name, `Storage` if the counter was not stored.
    pub fn initialize_counter(&self, name: &str) -> Result<CounterRecord, GuardError> {
        validate_name(name)?;
        self.counters.initialize(name, self.clock.now())
    }

    /// Add one to a counter.
    ///
    /// With `expected_version`, the increment only applies if the stored
    /// version still matches.
    ///
    /// # Errors
    /// Any [`GuardError`]; see [`GuardError::is_retryable`].
    pub fn increment_counter(
        &self,
        name: &str,
        expected_version: Option<i64>,
        ctx: &RequestContext,
    ) -> Result<CounterRecord, GuardError> {
        self.mutate(Action::Increment, name, expected_version, ctx)
    }

    /// Subtract one from a counter.
    ///
    /// # Errors
    /// Any [`GuardError`]; see [`GuardError::is_retryable`].
    pub fn decrement_counter(
        &self,
        name: &str,
        expected_version: Option<i64>,
        ctx: &RequestContext,
    ) -> Result<CounterRecord, GuardError> {
        self.mutate(Action::Decrement, name, expected_version, ctx)
    }

    /// Set a counter back to zero.
    ///
    /// # Errors
    /// `NotFound` if the counter was never created, or any admission error.
    pub fn reset_counter(
        &self,
        name: &str,
        ctx: &RequestContext,
    ) -> Result<CounterRecord, GuardError> {
        self.mutate(Action::Reset, name, None, ctx)
    }

    fn mutate(
        &self,
        action: Action,
        name: &str,
        expected_version: Option<i64>,
        ctx: &RequestContext,
    ) -> Result<CounterRecord, GuardError> {
        let started = Instant::now();
        let now = self.clock.now();
        let input = input_snapshot(name, expected_version);

        let request = match validate_request(action, name, expected_version, ctx) {
            Ok(request) => request,
            Err(e) => {
                return Err(self
                    .admission
                    .reject_invalid(ctx, action.as_str(), input, e, now, started));
            }
        };

        let admission = self
            .admission
            .admit(ctx, action.as_str(), input, now, started)?;

        let outcome = self.counters.apply(&request, &ctx.session_id, now);
        match &outcome {
            Ok(record) => {
                self.metrics.record_applied();
                tracing::debug!(
                    session_id = %ctx.session_id,
                    action = %action,
                    value = record.value,
                    version = record.version,
                    "counter updated"
                );
            }
            Err(GuardError::Storage(e)) => {
                tracing::warn!(
                    session_id = %ctx.session_id,
                    action = %action,
                    error = %e,
                    "counter update not stored"
                );
            }
            Err(_) => {}
        }
        self.admission.settle(&admission, &outcome, started);
        outcome
    }

    /// Administrative operations over the same stores.
    pub fn admin(&self) -> &AdminConsole<B> {
        &self.admin
    }

    /// Admission metrics.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// The admission policy in force.
    pub fn policy(&self) -> &AdmissionPolicy {
        self.admission.policy()
    }

    /// Create a retention sweeper acting on this guard's stores.
    pub fn retention_sweeper(&self, config: RetentionConfig) -> RetentionSweeper<B> {
        RetentionSweeper::new(self.admin.clone(), config)
    }
}

/// Session id first, then name, then version.
fn validate_request(
    action: Action,
    name: &str,
    expected_version: Option<i64>,
    ctx: &RequestContext,
) -> Result<MutationRequest, ValidationError> {
    validate_session_id(&ctx.session_id)?;
    validate_name(name)?;
    let expected_version = expected_version.map(validate_version).transpose()?;
    Ok(MutationRequest {
        action,
        name: name.to_string(),
        expected_version,
    })
}

fn input_snapshot(name: &str, expected_version: Option<i64>) -> InputSnapshot {
    let mut fields = vec![("name", name.to_string())];
    if let Some(version) = expected_version {
        fields.push(("expected_version", version.to_string()));
    }
    snapshot(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::journal::{AuditFilter, EventFilter};
    use crate::domain::events::{AuditResult, EventType};
    use crate::domain::validation::ALLOWED_COUNTER;
    use crate::infrastructure::mocks::MockClock;
    use std::time::Duration;

    fn guard() -> (CounterGuard, MockClock) {
        let clock = MockClock::new(1_000_000);
        let guard = CounterGuard::builder()
            .with_clock(Arc::new(clock.clone()))
            .build()
            .unwrap();
        (guard, clock)
    }

    #[test]
    fn test_build_rejects_invalid_policy() {
        let result = CounterGuard::builder()
            .with_policy(AdmissionPolicy::default().with_block_threshold(0))
            .build();
        assert!(matches!(result, Err(BuildError::InvalidPolicy(_))));
    }

    #[test]
    fn test_get_and_initialize() {
        let (guard, _) = guard();

        assert_eq!(
            guard.get_counter(ALLOWED_COUNTER),
            Err(GuardError::NotFound {
                name: ALLOWED_COUNTER.to_string()
            })
        );

        let created = guard.initialize_counter(ALLOWED_COUNTER).unwrap();
        assert_eq!((created.value, created.version), (0, 0));
        assert_eq!(guard.get_counter(ALLOWED_COUNTER).unwrap(), created);

        assert_eq!(
            guard.initialize_counter("other"),
            Err(GuardError::InvalidInput(ValidationError::NotWhitelisted))
        );
    }

    #[test]
    fn test_increment_settles_audit() {
        let (guard, _) = guard();
        let ctx = RequestContext::new("s1");

        let record = guard.increment_counter(ALLOWED_COUNTER, None, &ctx).unwrap();

        assert_eq!((record.value, record.version), (1, 1));
        assert_eq!(record.last_modified_by.as_deref(), Some("s1"));
        let audits = guard.admin().list_audit_logs(&AuditFilter::all(), 10);
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].action, "increment");
        assert_eq!(audits[0].result, AuditResult::Success);
        assert_eq!(guard.metrics().mutations_applied(), 1);
    }

    #[test]
    fn test_stale_version_settles_as_mismatch() {
        let (guard, clock) = guard();
        let ctx = RequestContext::new("s1");
        guard.increment_counter(ALLOWED_COUNTER, None, &ctx).unwrap();
        clock.advance(Duration::from_secs(1));

        let err = guard
            .increment_counter(ALLOWED_COUNTER, Some(0), &ctx)
            .unwrap_err();

        assert_eq!(
            err,
            GuardError::VersionMismatch {
                expected: 0,
                actual: 1
            }
        );
        let audits = guard
            .admin()
            .list_audit_logs(&AuditFilter::all().with_result(AuditResult::VersionMismatch), 10);
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].input.get("expected_version").map(String::as_str), Some("0"));
    }

    #[test]
    fn test_reset_absent_counter() {
        let (guard, _) = guard();
        let err = guard
            .reset_counter(ALLOWED_COUNTER, &RequestContext::new("s1"))
            .unwrap_err();
        assert_eq!(err.audit_result(), AuditResult::CounterNotFound);
    }

    #[test]
    fn test_negative_version_is_invalid_input() {
        let (guard, _) = guard();
        let ctx = RequestContext::new("s1");

        let err = guard
            .decrement_counter(ALLOWED_COUNTER, Some(-1), &ctx)
            .unwrap_err();

        assert_eq!(err, GuardError::InvalidInput(ValidationError::NegativeVersion));
        let events = guard.admin().list_security_events(
            &EventFilter::all().with_event_type(EventType::InvalidInput),
            10,
        );
        assert_eq!(events.len(), 1);
        assert_eq!(guard.admin().active_session_count(), 0);
    }

    #[test]
    fn test_rate_limited_request_does_not_mutate() {
        let (guard, clock) = guard();
        let ctx = RequestContext::new("s1");
        guard.increment_counter(ALLOWED_COUNTER, None, &ctx).unwrap();
        clock.advance_ms(70);

        let err = guard
            .increment_counter(ALLOWED_COUNTER, None, &ctx)
            .unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(guard.get_counter(ALLOWED_COUNTER).unwrap().value, 1);
    }

    #[test]
    fn test_unstored_mutation_is_not_reported_as_success() {
        use crate::application::ports::Backend;
        use crate::infrastructure::mocks::FlakyBackend;

        let backend = FlakyBackend::new();
        let guard = CounterGuard::builder()
            .with_backend(backend.clone())
            .build()
            .unwrap();
        guard.initialize_counter(ALLOWED_COUNTER).unwrap();
        backend.counters().fail_writes(true);

        let err = guard
            .increment_counter(ALLOWED_COUNTER, Some(0), &RequestContext::new("s1"))
            .unwrap_err();

        assert!(matches!(err, GuardError::Storage(_)));
        assert_eq!(guard.get_counter(ALLOWED_COUNTER).unwrap().version, 0);
        let audits = guard.admin().list_audit_logs(&AuditFilter::all(), 10);
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].result, AuditResult::StorageFailure);
        assert_eq!(guard.metrics().mutations_applied(), 0);
        assert_eq!(guard.metrics().storage_failures(), 1);
    }
}
