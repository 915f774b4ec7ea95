//! Admission controller.
//!
//! Decides whether a request may reach the counter. The decision itself is
//! made by [`AdmissionPolicy::assess`] while the session's per-key lock is
//! held; this module persists the outcome, records security events and the
//! audit entry, and updates metrics.

use crate::application::journal::SecurityJournal;
use crate::application::metrics::Metrics;
use crate::application::ports::Backend;
use crate::application::sessions::SessionStore;
use crate::domain::error::GuardError;
use crate::domain::events::{
    sanitize_value, AuditResult, EventType, InputSnapshot, RequestAuditEntry, Severity, Signal,
};
use crate::domain::policy::{AdmissionPolicy, Assessment, Verdict};
use crate::domain::records::{RequestContext, Timestamp};
use crate::domain::validation::ValidationError;
use std::time::Instant;
use uuid::Uuid;

/// Proof that a request passed admission.
///
/// Carries the id of the audit entry written with `success`, which is later
/// settled with the mutation outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// Audit entry written for this request
    pub audit_id: Uuid,
    /// Whether the session was created by this request
    pub new_session: bool,
}

/// Coordinates admission decisions.
#[derive(Debug, Clone)]
pub struct AdmissionController<B: Backend> {
    sessions: SessionStore<B::Sessions>,
    journal: SecurityJournal<B::Events, B::Audits>,
    policy: AdmissionPolicy,
    metrics: Metrics,
}

pub(crate) fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

impl<B: Backend> AdmissionController<B> {
    /// Create a controller over a backend.
    ///
    /// The policy is assumed to be valid; see [`AdmissionPolicy::validate`].
    pub fn new(backend: &B, policy: AdmissionPolicy, metrics: Metrics) -> Self {
        Self {
            sessions: SessionStore::new(backend.sessions().clone()),
            journal: SecurityJournal::new(backend.events().clone(), backend.audits().clone()),
            policy,
            metrics,
        }
    }

    /// Evaluate a request from `ctx` at `now`.
    ///
    /// A session seen for the first time is created and admitted. Every
    /// outcome writes exactly one audit entry.
    ///
    /// # Errors
    /// `RateLimited` or `Blocked` when the request is denied, `Storage` when
    /// the session's admission state could not be stored.
    pub fn admit(
        &self,
        ctx: &RequestContext,
        action: &str,
        input: InputSnapshot,
        now: Timestamp,
        started: Instant,
    ) -> Result<Admission, GuardError> {
        let admitted = self.sessions.admit_with(
            &ctx.session_id,
            &ctx.client,
            now,
            |record, created| {
                if created {
                    (Assessment::proceed(), true)
                } else {
                    (self.policy.assess(record, now), false)
                }
            },
        );
        let (assessment, new_session) = match admitted {
            Ok(decided) => decided,
            Err(e) => {
                // Unpersisted session state must never admit
                tracing::warn!(
                    session_id = %ctx.session_id,
                    action,
                    error = %e,
                    "session state not stored, denying request"
                );
                return Err(self.deny(ctx, action, input, GuardError::Storage(e), now, started));
            }
        };

        if assessment.unblocked {
            tracing::debug!(session_id = %ctx.session_id, "session block expired");
        }

        for signal in assessment.signals {
            self.journal
                .record_event(signal, &ctx.session_id, ctx.client.address.as_deref(), now);
        }

        let denial = match assessment.verdict {
            Verdict::Proceed => {
                self.metrics.record_admitted();
                let audit_id = self.journal.record_audit(audit_entry(
                    ctx,
                    action,
                    input,
                    AuditResult::Success,
                    now,
                    elapsed_ms(started),
                ));
                tracing::debug!(
                    session_id = %ctx.session_id,
                    action,
                    new_session,
                    "request admitted"
                );
                return Ok(Admission {
                    audit_id,
                    new_session,
                });
            }
            Verdict::RateLimited { retry_after_ms } => GuardError::RateLimited { retry_after_ms },
            Verdict::Blocked { retry_after_ms } => GuardError::blocked_for_ms(retry_after_ms),
        };

        tracing::debug!(
            session_id = %ctx.session_id,
            action,
            error = %denial,
            "request denied"
        );
        Err(self.deny(ctx, action, input, denial, now, started))
    }

    fn deny(
        &self,
        ctx: &RequestContext,
        action: &str,
        input: InputSnapshot,
        denial: GuardError,
        now: Timestamp,
        started: Instant,
    ) -> GuardError {
        self.metrics.record_rejection(&denial);
        self.journal.record_audit(audit_entry(
            ctx,
            action,
            input,
            denial.audit_result(),
            now,
            elapsed_ms(started),
        ));
        denial
    }

    /// Record a request that failed validation before reaching admission.
    ///
    /// Raises one medium-severity `invalid_input` event and writes the audit
    /// entry. Session state is not touched.
    pub fn reject_invalid(
        &self,
        ctx: &RequestContext,
        action: &str,
        input: InputSnapshot,
        error: ValidationError,
        now: Timestamp,
        started: Instant,
    ) -> GuardError {
        let session_id = sanitize_value(&ctx.session_id);
        let signal = Signal::new(EventType::InvalidInput, Severity::Medium)
            .with_detail("action", action)
            .with_detail("reason", error.reason());
        self.journal
            .record_event(signal, &session_id, ctx.client.address.as_deref(), now);

        let error = GuardError::InvalidInput(error);
        self.metrics.record_rejection(&error);

        let mut entry = audit_entry(
            ctx,
            action,
            input,
            error.audit_result(),
            now,
            elapsed_ms(started),
        );
        entry.session_id = session_id;
        self.journal.record_audit(entry);

        tracing::debug!(action, error = %error, "request rejected");
        error
    }

    /// Settle the audit entry of an admitted request with its outcome.
    pub fn settle<T>(
        &self,
        admission: &Admission,
        outcome: &Result<T, GuardError>,
        started: Instant,
    ) {
        let result = match outcome {
            Ok(_) => AuditResult::Success,
            Err(error) => {
                self.metrics.record_rejection(error);
                error.audit_result()
            }
        };
        match self
            .journal
            .settle_audit(admission.audit_id, result, elapsed_ms(started))
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(
                    audit_id = %admission.audit_id,
                    "audit entry vanished before settlement"
                );
            }
            Err(e) => {
                tracing::warn!(
                    audit_id = %admission.audit_id,
                    result = %result,
                    error = %e,
                    "audit entry not settled"
                );
            }
        }
    }

    /// The policy in force.
    pub fn policy(&self) -> &AdmissionPolicy {
        &self.policy
    }

    /// The session store.
    pub fn sessions(&self) -> &SessionStore<B::Sessions> {
        &self.sessions
    }

    /// The security journal.
    pub fn journal(&self) -> &SecurityJournal<B::Events, B::Audits> {
        &self.journal
    }

    /// Admission metrics.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

fn audit_entry(
    ctx: &RequestContext,
    action: &str,
    input: InputSnapshot,
    result: AuditResult,
    now: Timestamp,
    processing_ms: u64,
) -> RequestAuditEntry {
    RequestAuditEntry {
        id: Uuid::new_v4(),
        session_id: ctx.session_id.clone(),
        action: action.to_string(),
        input,
        result,
        timestamp: now,
        processing_ms,
        client_address: ctx.client.address.clone(),
    }
}
