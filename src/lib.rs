//! # counter-guard
//!
//! Admission control, abuse mitigation and an audit trail for a single shared
//! counter that many concurrent clients increment, decrement or reset.
//!
//! The counter itself is trivial. Every mutating request first passes an
//! admission controller that tracks each session: request spacing, volume per
//! window and a violation score that escalates into temporary blocks. Every
//! request leaves an audit entry; suspicious behavior leaves security events
//! an administrator can review.
//!
//! ## Quick Start
//!
//! ```rust
//! use counter_guard::{CounterGuard, GuardError, RequestContext};
//!
//! let guard = CounterGuard::new();
//! let ctx = RequestContext::new("session-1").with_address("203.0.113.7");
//!
//! let record = guard.increment_counter("global-counter", None, &ctx).unwrap();
//! assert_eq!((record.value, record.version), (1, 1));
//!
//! // A second request within 100ms of the first is rate limited
//! match guard.increment_counter("global-counter", Some(1), &ctx) {
//!     Err(GuardError::RateLimited { retry_after_ms }) => assert!(retry_after_ms <= 100),
//!     other => panic!("unexpected: {:?}", other),
//! }
//! ```
//!
//! ## Configuration
//!
//! ```rust
//! use counter_guard::{AdmissionPolicy, CounterGuard};
//! use std::time::Duration;
//!
//! let policy = AdmissionPolicy::default()
//!     .with_min_interval(Duration::from_millis(250))
//!     .with_window(Duration::from_secs(60), 30)
//!     .with_block_threshold(3);
//!
//! let guard = CounterGuard::builder()
//!     .with_policy(policy)
//!     .build()
//!     .expect("valid policy");
//! assert_eq!(guard.policy().window(), Duration::from_secs(60));
//! ```
//!
//! ## Admission
//!
//! For a known session, in order:
//! - **Blocked**: denied until the block expires; expiry forgives one violation
//! - **Automation**: requests closer than 50ms add a violation
//! - **Rate limit**: requests closer than 100ms add a violation
//! - **Volume**: more than 100 requests in a 10s window add a violation
//!
//! At 5 violations the session is blocked for `60s × 2^(v − 5)`, capped at
//! one day. A request that passes decays the score by 0.1.
//!
//! ## Optimistic Concurrency
//!
//! Mutations accept the version the client last saw. A stale version fails
//! with `VersionMismatch` and changes nothing; retrying with the same stale
//! version fails the same way. Only `RateLimited` is worth retrying
//! automatically, see [`RetryPolicy`].
//!
//! ## Administration
//!
//! ```rust
//! use counter_guard::{CounterGuard, EventFilter, EventType};
//!
//! let guard = CounterGuard::new();
//! let admin = guard.admin();
//!
//! admin.block_session("abusive", 60_000, "manual review").unwrap();
//! assert_eq!(admin.list_blocked_sessions().len(), 1);
//!
//! let events = admin.list_security_events(
//!     &EventFilter::all().with_event_type(EventType::AdminBlock),
//!     10,
//! );
//! admin.resolve_security_event(events[0].id).unwrap();
//! assert_eq!(admin.security_stats().unresolved_events, 0);
//! ```
//!
//! ## Logging
//!
//! Security events are logged under the `counter_guard::security` target:
//! `warn` for high and critical severity, `info` otherwise. Denials log at
//! `debug`, admin actions at `info`, storage failures at `warn`.
//!
//! ## Storage
//!
//! State lives behind the [`Storage`] port. [`InMemoryBackend`] keeps it in
//! sharded maps; with the `redis-storage` feature, `RedisBackend` shares it
//! across processes.

// Domain layer - pure business logic
pub mod domain;

// Application layer - orchestration
pub mod application;

// Infrastructure layer - external adapters
pub mod infrastructure;

// Re-export commonly used types for convenience
pub use domain::{
    error::{AdminError, GuardError, StorageError},
    events::{AuditResult, EventType, RequestAuditEntry, SecurityEvent, Severity},
    policy::{AdmissionPolicy, PolicyError},
    records::{Action, ClientMeta, CounterRecord, RequestContext, SessionRecord, Violations},
    stats::{SecurityStats, ViolatorSummary},
    validation::{ValidationError, ALLOWED_COUNTER},
};

pub use application::{
    admin::{AdminConsole, CleanupReport},
    journal::{AuditFilter, EventFilter},
    metrics::{Metrics, MetricsSnapshot},
    ports::{Backend, Clock, Storage},
    retention::{RetentionConfig, RetentionConfigError, RetentionSweeper},
    retry::RetryPolicy,
};

#[cfg(feature = "async")]
pub use application::retention::{ShutdownError, SweeperHandle};

#[cfg(feature = "async")]
pub use application::retry::retry_async;

pub use infrastructure::{
    clock::SystemClock,
    guard::{BuildError, CounterGuard, CounterGuardBuilder},
    storage::{InMemoryBackend, ShardedStorage},
};

#[cfg(feature = "redis-storage")]
pub use infrastructure::redis_storage::{RedisBackend, RedisStorage, RedisStorageConfig};
