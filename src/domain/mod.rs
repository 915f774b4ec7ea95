//! Domain layer - pure business logic with no storage or runtime dependencies.
//!
//! This layer contains the core concepts and invariants of the service:
//! - Input validation
//! - Counter and session records
//! - Security events and audit entries
//! - The admission policy state machine
//! - Statistics aggregation
//!
//! All types in this layer are pure and easily testable.

pub mod error;
pub mod events;
pub mod policy;
pub mod records;
pub mod stats;
pub mod validation;
