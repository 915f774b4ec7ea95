//! Application layer - orchestration of domain logic.
//!
//! This layer coordinates the domain logic and manages the runtime behavior:
//! - Session store (per-session admission state)
//! - Admission controller (decision making, events, audit)
//! - Counter engine (version-checked mutations)
//! - Admin console and retention sweeping
//!
//! ## Ports
//!
//! The application layer defines ports (traits) that infrastructure
//! adapters must implement. This keeps the application layer independent
//! from infrastructure details.

pub mod admin;
pub mod admission;
pub mod counter;
pub mod journal;
pub mod metrics;
pub mod ports;
pub mod retention;
pub mod retry;
pub mod sessions;
