//! Per-request error outcomes.
//!
//! All but [`GuardError::Storage`] are expected conditions the client can act
//! on. Each maps to exactly one audit result.

use crate::domain::events::AuditResult;
use crate::domain::validation::ValidationError;
use std::fmt;

/// Error returned by counter operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    /// Input was malformed or disallowed; correct it before resending
    InvalidInput(ValidationError),
    /// Too fast; back off and retry
    RateLimited {
        /// Suggested wait before retrying
        retry_after_ms: u64,
    },
    /// Session is blocked; wait out the block
    Blocked {
        /// Seconds until the block ends, rounded up
        retry_after_secs: u64,
    },
    /// Counter changed since the client last read it; re-read before retrying
    VersionMismatch {
        /// Version the client supplied
        expected: u64,
        /// Version currently stored
        actual: u64,
    },
    /// Mutation would leave the allowed range
    ValueOutOfRange {
        /// Value the mutation would have produced
        attempted: i64,
    },
    /// Counter does not exist
    NotFound {
        /// Name that was looked up
        name: String,
    },
    /// The backing store did not persist the change; nothing was applied
    Storage(StorageError),
}

impl GuardError {
    /// Build a `Blocked` error from a remaining duration in milliseconds.
    pub fn blocked_for_ms(remaining_ms: u64) -> Self {
        GuardError::Blocked {
            retry_after_secs: remaining_ms.div_ceil(1_000),
        }
    }

    /// Audit result recorded for this error.
    pub fn audit_result(&self) -> AuditResult {
        match self {
            GuardError::InvalidInput(_) => AuditResult::InvalidInput,
            GuardError::RateLimited { .. } => AuditResult::RateLimited,
            GuardError::Blocked { .. } => AuditResult::Blocked,
            GuardError::VersionMismatch { .. } => AuditResult::VersionMismatch,
            GuardError::ValueOutOfRange { .. } => AuditResult::ValueOutOfRange,
            GuardError::NotFound { .. } => AuditResult::CounterNotFound,
            GuardError::Storage(_) => AuditResult::StorageFailure,
        }
    }

    /// Check if a client may retry automatically.
    ///
    /// Only rate limiting is transient. A version mismatch must be reconciled
    /// by re-reading the counter, and a block must be waited out.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GuardError::RateLimited { .. })
    }
}

impl fmt::Display for GuardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardError::InvalidInput(e) => write!(f, "invalid input: {}", e),
            GuardError::RateLimited { retry_after_ms } => {
                write!(f, "slow down: retry after {}ms", retry_after_ms)
            }
            GuardError::Blocked { retry_after_secs } => {
                write!(f, "session blocked: retry after {}s", retry_after_secs)
            }
            GuardError::VersionMismatch { expected, actual } => write!(
                f,
                "version mismatch: expected {}, current {}",
                expected, actual
            ),
            GuardError::ValueOutOfRange { attempted } => {
                write!(f, "value {} is out of range", attempted)
            }
            GuardError::NotFound { name } => write!(f, "counter {} not found", name),
            GuardError::Storage(e) => write!(f, "storage failure: {}", e),
        }
    }
}

impl std::error::Error for GuardError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GuardError::InvalidInput(e) => Some(e),
            GuardError::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ValidationError> for GuardError {
    fn from(e: ValidationError) -> Self {
        GuardError::InvalidInput(e)
    }
}

impl From<StorageError> for GuardError {
    fn from(e: StorageError) -> Self {
        GuardError::Storage(e)
    }
}

/// A read-modify-write the storage adapter could not complete.
///
/// When this is returned the stored record is unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The store could not be reached or rejected the operation
    Unavailable(String),
    /// Concurrent writers won every compare-and-set attempt
    Contended {
        /// Attempts made before giving up
        attempts: u32,
    },
    /// The modified record could not be encoded
    Encoding(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Unavailable(reason) => write!(f, "store unavailable: {}", reason),
            StorageError::Contended { attempts } => {
                write!(f, "write lost to concurrent updates {} times", attempts)
            }
            StorageError::Encoding(reason) => write!(f, "record encoding failed: {}", reason),
        }
    }
}

impl std::error::Error for StorageError {}

/// Error returned by administrative operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminError {
    /// No session with this identifier exists
    SessionNotFound(String),
    /// No security event with this identifier exists
    EventNotFound(uuid::Uuid),
    /// Block duration must be greater than zero
    InvalidDuration,
    /// Session identifier failed validation
    InvalidSessionId(ValidationError),
    /// The change was not persisted
    Storage(StorageError),
}

impl fmt::Display for AdminError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdminError::SessionNotFound(id) => write!(f, "session {} not found", id),
            AdminError::EventNotFound(id) => write!(f, "security event {} not found", id),
            AdminError::InvalidDuration => write!(f, "block duration must be greater than 0"),
            AdminError::InvalidSessionId(e) => write!(f, "invalid session id: {}", e),
            AdminError::Storage(e) => write!(f, "storage failure: {}", e),
        }
    }
}

impl std::error::Error for AdminError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AdminError::InvalidSessionId(e) => Some(e),
            AdminError::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StorageError> for AdminError {
    fn from(e: StorageError) -> Self {
        AdminError::Storage(e)
    }
}
