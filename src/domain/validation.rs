//! Input validation for counter requests.
//!
//! Every check here is pure and runs before any state is touched. A failure
//! short-circuits the request with an `invalid_input` audit result.

use std::fmt;

/// The only counter name the service accepts.
pub const ALLOWED_COUNTER: &str = "global-counter";

/// Maximum length of a counter name, in characters.
pub const MAX_NAME_LEN: usize = 50;

/// Maximum length of a session identifier, in characters.
pub const MAX_SESSION_ID_LEN: usize = 128;

/// Lowest value a counter may hold.
pub const MIN_VALUE: i64 = -1_000_000;

/// Highest value a counter may hold.
pub const MAX_VALUE: i64 = 1_000_000;

/// Characters rejected anywhere in a name or session identifier.
pub const ILLEGAL_CHARS: [char; 6] = ['<', '>', '"', '\'', '&', '\\'];

/// Reason an input was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    /// Counter name is missing or empty
    EmptyName,
    /// Counter name exceeds [`MAX_NAME_LEN`]
    NameTooLong,
    /// Input contains one of [`ILLEGAL_CHARS`]
    IllegalCharacters,
    /// Counter name is not the allowed counter
    NotWhitelisted,
    /// Value is NaN or infinite
    NotFinite,
    /// Value lies outside [`MIN_VALUE`, `MAX_VALUE`]
    OutOfRange,
    /// Expected version is negative
    NegativeVersion,
    /// Session identifier is empty
    EmptySession,
    /// Session identifier exceeds [`MAX_SESSION_ID_LEN`]
    SessionTooLong,
}

impl ValidationError {
    /// Short reason code used in security event details.
    pub fn reason(&self) -> &'static str {
        match self {
            ValidationError::EmptyName => "empty",
            ValidationError::NameTooLong => "too long",
            ValidationError::IllegalCharacters => "illegal characters",
            ValidationError::NotWhitelisted => "not whitelisted",
            ValidationError::NotFinite => "not finite",
            ValidationError::OutOfRange => "out of range",
            ValidationError::NegativeVersion => "not a non-negative integer",
            ValidationError::EmptySession => "empty session",
            ValidationError::SessionTooLong => "session too long",
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::EmptyName => write!(f, "counter name must not be empty"),
            ValidationError::NameTooLong => {
                write!(f, "counter name must be at most {} characters", MAX_NAME_LEN)
            }
            ValidationError::IllegalCharacters => write!(f, "input contains illegal characters"),
            ValidationError::NotWhitelisted => write!(f, "counter name is not whitelisted"),
            ValidationError::NotFinite => write!(f, "value must be a finite number"),
            ValidationError::OutOfRange => {
                write!(f, "value must be within [{}, {}]", MIN_VALUE, MAX_VALUE)
            }
            ValidationError::NegativeVersion => {
                write!(f, "version must be a non-negative integer")
            }
            ValidationError::EmptySession => write!(f, "session identifier must not be empty"),
            ValidationError::SessionTooLong => write!(
                f,
                "session identifier must be at most {} characters",
                MAX_SESSION_ID_LEN
            ),
        }
    }
}

impl std::error::Error for ValidationError {}

fn has_illegal_chars(input: &str) -> bool {
    input.chars().any(|c| ILLEGAL_CHARS.contains(&c))
}

/// Validate a counter name.
///
/// Checks run in order: empty, length, illegal characters, whitelist.
pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(ValidationError::NameTooLong);
    }
    if has_illegal_chars(name) {
        return Err(ValidationError::IllegalCharacters);
    }
    if name != ALLOWED_COUNTER {
        return Err(ValidationError::NotWhitelisted);
    }
    Ok(())
}

/// Validate a counter value.
pub fn validate_value(value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NotFinite);
    }
    if value < MIN_VALUE as f64 || value > MAX_VALUE as f64 {
        return Err(ValidationError::OutOfRange);
    }
    Ok(())
}

/// Validate an expected version and convert it to its stored form.
pub fn validate_version(version: i64) -> Result<u64, ValidationError> {
    u64::try_from(version).map_err(|_| ValidationError::NegativeVersion)
}

/// Validate a self-asserted session identifier.
pub fn validate_session_id(session_id: &str) -> Result<(), ValidationError> {
    if session_id.is_empty() {
        return Err(ValidationError::EmptySession);
    }
    if session_id.chars().count() > MAX_SESSION_ID_LEN {
        return Err(ValidationError::SessionTooLong);
    }
    if has_illegal_chars(session_id) {
        return Err(ValidationError::IllegalCharacters);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_name() {
        assert_eq!(validate_name("global-counter"), Ok(()));
    }

    #[test]
    fn test_name_rejections() {
        assert_eq!(validate_name(""), Err(ValidationError::EmptyName));
        assert_eq!(
            validate_name(&"a".repeat(51)),
            Err(ValidationError::NameTooLong)
        );
        assert_eq!(
            validate_name("<script>"),
            Err(ValidationError::IllegalCharacters)
        );
        assert_eq!(
            validate_name("other-counter"),
            Err(ValidationError::NotWhitelisted)
        );
    }

    #[test]
    fn test_each_illegal_char_rejected() {
        for c in ILLEGAL_CHARS {
            let name = format!("global{}counter", c);
            assert_eq!(
                validate_name(&name),
                Err(ValidationError::IllegalCharacters),
                "char {:?} should be rejected",
                c
            );
        }
    }

    #[test]
    fn test_length_checked_before_whitelist() {
        // 50 characters passes the length check and fails the whitelist
        assert_eq!(
            validate_name(&"a".repeat(50)),
            Err(ValidationError::NotWhitelisted)
        );
    }

    #[test]
    fn test_value_bounds() {
        assert_eq!(validate_value(0.0), Ok(()));
        assert_eq!(validate_value(1_000_000.0), Ok(()));
        assert_eq!(validate_value(-1_000_000.0), Ok(()));
        assert_eq!(
            validate_value(1_000_001.0),
            Err(ValidationError::OutOfRange)
        );
        assert_eq!(
            validate_value(-1_000_001.0),
            Err(ValidationError::OutOfRange)
        );
        assert_eq!(validate_value(f64::NAN), Err(ValidationError::NotFinite));
        assert_eq!(
            validate_value(f64::INFINITY),
            Err(ValidationError::NotFinite)
        );
    }

    #[test]
    fn test_version() {
        assert_eq!(validate_version(0), Ok(0));
        assert_eq!(validate_version(42), Ok(42));
        assert_eq!(validate_version(-1), Err(ValidationError::NegativeVersion));
    }

    #[test]
    fn test_session_id() {
        assert_eq!(validate_session_id("session-abc"), Ok(()));
        assert_eq!(validate_session_id(""), Err(ValidationError::EmptySession));
        assert_eq!(
            validate_session_id(&"s".repeat(129)),
            Err(ValidationError::SessionTooLong)
        );
        assert_eq!(
            validate_session_id("a&b"),
            Err(ValidationError::IllegalCharacters)
        );
    }

    #[test]
    fn test_reason_codes() {
        assert_eq!(ValidationError::NotWhitelisted.reason(), "not whitelisted");
        assert_eq!(ValidationError::NameTooLong.reason(), "too long");
        assert_eq!(
            ValidationError::IllegalCharacters.reason(),
            "illegal characters"
        );
        assert_eq!(ValidationError::EmptyName.reason(), "empty");
    }
}
