//! Mock clock for testing.

use crate::application::ports::Clock;
use crate::domain::records::Timestamp;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Mock clock for testing.
///
/// Allows tests to control time progression explicitly, enabling deterministic
/// testing of intervals, windows and block expiry.
///
/// # Examples
///
/// ```
/// use counter_guard::infrastructure::mocks::MockClock;
/// use counter_guard::application::ports::Clock;
/// use std::time::Duration;
///
/// let clock = MockClock::new(1_000);
/// assert_eq!(clock.now(), 1_000);
///
/// clock.advance(Duration::from_millis(250));
/// assert_eq!(clock.now(), 1_250);
///
/// clock.set(5_000);
/// assert_eq!(clock.now(), 5_000);
/// ```
///
/// # Thread Safety
///
/// All clones share the same underlying time value, so advancing time in
/// one clone affects all clones.
#[derive(Debug, Clone)]
pub struct MockClock {
    current_ms: Arc<AtomicU64>,
}

impl MockClock {
    /// Create a mock clock starting at `start` epoch milliseconds.
    pub fn new(start: Timestamp) -> Self {
        Self {
            current_ms: Arc::new(AtomicU64::new(start)),
        }
    }

    /// Advance the clock by a duration.
    pub fn advance(&self, duration: Duration) {
        let step = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self.current_ms.fetch_add(step, Ordering::SeqCst);
    }

    /// Advance the clock by a number of milliseconds.
    pub fn advance_ms(&self, ms: u64) {
        self.current_ms.fetch_add(ms, Ordering::SeqCst);
    }

    /// Set the clock to a specific time.
    pub fn set(&self, now: Timestamp) {
        self.current_ms.store(now, Ordering::SeqCst);
    }
}

impl Clock for MockClock {
    fn now(&self) -> Timestamp {
        self.current_ms.load(Ordering::SeqCst)
    }
}
