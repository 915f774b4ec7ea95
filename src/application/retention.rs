//! Retention sweeping.
//!
//! Periodically deletes security events, audit entries and sessions older
//! than a configured age, so the stores do not grow without bound.

use crate::application::admin::{AdminConsole, CleanupReport};
use crate::application::ports::Backend;
use std::time::Duration;

#[cfg(feature = "async")]
use tokio::{sync::watch, task::JoinHandle, time::interval};

/// Error returned when retention configuration validation fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetentionConfigError {
    /// Sweep interval must be greater than zero
    ZeroInterval,
    /// Maximum record age must be at least one day
    ZeroMaxAge,
}

impl std::fmt::Display for RetentionConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetentionConfigError::ZeroInterval => {
                write!(f, "sweep interval must be greater than 0")
            }
            RetentionConfigError::ZeroMaxAge => {
                write!(f, "max record age must be at least 1 day")
            }
        }
    }
}

impl std::error::Error for RetentionConfigError {}

/// Configuration for retention sweeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionConfig {
    /// How often to sweep
    pub interval: Duration,
    /// Records older than this many days are deleted
    pub max_age_days: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60 * 60),
            max_age_days: 30,
        }
    }
}

impl RetentionConfig {
    /// Create a retention config.
    ///
    /// # Errors
    /// Returns an error if `interval` or `max_age_days` is zero.
    pub fn new(interval: Duration, max_age_days: u64) -> Result<Self, RetentionConfigError> {
        if interval.is_zero() {
            return Err(RetentionConfigError::ZeroInterval);
        }
        if max_age_days == 0 {
            return Err(RetentionConfigError::ZeroMaxAge);
        }
        Ok(Self {
            interval,
            max_age_days,
        })
    }
}

/// Error returned when the sweeper task did not stop cleanly.
#[cfg(feature = "async")]
#[derive(Debug)]
pub struct ShutdownError(tokio::task::JoinError);

#[cfg(feature = "async")]
impl std::fmt::Display for ShutdownError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "retention sweeper failed to stop: {}", self.0)
    }
}

#[cfg(feature = "async")]
impl std::error::Error for ShutdownError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

/// Handle to a running sweeper task.
#[cfg(feature = "async")]
#[derive(Debug)]
pub struct SweeperHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

#[cfg(feature = "async")]
impl SweeperHandle {
    /// Stop the sweeper after any sweep in progress and wait for it.
    ///
    /// # Errors
    /// Returns an error if the task panicked or was aborted.
    pub async fn shutdown(self) -> Result<(), ShutdownError> {
        // The task may already have exited; nothing to signal then.
        let _ = self.stop.send(true);
        self.task.await.map_err(ShutdownError)
    }

    /// Stop the sweeper immediately.
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Check if the task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Deletes old records on a schedule.
#[derive(Debug, Clone)]
pub struct RetentionSweeper<B: Backend> {
    admin: AdminConsole<B>,
    config: RetentionConfig,
}

impl<B: Backend> RetentionSweeper<B> {
    /// Create a sweeper acting through an admin console.
    pub fn new(admin: AdminConsole<B>, config: RetentionConfig) -> Self {
        Self { admin, config }
    }

    /// Run one sweep now.
    pub fn sweep(&self) -> CleanupReport {
        let report = self.admin.cleanup_old_records(self.config.max_age_days);
        if report.total() > 0 {
            tracing::debug!(
                removed = report.total(),
                max_age_days = self.config.max_age_days,
                "retention sweep removed records"
            );
        }
        report
    }

    /// Start sweeping periodically.
    ///
    /// This spawns a background task that sweeps at the configured interval,
    /// the first sweep happening immediately.
    #[cfg(feature = "async")]
    pub fn start(self) -> SweeperHandle {
        let (stop, mut stopped) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = interval(self.config.interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep();
                    }
                    changed = stopped.changed() => {
                        if changed.is_err() || *stopped.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("retention sweeper stopped");
        });

        SweeperHandle { stop, task }
    }

    /// Get the sweeper configuration.
    pub fn config(&self) -> &RetentionConfig {
        &self.config
    }
}
