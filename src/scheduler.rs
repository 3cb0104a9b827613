//! Background Commands
//!
//! Periodic side-effect commands that run alongside a verification run, for
//! example triggering a backend snapshot every few minutes. Each command is a
//! job on a shared `tokio-cron-scheduler` scheduler.
//!
//! - [`CommandConfig`]: one configured command and its schedule
//! - [`CommandScheduler`]: owns the scheduler and the registered jobs

use std::time::Duration;

use thiserror::Error;

mod command;
mod registry;

pub use command::{CommandConfig, CommandOutput, run_command};
pub use registry::{CommandScheduler, DEFAULT_SHUTDOWN_TIMEOUT, JobInfo};

/// Minimum allowed interval (1 second).
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Errors that can occur while scheduling or running commands.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Scheduler error.
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// The command could not be spawned.
    #[error("failed to spawn command: {0}")]
    Spawn(#[from] std::io::Error),

    /// Timeout elapsed.
    #[error("command timed out after {0:?}")]
    Timeout(Duration),
}

/// Schedule for command execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    /// Fixed interval between runs, at least [`MIN_INTERVAL`].
    Interval(Duration),

    /// Cron expression: `sec min hour day month weekday` (6-field).
    /// Example: `"0 */5 * * * *"` = every 5 minutes at second 0
    Cron(String),
}

impl Schedule {
    /// Create an interval schedule.
    ///
    /// Interval is clamped to a minimum of 1 second.
    pub fn interval(duration: Duration) -> Self {
        if duration < MIN_INTERVAL {
            tracing::warn!(
                min_interval = ?MIN_INTERVAL,
                requested = ?duration,
                "Command interval below minimum, using minimum"
            );
            Self::Interval(MIN_INTERVAL)
        } else {
            Self::Interval(duration)
        }
    }

    /// Create a cron schedule with immediate validation.
    ///
    /// # Errors
    /// Returns `SchedulerError::Config` if the cron expression is invalid.
    pub fn cron(expr: impl AsRef<str>) -> Result<Self, SchedulerError> {
        use std::str::FromStr;

        let expr = expr.as_ref();
        cron::Schedule::from_str(expr)
            .map_err(|e| SchedulerError::Config(format!("invalid cron expression: {e}")))?;

        Ok(Self::Cron(expr.to_string()))
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Interval(d) => write!(f, "every {:?}", d),
            Self::Cron(expr) => write!(f, "cron: {}", expr),
        }
    }
}
