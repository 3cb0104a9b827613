//! Command configuration and execution.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::process::Command;

use super::{Schedule, SchedulerError};
use crate::config::expand_env_vars;

/// Default command timeout (10 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

fn default_enabled() -> bool {
    true
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

/// A periodic side-effect command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandConfig {
    /// Unique name for this command.
    pub name: String,
    /// Program and arguments. `${VAR}` references are expanded at run time.
    pub command: Vec<String>,
    /// Enable this command (default: true).
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Fixed interval between runs. Exclusive with `cron`.
    #[serde(default, with = "humantime_serde")]
    pub interval: Option<Duration>,
    /// Cron expression. Exclusive with `interval`.
    #[serde(default)]
    pub cron: Option<String>,
    /// Per-run timeout (default: 10s).
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl CommandConfig {
    /// Create an interval command.
    pub fn new(name: impl Into<String>, command: Vec<String>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            command,
            enabled: true,
            interval: Some(interval),
            cron: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Switch to a cron schedule.
    pub fn with_cron(mut self, expr: impl Into<String>) -> Self {
        self.interval = None;
        self.cron = Some(expr.into());
        self
    }

    /// Set the per-run timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set enabled.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Resolve the schedule; exactly one of `interval` and `cron` must be set.
    pub fn schedule(&self) -> Result<Schedule, SchedulerError> {
        match (self.interval, &self.cron) {
            (Some(d), None) => Ok(Schedule::interval(d)),
            (None, Some(expr)) => Schedule::cron(expr),
            (Some(_), Some(_)) => Err(SchedulerError::Config(
                "cannot specify both interval and cron".to_string(),
            )),
            (None, None) => Err(SchedulerError::Config(
                "one of interval or cron is required".to_string(),
            )),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.command.first().is_none_or(|p| p.trim().is_empty()) {
            return Err(SchedulerError::Config("command cannot be empty".to_string()));
        }
        if self.timeout.is_zero() {
            return Err(SchedulerError::Config(
                "timeout must be positive".to_string(),
            ));
        }
        self.schedule().map(|_| ())
    }
}

/// Outcome of one finished command run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal.
    pub code: Option<i32>,
    pub stdout_bytes: usize,
    pub stderr_bytes: usize,
    pub duration_ms: u128,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Run `config.command` once under its timeout.
///
/// A timed-out child is killed. A non-zero exit is an `Ok` outcome; only
/// failing to spawn or timing out is an error.
pub async fn run_command(config: &CommandConfig) -> Result<CommandOutput, SchedulerError> {
    let argv: Vec<String> = config.command.iter().map(|a| expand_env_vars(a)).collect();
    let Some((program, args)) = argv.split_first() else {
        return Err(SchedulerError::Config("command cannot be empty".to_string()));
    };

    let start = Instant::now();
    let child = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(config.timeout, child)
        .await
        .map_err(|_| SchedulerError::Timeout(config.timeout))??;

    Ok(CommandOutput {
        code: output.status.code(),
        stdout_bytes: output.stdout.len(),
        stderr_bytes: output.stderr.len(),
        duration_ms: start.elapsed().as_millis(),
    })
}
