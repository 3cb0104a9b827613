//! Command scheduler for managing background job lifecycle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;

use super::{CommandConfig, Schedule, SchedulerError, run_command};

/// Default timeout for graceful shutdown (5 seconds).
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Metadata about a registered job.
#[derive(Debug, Clone)]
pub struct JobInfo {
    /// Job UUID.
    pub id: uuid::Uuid,
    /// Command name.
    pub name: String,
    /// Schedule description.
    pub schedule: String,
}

/// Scheduler for the run's background commands.
///
/// Uses `tokio-cron-scheduler` for both fixed-interval and cron jobs.
pub struct CommandScheduler {
    scheduler: JobScheduler,
    jobs: Arc<RwLock<HashMap<uuid::Uuid, JobInfo>>>,
}

impl CommandScheduler {
    /// Create an empty command scheduler.
    pub async fn new() -> Result<Self, SchedulerError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| SchedulerError::Scheduler(e.to_string()))?;

        Ok(Self {
            scheduler,
            jobs: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Create a scheduler with a job for every enabled command.
    pub async fn from_commands(commands: &[CommandConfig]) -> Result<Self, SchedulerError> {
        let scheduler = Self::new().await?;
        for command in commands {
            if !command.enabled {
                tracing::debug!(command = %command.name, "Command disabled, skipping");
                continue;
            }
            scheduler.add(command.clone()).await?;
        }
        Ok(scheduler)
    }

    /// Register a command as a scheduled job.
    pub async fn add(&self, command: CommandConfig) -> Result<uuid::Uuid, SchedulerError> {
        command.validate().map_err(|e| {
            SchedulerError::Config(format!("command '{}': {}", command.name, e))
        })?;
        let schedule = command.schedule()?;
        let name = command.name.clone();

        let job = create_job(Arc::new(command), &schedule)?;
        let job_id = self
            .scheduler
            .add(job)
            .await
            .map_err(|e| SchedulerError::Scheduler(e.to_string()))?;

        self.jobs.write().await.insert(
            job_id,
            JobInfo {
                id: job_id,
                name: name.clone(),
                schedule: schedule.to_string(),
            },
        );

        tracing::info!(command = %name, job_id = %job_id, schedule = %schedule, "Command registered");
        Ok(job_id)
    }

    /// Start the scheduler.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        self.scheduler
            .start()
            .await
            .map_err(|e| SchedulerError::Scheduler(e.to_string()))?;
        tracing::info!("Command scheduler started");
        Ok(())
    }

    /// List all registered jobs.
    pub async fn list_jobs(&self) -> Vec<JobInfo> {
        self.jobs.read().await.values().cloned().collect()
    }

    /// Get the number of registered jobs.
    pub async fn job_count(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// Start, run until `token` is cancelled, then shut down.
    pub async fn run(self, token: CancellationToken) -> Result<(), SchedulerError> {
        self.start().await?;
        token.cancelled().await;
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// Shutdown with custom timeout.
    ///
    /// A shutdown that outlives `timeout` is logged and abandoned.
    pub async fn shutdown_with_timeout(mut self, timeout: Duration) -> Result<(), SchedulerError> {
        let job_count = self.jobs.read().await.len();
        let shutdown_result = tokio::time::timeout(timeout, async {
            self.scheduler
                .shutdown()
                .await
                .map_err(|e| SchedulerError::Scheduler(e.to_string()))
        })
        .await;

        match shutdown_result {
            Ok(Ok(())) => {
                tracing::info!(job_count, "Command scheduler shutdown complete");
                Ok(())
            }
            Ok(Err(e)) => {
                tracing::error!(job_count, error = %e, "Command scheduler shutdown failed");
                Err(e)
            }
            Err(_) => {
                tracing::warn!(job_count, "Command scheduler shutdown timed out");
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for CommandScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandScheduler")
            .field(
                "job_count",
                &self.jobs.try_read().map(|j| j.len()).unwrap_or(0),
            )
            .finish_non_exhaustive()
    }
}

fn create_job(command: Arc<CommandConfig>, schedule: &Schedule) -> Result<Job, SchedulerError> {
    let make_callback = move || {
        move |_: uuid::Uuid, _: JobScheduler| {
            let command = Arc::clone(&command);
            Box::pin(async move { run_scheduled(&command).await })
                as std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
        }
    };

    match schedule {
        Schedule::Interval(d) => Job::new_repeated_async(*d, make_callback()),
        Schedule::Cron(expr) => Job::new_cron_job_async(expr.as_str(), make_callback()),
    }
    .map_err(|e| SchedulerError::Scheduler(e.to_string()))
}

/// Execute one scheduled run and log the result.
async fn run_scheduled(command: &CommandConfig) {
    tracing::debug!(command = %command.name, "Running command");

    match run_command(command).await {
        Ok(output) if output.success() => {
            tracing::info!(
                command = %command.name,
                duration_ms = output.duration_ms,
                stdout_bytes = output.stdout_bytes,
                "Command succeeded"
            );
        }
        Ok(output) => {
            tracing::warn!(
                command = %command.name,
                code = ?output.code,
                stderr_bytes = output.stderr_bytes,
                "Command exited unsuccessfully"
            );
        }
        Err(e) => {
            tracing::error!(command = %command.name, error = %e, "Command failed");
        }
    }
}
