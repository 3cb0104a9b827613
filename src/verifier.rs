//! Verification run orchestrator.
//!
//! A run moves through [`RunState`]: `Idle → Running → Draining → Verifying
//! → Done`. While running, exporters are scraped by the backend for the test
//! duration. Draining stops background loops first and the exporters last,
//! capturing each instance's exact final sum. Verifying compares every sum
//! with what the backend recorded for that instance, retrying while the
//! backend catches up.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::aggregator::{Aggregator, AggregatorError, PortAllocator, admit_batch, total_sum};
use crate::config::{ConfigError, RunConfig};
use crate::controller::{AdmissionController, AdmissionSettings};
use crate::exporter::InstanceSum;
use crate::query::{QueryApi, first_value, instance_sum_query};
use crate::scheduler::{CommandScheduler, SchedulerError};

/// Errors that abort a run. A verification mismatch is not one of them.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Exporters were requested but none could be started.
    #[error("no exporter could be started ({requested} requested)")]
    NoTargets { requested: usize },

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Aggregator(#[from] AggregatorError),

    /// A verifier runs once.
    #[error("run already started")]
    AlreadyStarted,
}

/// Phase of a verification run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RunState {
    Idle,
    Running,
    Draining,
    Verifying,
    Done,
}

/// Tolerance and retry policy for comparing sums.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VerifySettings {
    pub max_delta_ratio: f64,
    pub max_query_retries: u32,
    pub retry_interval: Duration,
    pub retention: Option<Duration>,
}

impl From<&RunConfig> for VerifySettings {
    fn from(config: &RunConfig) -> Self {
        Self {
            max_delta_ratio: config.max_delta_ratio,
            max_query_retries: config.max_query_retries,
            retry_interval: config.retry_interval,
            retention: config.retention,
        }
    }
}

/// Observed-versus-expected comparison for one instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceOutcome {
    pub instance: String,
    /// Sum the exporter actually served.
    pub final_sum: i64,
    /// Final sum scaled for retention.
    pub expected: f64,
    /// Last value the backend returned; `None` when it never had data.
    pub actual: Option<f64>,
    pub relative_delta: f64,
    pub abs_delta: f64,
    pub attempts: u32,
    pub within_tolerance: bool,
}

/// Outcome of a whole run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub started_at: DateTime<Utc>,
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
    /// Batches added by adaptive admission on top of the initial one.
    pub adaptive_batches: usize,
    pub expected_total: i64,
    /// Sum of per-instance absolute deltas, rounded to the nearest integer.
    pub total_abs_delta: u64,
    /// The run token was cancelled before verification finished.
    pub cancelled: bool,
    pub instances: Vec<InstanceOutcome>,
}

impl RunResult {
    pub fn all_within_tolerance(&self) -> bool {
        self.instances.iter().all(|o| o.within_tolerance)
    }

    pub fn failed_instances(&self) -> usize {
        self.instances.iter().filter(|o| !o.within_tolerance).count()
    }
}

// =============================================================================
// Comparison
// =============================================================================

/// Expected backend total for `final_sum`, scaled by `retention / elapsed`
/// when the run outlived the retention window.
pub fn expected_value(final_sum: i64, elapsed: Duration, retention: Option<Duration>) -> f64 {
    let sum = final_sum as f64;
    match retention {
        Some(retention) if elapsed > retention => {
            sum * retention.as_secs_f64() / elapsed.as_secs_f64()
        }
        _ => sum,
    }
}

/// Signed relative delta `(expected − actual) / expected`.
///
/// With `expected == 0` the result is 0 for an exact match and ±1 otherwise.
pub fn relative_delta(expected: f64, actual: f64) -> f64 {
    if expected == 0.0 {
        return if actual == 0.0 {
            0.0
        } else {
            -actual.signum()
        };
    }
    (expected - actual) / expected
}

/// Whether `actual` is acceptable for `expected`.
pub fn within_tolerance(expected: f64, actual: f64, max_delta_ratio: f64) -> bool {
    if expected == 0.0 {
        return actual == 0.0;
    }
    relative_delta(expected, actual).abs() <= max_delta_ratio
}

/// Compare one instance's final sum with the backend.
///
/// The query window covers the whole run so far and is recomputed per
/// attempt. Query errors and empty results count as "no data this attempt".
/// Cancelling `token` abandons the pending retry sleep or query; the outcome
/// covers the attempts that completed.
pub async fn verify_instance(
    query: &dyn QueryApi,
    sum: &InstanceSum,
    started: Instant,
    elapsed: Duration,
    settings: &VerifySettings,
    token: &CancellationToken,
) -> InstanceOutcome {
    let expected = expected_value(sum.sum, elapsed, settings.retention);
    let mut actual = None;
    let mut attempts = 0;

    for attempt in 0..=settings.max_query_retries {
        if attempt > 0 {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(settings.retry_interval) => {}
            }
        }

        let range_secs = 1 + started.elapsed().as_secs();
        let expr = instance_sum_query(&sum.instance, range_secs);
        let response = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            response = query.query(&expr, Utc::now()) => response,
        };
        attempts += 1;

        match response {
            Ok(samples) => match first_value(&samples) {
                Some(value) => {
                    actual = Some(value);
                    if within_tolerance(expected, value, settings.max_delta_ratio) {
                        break;
                    }
                    tracing::info!(
                        instance = %sum.instance,
                        expected,
                        actual = value,
                        attempt = attempts,
                        "Backend total differs"
                    );
                }
                // No series is the expected answer for an instance never scraped.
                None if expected == 0.0 => break,
                None => {
                    tracing::info!(instance = %sum.instance, attempt = attempts, "No data yet");
                }
            },
            Err(e) => {
                tracing::warn!(instance = %sum.instance, attempt = attempts, error = %e, "Query failed");
            }
        }
    }

    if token.is_cancelled() {
        tracing::warn!(instance = %sum.instance, attempts, "Verification cancelled");
    }

    let observed = actual.unwrap_or(0.0);
    let outcome = InstanceOutcome {
        instance: sum.instance.clone(),
        final_sum: sum.sum,
        expected,
        actual,
        relative_delta: relative_delta(expected, observed),
        abs_delta: (expected - observed).abs(),
        attempts,
        within_tolerance: within_tolerance(expected, observed, settings.max_delta_ratio),
    };

    if outcome.within_tolerance {
        tracing::debug!(instance = %outcome.instance, expected, attempts, "Instance verified");
    } else {
        tracing::warn!(
            instance = %outcome.instance,
            expected,
            actual = observed,
            relative_delta = outcome.relative_delta,
            "Instance outside tolerance"
        );
    }
    outcome
}

/// Verify every instance; returns the outcomes and the total absolute delta.
///
/// After cancellation the remaining instances are still reported, with zero
/// attempts.
pub async fn verify(
    query: &dyn QueryApi,
    sums: &[InstanceSum],
    started: Instant,
    elapsed: Duration,
    settings: &VerifySettings,
    token: &CancellationToken,
) -> (Vec<InstanceOutcome>, f64) {
    let mut outcomes = Vec::with_capacity(sums.len());
    let mut total_abs_delta = 0.0;
    for sum in sums {
        let outcome = verify_instance(query, sum, started, elapsed, settings, token).await;
        total_abs_delta += outcome.abs_delta;
        outcomes.push(outcome);
    }
    (outcomes, total_abs_delta)
}

// =============================================================================
// Orchestration
// =============================================================================

/// Drives one verification run.
pub struct Verifier {
    config: RunConfig,
    query: Arc<dyn QueryApi>,
    state: watch::Sender<RunState>,
}

impl Verifier {
    pub fn new(config: RunConfig, query: Arc<dyn QueryApi>) -> Self {
        let (state, _) = watch::channel(RunState::Idle);
        Self {
            config,
            query,
            state,
        }
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    fn transition(&self, next: RunState) {
        let prev = self.state.send_replace(next);
        tracing::info!(from = %prev, to = %next, "Run state changed");
    }

    /// Execute the run. Cancelling `token` ends the running phase early and
    /// cuts verification short; exporters are still drained and every
    /// instance is reported, with whatever attempts completed.
    pub async fn run(&self, token: CancellationToken) -> Result<RunResult, RunError> {
        if self.state() != RunState::Idle {
            return Err(RunError::AlreadyStarted);
        }
        self.config.validate()?;
        self.transition(RunState::Running);

        let scheduler = if self.config.commands.is_empty() {
            None
        } else {
            match CommandScheduler::from_commands(&self.config.commands).await {
                Ok(s) => Some(s),
                Err(e) => {
                    self.transition(RunState::Done);
                    return Err(e.into());
                }
            }
        };

        let aggregator = Arc::new(Aggregator::new(
            self.config.host.clone(),
            &self.config.registration_dir,
            self.config.shutdown_grace,
        ));
        let ports = Arc::new(PortAllocator::new(self.config.first_port));
        let factory = Arc::new(self.config.generator.factory());

        let requested = self.config.exporters.total();
        let initial = admit_batch(&aggregator, &ports, &self.config.exporters, &factory).await;
        if initial.admitted == 0 && requested > 0 {
            aggregator.stop().await?;
            self.transition(RunState::Done);
            return Err(RunError::NoTargets { requested });
        }
        tracing::info!(
            admitted = initial.admitted,
            failed = initial.failed,
            "Initial exporters started"
        );

        let background = token.child_token();
        let controller = self.config.adaptive_interval.map(|interval| {
            let controller = AdmissionController::new(
                Arc::clone(&self.query),
                Arc::clone(&aggregator),
                Arc::clone(&ports),
                Arc::clone(&factory),
                self.config.exporters.clone(),
                AdmissionSettings {
                    interval,
                    scrape_interval: self.config.scrape_interval,
                    tolerance: self.config.adaptive_tolerance,
                },
            );
            tokio::spawn(controller.run(background.clone()))
        });
        let scheduler: Option<JoinHandle<Result<(), SchedulerError>>> =
            scheduler.map(|s| tokio::spawn(s.run(background.clone())));

        let started_at = Utc::now();
        let started = Instant::now();
        tokio::select! {
            _ = tokio::time::sleep(self.config.test_duration) => {}
            _ = token.cancelled() => {
                tracing::warn!("Run cancelled, draining early");
            }
        }

        self.transition(RunState::Draining);
        background.cancel();

        let adaptive_batches = match controller {
            Some(handle) => handle.await.unwrap_or_else(|e| {
                tracing::error!(error = %e, "Admission controller task failed");
                0
            }),
            None => 0,
        };
        if let Some(handle) = scheduler {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "Command scheduler failed"),
                Err(e) => tracing::error!(error = %e, "Command scheduler task failed"),
            }
        }

        let sums = aggregator.stop().await?;
        let elapsed = started.elapsed();
        let expected_total = total_sum(&sums);

        self.transition(RunState::Verifying);
        let settings = VerifySettings::from(&self.config);
        let (instances, total_abs_delta) =
            verify(self.query.as_ref(), &sums, started, elapsed, &settings, &token).await;
        let total_abs_delta = total_abs_delta.round() as u64;

        let result = RunResult {
            started_at,
            elapsed,
            adaptive_batches,
            expected_total,
            total_abs_delta,
            cancelled: token.is_cancelled(),
            instances,
        };
        self.transition(RunState::Done);

        tracing::info!(
            instances = result.instances.len(),
            expected_total,
            total_abs_delta,
            cancelled = result.cancelled,
            failed = result.failed_instances(),
            "Verification complete"
        );
        Ok(result)
    }
}

impl std::fmt::Debug for Verifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Verifier")
            .field("state", &self.state())
            .field("exporters", &self.config.exporters)
            .finish_non_exhaustive()
    }
}
