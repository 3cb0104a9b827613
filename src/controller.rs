//! Adaptive admission controller.
//!
//! Grows the load while the backend keeps up. Each period the controller asks
//! the backend for the 99th percentile of its observed scrape interval; while
//! that stays within a relative tolerance of the configured interval, another
//! batch of exporters with the initial mix is admitted.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::aggregator::{Aggregator, PortAllocator, admit_batch};
use crate::config::ExporterSpecList;
use crate::generator::GeneratorFactory;
use crate::query::{QueryApi, first_value, scrape_interval_p99_query};

/// Timing and tolerance for adaptive admission.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdmissionSettings {
    /// Period between health checks.
    pub interval: Duration,
    /// Scrape interval the backend is configured with.
    pub scrape_interval: Duration,
    /// Allowed relative drift of the p99 interval.
    pub tolerance: f64,
}

/// Whether an observed p99 scrape interval (seconds) is close enough to the
/// configured one. NaN is never healthy.
pub fn is_healthy(p99_secs: f64, scrape_interval: Duration, tolerance: f64) -> bool {
    let expected = scrape_interval.as_secs_f64();
    if expected <= 0.0 || !p99_secs.is_finite() {
        return false;
    }
    (p99_secs - expected).abs() / expected <= tolerance
}

/// Periodically admits more exporters while the backend is healthy.
pub struct AdmissionController {
    query: Arc<dyn QueryApi>,
    aggregator: Arc<Aggregator>,
    ports: Arc<PortAllocator>,
    factory: Arc<GeneratorFactory>,
    specs: ExporterSpecList,
    settings: AdmissionSettings,
}

impl AdmissionController {
    pub fn new(
        query: Arc<dyn QueryApi>,
        aggregator: Arc<Aggregator>,
        ports: Arc<PortAllocator>,
        factory: Arc<GeneratorFactory>,
        specs: ExporterSpecList,
        settings: AdmissionSettings,
    ) -> Self {
        Self {
            query,
            aggregator,
            ports,
            factory,
            specs,
            settings,
        }
    }

    /// Run until `token` is cancelled; returns the number of batches admitted.
    ///
    /// The first check happens one period after the start.
    pub async fn run(self, token: CancellationToken) -> usize {
        let period = self.settings.interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval = ?period,
            tolerance = self.settings.tolerance,
            "Adaptive admission started"
        );

        let mut batches = 0;
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    if self.tick().await {
                        batches += 1;
                    }
                }
            }
        }

        tracing::info!(batches, "Adaptive admission stopped");
        batches
    }

    /// One health check; admits a batch when healthy. Returns whether any
    /// exporter was admitted.
    async fn tick(&self) -> bool {
        let expr = scrape_interval_p99_query(self.settings.scrape_interval);
        let p99 = match self.query.query(&expr, Utc::now()).await {
            Ok(samples) => match first_value(&samples) {
                Some(v) => v,
                None => {
                    tracing::warn!(query = %expr, "No scrape interval data, skipping tick");
                    return false;
                }
            },
            Err(e) => {
                tracing::warn!(query = %expr, error = %e, "Scrape interval query failed, skipping tick");
                return false;
            }
        };

        if !is_healthy(p99, self.settings.scrape_interval, self.settings.tolerance) {
            tracing::info!(
                p99,
                scrape_interval = ?self.settings.scrape_interval,
                "Backend lagging, holding load"
            );
            return false;
        }

        let outcome = admit_batch(&self.aggregator, &self.ports, &self.specs, &self.factory).await;
        let total = self.aggregator.target_count().await;
        tracing::info!(
            p99,
            admitted = outcome.admitted,
            failed = outcome.failed,
            total_targets = total,
            "Admitted exporter batch"
        );
        outcome.admitted > 0
    }
}

impl std::fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionController")
            .field("specs", &self.specs)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
