//! Aggregator for exporter final sums.
//!
//! Every admitted instance gets a watcher task that waits for the shared stop
//! signal, stops the instance and sends its [`InstanceSum`] down a bounded
//! channel. A single collecting task drains that channel. [`Aggregator::stop`]
//! cancels everything, waits for every watcher, closes the channel and returns
//! what the collector gathered. Arrival order does not matter: callers only
//! ever reduce the result commutatively.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::ExporterSpecList;
use crate::exporter::{ExporterError, ExporterInstance, InstanceSum};
use crate::generator::{GeneratorFactory, MetricsGenerator};

/// Capacity of the instance-sum channel.
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Errors that can occur while managing targets.
#[derive(Debug, Error)]
pub enum AggregatorError {
    /// The aggregator is stopping or stopped and admits no new targets.
    #[error("aggregator is stopped")]
    Stopped,

    /// The exporter could not be started.
    #[error(transparent)]
    Exporter(#[from] ExporterError),

    /// Internal error (e.g., collecting task failure).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Hands out scrape ports, monotonically, never reusing one within a run.
///
/// A first port of 0 hands out 0 every time, letting the OS pick ephemeral
/// ports.
#[derive(Debug)]
pub struct PortAllocator {
    ephemeral: bool,
    next: AtomicU32,
}

impl PortAllocator {
    pub fn new(first_port: u16) -> Self {
        Self {
            ephemeral: first_port == 0,
            next: AtomicU32::new(u32::from(first_port)),
        }
    }

    /// Next unused port, or `None` once the range is exhausted.
    pub fn next_port(&self) -> Option<u16> {
        if self.ephemeral {
            return Some(0);
        }
        let port = self.next.fetch_add(1, Ordering::Relaxed);
        u16::try_from(port).ok()
    }
}

/// Result of admitting one batch of exporters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub admitted: usize,
    pub failed: usize,
}

struct Inner {
    sum_tx: Option<mpsc::Sender<InstanceSum>>,
    collector: Option<JoinHandle<Vec<InstanceSum>>>,
    targets: usize,
}

/// Fan-in collector of per-instance final sums.
pub struct Aggregator {
    host: String,
    registration_dir: PathBuf,
    shutdown_grace: Duration,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    inner: Mutex<Inner>,
}

impl Aggregator {
    /// Create an aggregator and spawn its collecting task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        host: impl Into<String>,
        registration_dir: impl AsRef<Path>,
        shutdown_grace: Duration,
    ) -> Self {
        let (sum_tx, sum_rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
        let collector = tokio::spawn(collect_sums(sum_rx));

        Self {
            host: host.into(),
            registration_dir: registration_dir.as_ref().to_path_buf(),
            shutdown_grace,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            inner: Mutex::new(Inner {
                sum_tx: Some(sum_tx),
                collector: Some(collector),
                targets: 0,
            }),
        }
    }

    /// Start an exporter for `generator` on `port` and track it until stop.
    ///
    /// The generator's kind becomes the registration `job` label. Returns the
    /// registered instance address. A failed registration does not affect
    /// previously added targets.
    pub async fn add_target(
        &self,
        port: u16,
        generator: Box<dyn MetricsGenerator>,
    ) -> Result<String, AggregatorError> {
        // Held across the start so stop() cannot slip in between.
        let mut inner = self.inner.lock().await;
        let Some(sum_tx) = inner.sum_tx.clone() else {
            return Err(AggregatorError::Stopped);
        };

        let instance =
            ExporterInstance::start(&self.host, port, Some(&self.registration_dir), generator)
                .await?;
        let address = instance.address().to_string();

        let token = self.shutdown.clone();
        let grace = self.shutdown_grace;
        self.tracker.spawn(async move {
            token.cancelled().await;
            let sum = instance.stop(grace).await;
            if sum_tx.send(sum).await.is_err() {
                tracing::error!("Sum collector closed before instance reported");
            }
        });
        inner.targets += 1;

        Ok(address)
    }

    /// Number of targets successfully added so far.
    pub async fn target_count(&self) -> usize {
        self.inner.lock().await.targets
    }

    /// Stop every instance and return one sum per successfully added target.
    ///
    /// Blocks until all instance shutdowns finish. A second call returns an
    /// empty list.
    pub async fn stop(&self) -> Result<Vec<InstanceSum>, AggregatorError> {
        let (sum_tx, collector, targets) = {
            let mut inner = self.inner.lock().await;
            (inner.sum_tx.take(), inner.collector.take(), inner.targets)
        };
        let Some(collector) = collector else {
            tracing::debug!("Aggregator already stopped");
            return Ok(Vec::new());
        };

        tracing::info!(targets, "Stopping exporters");
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        drop(sum_tx);

        let sums = collector
            .await
            .map_err(|e| AggregatorError::Internal(e.to_string()))?;
        tracing::info!(
            instances = sums.len(),
            total = total_sum(&sums),
            "Exporters stopped"
        );
        Ok(sums)
    }
}

impl std::fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregator")
            .field("host", &self.host)
            .field("registration_dir", &self.registration_dir)
            .field(
                "target_count",
                &self.inner.try_lock().map(|i| i.targets).unwrap_or(0),
            )
            .finish_non_exhaustive()
    }
}

async fn collect_sums(mut rx: mpsc::Receiver<InstanceSum>) -> Vec<InstanceSum> {
    let mut sums = Vec::new();
    while let Some(sum) = rx.recv().await {
        sums.push(sum);
    }
    sums
}

/// Total of all instance sums.
pub fn total_sum(sums: &[InstanceSum]) -> i64 {
    sums.iter().map(|s| s.sum).sum()
}

/// Admit one batch of exporters following `specs`.
///
/// Ports come from `ports`. Individual failures are logged and skipped; the
/// batch stops early only when ports run out or the aggregator is stopping.
pub async fn admit_batch(
    aggregator: &Aggregator,
    ports: &PortAllocator,
    specs: &ExporterSpecList,
    factory: &GeneratorFactory,
) -> BatchOutcome {
    let mut outcome = BatchOutcome::default();
    tracing::info!(exporters = %specs, "Starting exporters");

    for spec in specs.iter() {
        for _ in 0..spec.count {
            let Some(port) = ports.next_port() else {
                tracing::error!("Port range exhausted");
                return outcome;
            };
            let generator = match factory.build(spec.kind) {
                Ok(generator) => generator,
                Err(e) => {
                    tracing::error!(kind = %spec.kind, error = %e, "Failed to build generator");
                    outcome.failed += 1;
                    continue;
                }
            };
            match aggregator.add_target(port, generator).await {
                Ok(address) => {
                    tracing::debug!(instance = %address, kind = %spec.kind, "Target added");
                    outcome.admitted += 1;
                }
                Err(AggregatorError::Stopped) => {
                    tracing::warn!("Aggregator stopping, abandoning batch");
                    return outcome;
                }
                Err(e) => {
                    tracing::error!(port, kind = %spec.kind, error = %e, "Failed to add target");
                    outcome.failed += 1;
                }
            }
        }
    }

    outcome
}
