//! scrapebench - Ingestion Correctness Benchmark
//!
//! Checks that a scraping time-series backend records exactly what it was
//! served. Synthetic exporters emit metric streams whose running total is
//! known in closed form; after the run, the backend is queried per exporter
//! and the recorded total is compared with the served one.
//!
//! # Architecture
//!
//! - **Generators**: deterministic metric streams with a running-sum oracle
//! - **Exporters**: one scrape endpoint per generator, announced via file-SD
//! - **Aggregator**: fan-in of every exporter's final sum at shutdown
//! - **Controller**: adds load while the backend keeps its scrape interval
//! - **Verifier**: run orchestration and the delta-tolerant comparison
//! - **Scheduler**: periodic side-effect commands during a run
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use scrapebench::{PrometheusClient, RunConfig, Verifier};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RunConfig::load("scrapebench.yaml")?;
//!     let client = PrometheusClient::new(&config.query.resolved_url(), config.query.timeout)?;
//!     let result = Verifier::new(config, Arc::new(client))
//!         .run(CancellationToken::new())
//!         .await?;
//!     println!("total delta: {}", result.total_abs_delta);
//!     Ok(())
//! }
//! ```

pub mod aggregator;
pub mod config;
pub mod controller;
pub mod exporter;
pub mod generator;
pub mod query;
pub mod scheduler;
pub mod verifier;

pub use aggregator::{Aggregator, AggregatorError, PortAllocator};
pub use config::{ConfigError, ExporterSpecList, RunConfig};
pub use exporter::{ExporterError, ExporterInstance, InstanceSum};
pub use generator::{GeneratorFactory, GeneratorKind, MetricsGenerator};
pub use query::{PrometheusClient, QueryApi, QueryError};
pub use verifier::{RunError, RunResult, RunState, Verifier};
