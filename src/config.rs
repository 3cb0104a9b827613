//! Configuration module for scrapebench runs.
//!
//! Provides YAML-based configuration loading and validation for:
//! - The exporter mix (`kind:count` list) and port range
//! - Run timing (scrape interval, test duration, retention)
//! - Verification tolerance and query retry policy
//! - Generator grid settings and background commands

mod app;
mod exporter;
mod validation;

pub use app::{GeneratorConfig, QueryConfig, RunConfig};
pub use exporter::{ExporterSpec, ExporterSpecList};
pub use validation::{ConfigError, expand_env_vars, parse_duration};

// Re-export constants
pub use app::{
    DEFAULT_ADAPTIVE_TOLERANCE, DEFAULT_FIRST_PORT, DEFAULT_MAX_QUERY_RETRIES,
    DEFAULT_QUERY_TIMEOUT, DEFAULT_QUERY_URL, DEFAULT_RETRY_INTERVAL, DEFAULT_SCRAPE_INTERVAL,
    DEFAULT_TEST_DURATION,
};
