//! Run configuration structures.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::exporter::DEFAULT_SHUTDOWN_GRACE;
use crate::generator::{
    DEFAULT_LABEL_COUNT, DEFAULT_MAX_VALUE, DEFAULT_METRIC_COUNT, GeneratorFactory, GeneratorKind,
    SeriesGrid,
};
use crate::scheduler::CommandConfig;

use super::exporter::{ExporterSpec, ExporterSpecList};
use super::validation::{ConfigError, expand_env_vars, require_positive};

// =============================================================================
// Constants
// =============================================================================

/// Default first exporter port.
pub const DEFAULT_FIRST_PORT: u16 = 10_000;

/// Default backend scrape interval (1 second).
pub const DEFAULT_SCRAPE_INTERVAL: Duration = Duration::from_secs(1);

/// Default test duration (60 seconds).
pub const DEFAULT_TEST_DURATION: Duration = Duration::from_secs(60);

/// Default number of query retries after the first attempt.
pub const DEFAULT_MAX_QUERY_RETRIES: u32 = 3;

/// Default spacing between query attempts (5 seconds).
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Default tolerance on the p99 scrape interval for admitting more load.
pub const DEFAULT_ADAPTIVE_TOLERANCE: f64 = 0.05;

/// Default query timeout (10 seconds).
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Default query backend base URL.
pub const DEFAULT_QUERY_URL: &str = "http://localhost:9090";

fn default_first_port() -> u16 {
    DEFAULT_FIRST_PORT
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_registration_dir() -> PathBuf {
    PathBuf::from("sd_configs")
}

fn default_scrape_interval() -> Duration {
    DEFAULT_SCRAPE_INTERVAL
}

fn default_test_duration() -> Duration {
    DEFAULT_TEST_DURATION
}

fn default_max_query_retries() -> u32 {
    DEFAULT_MAX_QUERY_RETRIES
}

fn default_retry_interval() -> Duration {
    DEFAULT_RETRY_INTERVAL
}

fn default_shutdown_grace() -> Duration {
    DEFAULT_SHUTDOWN_GRACE
}

fn default_adaptive_tolerance() -> f64 {
    DEFAULT_ADAPTIVE_TOLERANCE
}

// =============================================================================
// Query Configuration
// =============================================================================

/// Query backend connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Base URL of the query API (default: "http://localhost:9090").
    pub url: String,

    /// Per-request timeout (default: 10s).
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_QUERY_URL.to_string(),
            timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }
}

impl QueryConfig {
    /// Base URL with `${VAR}` references expanded.
    pub fn resolved_url(&self) -> String {
        expand_env_vars(&self.url)
    }
}

// =============================================================================
// Generator Configuration
// =============================================================================

/// Series grid and random table settings shared by all generators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub metric_count: u32,
    pub label_count: u32,
    /// Exclusive upper bound for random-cyclic values.
    pub max_value: u32,
    /// Seed for reproducible random tables.
    pub seed: Option<u64>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            metric_count: DEFAULT_METRIC_COUNT,
            label_count: DEFAULT_LABEL_COUNT,
            max_value: DEFAULT_MAX_VALUE,
            seed: None,
        }
    }
}

impl GeneratorConfig {
    pub fn factory(&self) -> GeneratorFactory {
        GeneratorFactory::new(
            SeriesGrid::new(self.metric_count, self.label_count),
            self.max_value,
            self.seed,
        )
    }
}

// =============================================================================
// Run Configuration
// =============================================================================

/// Top-level run configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Exporter mix admitted per batch, e.g. `"inc:3,static:2"`.
    pub exporters: ExporterSpecList,

    /// First exporter port (default: 10000). 0 binds ephemeral ports.
    #[serde(default = "default_first_port")]
    pub first_port: u16,

    /// Host used for binding and in registered addresses (default: "localhost").
    #[serde(default = "default_host")]
    pub host: String,

    /// File-SD directory the backend watches (default: "sd_configs").
    #[serde(default = "default_registration_dir")]
    pub registration_dir: PathBuf,

    /// Backend scrape interval (default: 1s).
    #[serde(default = "default_scrape_interval", with = "humantime_serde")]
    pub scrape_interval: Duration,

    /// How long exporters are scraped before verification (default: 60s).
    #[serde(default = "default_test_duration", with = "humantime_serde")]
    pub test_duration: Duration,

    /// Backend retention window; expected sums are scaled when a run
    /// outlives it.
    #[serde(default, with = "humantime_serde")]
    pub retention: Option<Duration>,

    /// Largest accepted |relative delta| per instance (default: 0.0).
    #[serde(default)]
    pub max_delta_ratio: f64,

    /// Query retries after the first attempt (default: 3).
    #[serde(default = "default_max_query_retries")]
    pub max_query_retries: u32,

    /// Spacing between query attempts (default: 5s).
    #[serde(default = "default_retry_interval", with = "humantime_serde")]
    pub retry_interval: Duration,

    /// Per-instance drain grace on stop (default: 10s).
    #[serde(default = "default_shutdown_grace", with = "humantime_serde")]
    pub shutdown_grace: Duration,

    /// Enables adaptive admission at this period.
    #[serde(default, with = "humantime_serde")]
    pub adaptive_interval: Option<Duration>,

    /// Allowed relative drift of the p99 scrape interval (default: 0.05).
    #[serde(default = "default_adaptive_tolerance")]
    pub adaptive_tolerance: f64,

    #[serde(default)]
    pub query: QueryConfig,

    #[serde(default)]
    pub generator: GeneratorConfig,

    /// Periodic side-effect commands.
    #[serde(default)]
    pub commands: Vec<CommandConfig>,
}

impl RunConfig {
    /// Configuration with defaults for everything but the exporter mix.
    pub fn new(exporters: ExporterSpecList) -> Self {
        Self {
            exporters,
            first_port: DEFAULT_FIRST_PORT,
            host: default_host(),
            registration_dir: default_registration_dir(),
            scrape_interval: DEFAULT_SCRAPE_INTERVAL,
            test_duration: DEFAULT_TEST_DURATION,
            retention: None,
            max_delta_ratio: 0.0,
            max_query_retries: DEFAULT_MAX_QUERY_RETRIES,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            adaptive_interval: None,
            adaptive_tolerance: DEFAULT_ADAPTIVE_TOLERANCE,
            query: QueryConfig::default(),
            generator: GeneratorConfig::default(),
            commands: Vec::new(),
        }
    }

    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.exporters.is_empty() {
            return Err(ConfigError::invalid("exporters cannot be empty"));
        }
        if let Some(spec) = self.exporters.iter().find(|s| s.count == 0) {
            return Err(ConfigError::invalid(format!(
                "exporter '{}' must have a positive count",
                spec.kind
            )));
        }

        if self.host.trim().is_empty() {
            return Err(ConfigError::invalid("host cannot be empty"));
        }

        require_positive("scrape_interval", self.scrape_interval)?;
        require_positive("test_duration", self.test_duration)?;
        require_positive("retry_interval", self.retry_interval)?;
        if let Some(retention) = self.retention {
            require_positive("retention", retention)?;
        }
        if let Some(interval) = self.adaptive_interval {
            require_positive("adaptive_interval", interval)?;
        }

        if !self.max_delta_ratio.is_finite() || self.max_delta_ratio < 0.0 {
            return Err(ConfigError::invalid(format!(
                "max_delta_ratio must be a non-negative number, got {}",
                self.max_delta_ratio
            )));
        }
        if !(self.adaptive_tolerance > 0.0 && self.adaptive_tolerance < 1.0) {
            return Err(ConfigError::invalid(format!(
                "adaptive_tolerance must be between 0 and 1, got {}",
                self.adaptive_tolerance
            )));
        }

        if self.generator.metric_count == 0 || self.generator.label_count == 0 {
            return Err(ConfigError::invalid(
                "generator metric_count and label_count must be positive",
            ));
        }
        if self.generator.max_value == 0 {
            return Err(ConfigError::invalid("generator max_value must be positive"));
        }

        let url = self.query.resolved_url();
        url::Url::parse(&url).map_err(|e| {
            ConfigError::invalid(format!("invalid query URL '{}': {}", url, e))
        })?;
        require_positive("query timeout", self.query.timeout)?;

        let mut seen_names = HashSet::new();
        for command in &self.commands {
            if command.name.is_empty() {
                return Err(ConfigError::invalid("command name cannot be empty"));
            }
            if !seen_names.insert(&command.name) {
                return Err(ConfigError::invalid(format!(
                    "duplicate command name: '{}'",
                    command.name
                )));
            }
            command.validate().map_err(|e| {
                ConfigError::invalid(format!("command '{}': {}", command.name, e))
            })?;
        }

        Ok(())
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::new(ExporterSpecList::new(vec![ExporterSpec::new(
            GeneratorKind::Incrementing,
            1,
        )]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_yaml_uses_defaults() {
        let config: RunConfig = serde_yaml::from_str("exporters: \"inc:3,static:2\"").unwrap();
        assert_eq!(config.exporters.total(), 5);
        assert_eq!(config.first_port, DEFAULT_FIRST_PORT);
        assert_eq!(config.host, "localhost");
        assert_eq!(config.registration_dir, PathBuf::from("sd_configs"));
        assert_eq!(config.scrape_interval, DEFAULT_SCRAPE_INTERVAL);
        assert_eq!(config.test_duration, DEFAULT_TEST_DURATION);
        assert_eq!(config.retention, None);
        assert_eq!(config.max_delta_ratio, 0.0);
        assert_eq!(config.max_query_retries, 3);
        assert_eq!(config.retry_interval, Duration::from_secs(5));
        assert_eq!(config.shutdown_grace, Duration::from_secs(10));
        assert_eq!(config.adaptive_interval, None);
        assert_eq!(config.query, QueryConfig::default());
        assert_eq!(config.generator, GeneratorConfig::default());
        assert!(config.commands.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_full_yaml() {
        let yaml = r#"
exporters: "randcyclic:2,oscillate:1"
first_port: 20000
host: 127.0.0.1
registration_dir: /tmp/sd
scrape_interval: 5s
test_duration: 2m
retention: 15d
max_delta_ratio: 0.01
max_query_retries: 5
retry_interval: 2s
shutdown_grace: 3s
adaptive_interval: 30s
adaptive_tolerance: 0.1
query:
  url: http://prom:9090
  timeout: 4s
generator:
  metric_count: 10
  label_count: 20
  max_value: 50
  seed: 7
commands:
  - name: snapshot
    command: ["curl", "-XPOST", "http://prom:9090/api/v1/admin/tsdb/snapshot"]
    cron: "0 */5 * * * *"
"#;
        let config: RunConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.exporters.iter().map(|s| s.kind).collect::<Vec<_>>(),
            vec![GeneratorKind::RandomCyclic, GeneratorKind::Oscillating]
        );
        assert_eq!(config.test_duration, Duration::from_secs(120));
        assert_eq!(config.retention, Some(Duration::from_secs(15 * 86400)));
        assert_eq!(config.adaptive_interval, Some(Duration::from_secs(30)));
        assert_eq!(config.query.timeout, Duration::from_secs(4));
        assert_eq!(config.generator.seed, Some(7));
        assert_eq!(config.generator.factory().grid().len(), 200);
        assert_eq!(config.commands.len(), 1);
    }

    #[test]
    fn test_unknown_exporter_kind_fails_parse() {
        let result = serde_yaml::from_str::<RunConfig>("exporters: \"sine:1\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_rejects_zero_duration() {
        let mut config = RunConfig::default();
        config.test_duration = Duration::ZERO;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("test_duration"));
    }

    #[test]
    fn test_validation_rejects_negative_ratio() {
        let mut config = RunConfig::default();
        config.max_delta_ratio = -0.1;
        assert!(config.validate().is_err());
        config.max_delta_ratio = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_tolerance_out_of_range() {
        let mut config = RunConfig::default();
        config.adaptive_tolerance = 0.0;
        assert!(config.validate().is_err());
        config.adaptive_tolerance = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_empty_grid() {
        let mut config = RunConfig::default();
        config.generator.metric_count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_query_url() {
        let mut config = RunConfig::default();
        config.query.url = "not a url".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("invalid query URL"));
    }

    #[test]
    fn test_validation_rejects_duplicate_commands() {
        let mut config = RunConfig::default();
        let command = CommandConfig::new(
            "snapshot",
            vec!["true".to_string()],
            Duration::from_secs(30),
        );
        config.commands = vec![command.clone(), command];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate command name"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.yaml");
        std::fs::write(&path, "exporters: \"static:4\"\ntest_duration: 10s\n").unwrap();

        let config = RunConfig::load(&path).unwrap();
        assert_eq!(config.exporters.total(), 4);
        assert_eq!(config.test_duration, Duration::from_secs(10));
    }

    #[test]
    fn test_load_missing_file() {
        let result = RunConfig::load("/nonexistent/scrapebench.yaml");
        assert!(matches!(result, Err(ConfigError::IoError(_))));
    }
}
