//! Configuration validation utilities.

use std::time::Duration;

use thiserror::Error;

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse YAML configuration.
    #[error("failed to parse YAML config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// Configuration validation failed.
    #[error("config validation error: {0}")]
    ValidationError(String),
}

impl ConfigError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }
}

/// Parse a humantime duration string such as `30s`, `1m30s` or `15d`.
///
/// Zero durations are accepted here; callers decide whether zero is valid.
///
/// ```
/// use scrapebench::config::parse_duration;
///
/// assert_eq!(parse_duration("1s").unwrap().as_secs(), 1);
/// assert_eq!(parse_duration("2m").unwrap().as_secs(), 120);
/// assert_eq!(parse_duration("500ms").unwrap().as_millis(), 500);
/// ```
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("duration string is empty".to_string());
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Reject a zero duration for the named field.
pub(crate) fn require_positive(field: &str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::invalid(format!("{field} must be positive")));
    }
    Ok(())
}

/// Expand `${VAR}` and `${VAR:-default}` references from the environment.
///
/// Unset variables without a default expand to the empty string.
pub fn expand_env_vars(input: &str) -> String {
    static ENV_VAR_REGEX: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();

    let regex = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("failed to compile env var regex")
    });

    regex
        .replace_all(input, |caps: &regex::Captures| {
            let default_value = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(&caps[1]).unwrap_or_else(|_| default_value.to_string())
        })
        .into_owned()
}
