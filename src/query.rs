//! Query client for the monitoring backend.
//!
//! The backend is consumed through one instant-query endpoint,
//! `GET <base>/api/v1/query?query=<expr>&time=<ts>`, answering with the
//! Prometheus HTTP API envelope. Only vector results are accepted.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

/// Path of the instant-query endpoint relative to the base URL.
pub const QUERY_PATH: &str = "api/v1/query";

/// Errors that can occur while querying the backend.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Transport failure, including request timeout.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status without an API error body.
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    /// The API answered with `status: "error"`.
    #[error("query failed ({error_type}): {message}")]
    Api { error_type: String, message: String },

    /// Response body did not match the API envelope.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Result was not an instant vector.
    #[error("unexpected result type '{0}', expected vector")]
    UnexpectedResultType(String),

    /// Base URL is invalid.
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// One element of an instant-vector result.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorSample {
    pub metric: BTreeMap<String, String>,
    pub timestamp: f64,
    pub value: f64,
}

/// Instant-query access to the backend.
#[async_trait]
pub trait QueryApi: Send + Sync {
    /// Evaluate `expr` at `at`. An empty vector means "no data".
    async fn query(&self, expr: &str, at: DateTime<Utc>) -> Result<Vec<VectorSample>, QueryError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    status: String,
    #[serde(default)]
    data: Option<ApiData>,
    #[serde(default)]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiData {
    result_type: String,
    result: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RawVectorSample {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    value: (f64, String),
}

impl TryFrom<RawVectorSample> for VectorSample {
    type Error = QueryError;

    fn try_from(raw: RawVectorSample) -> Result<Self, Self::Error> {
        let (timestamp, value) = raw.value;
        let value = value
            .parse::<f64>()
            .map_err(|_| QueryError::Malformed(format!("sample value '{value}' is not a number")))?;
        Ok(Self {
            metric: raw.metric,
            timestamp,
            value,
        })
    }
}

/// Decode a query response body into vector samples.
pub fn parse_vector_response(body: &str) -> Result<Vec<VectorSample>, QueryError> {
    let response: ApiResponse =
        serde_json::from_str(body).map_err(|e| QueryError::Malformed(e.to_string()))?;

    if response.status != "success" {
        return Err(QueryError::Api {
            error_type: response.error_type.unwrap_or_else(|| "unknown".to_string()),
            message: response.error.unwrap_or_default(),
        });
    }

    let data = response
        .data
        .ok_or_else(|| QueryError::Malformed("missing data".to_string()))?;
    if data.result_type != "vector" {
        return Err(QueryError::UnexpectedResultType(data.result_type));
    }

    let raw: Vec<RawVectorSample> =
        serde_json::from_value(data.result).map_err(|e| QueryError::Malformed(e.to_string()))?;
    raw.into_iter().map(VectorSample::try_from).collect()
}

/// HTTP client for a Prometheus-compatible query API.
#[derive(Debug, Clone)]
pub struct PrometheusClient {
    endpoint: url::Url,
    client: Client,
}

impl PrometheusClient {
    /// Create a client for `base_url` with a per-request `timeout`.
    ///
    /// # Errors
    /// Returns `QueryError::InvalidUrl` for an unparsable base URL, or
    /// `QueryError::Http` if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, QueryError> {
        let mut base = url::Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let endpoint = base.join(QUERY_PATH)?;

        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { endpoint, client })
    }

    pub fn endpoint(&self) -> &url::Url {
        &self.endpoint
    }
}

#[async_trait]
impl QueryApi for PrometheusClient {
    async fn query(&self, expr: &str, at: DateTime<Utc>) -> Result<Vec<VectorSample>, QueryError> {
        let time = format_timestamp(at);
        tracing::debug!(query = %expr, time = %time, "Querying backend");

        let response = self
            .client
            .get(self.endpoint.clone())
            .query(&[("query", expr), ("time", time.as_str())])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            // The API reports query errors with 4xx/5xx plus an error envelope.
            return match parse_vector_response(&body) {
                Err(e @ QueryError::Api { .. }) => Err(e),
                _ => Err(QueryError::Status {
                    status: status.as_u16(),
                    body,
                }),
            };
        }

        parse_vector_response(&body)
    }
}

/// Unix seconds with millisecond precision, as the query API expects.
fn format_timestamp(at: DateTime<Utc>) -> String {
    format!("{:.3}", at.timestamp_millis() as f64 / 1000.0)
}

/// Format a duration the way the backend prints scrape intervals (`1s`, `1m30s`).
pub fn format_interval(d: Duration) -> String {
    humantime::format_duration(d).to_string().replace(' ', "")
}

/// Total of every generated series for one instance over the last `range_secs`.
///
/// ```
/// use scrapebench::query::instance_sum_query;
///
/// assert_eq!(
///     instance_sum_query("localhost:10000", 61),
///     r#"sum(sum_over_time({__name__=~"test.+",instance="localhost:10000"}[61s]))"#
/// );
/// ```
pub fn instance_sum_query(instance: &str, range_secs: u64) -> String {
    format!(
        r#"sum(sum_over_time({{__name__=~"test.+",instance="{instance}"}}[{range_secs}s]))"#
    )
}

/// 99th percentile of the backend's observed scrape interval.
pub fn scrape_interval_p99_query(scrape_interval: Duration) -> String {
    format!(
        r#"prometheus_target_interval_length_seconds{{interval="{}",quantile="0.99"}}"#,
        format_interval(scrape_interval)
    )
}

/// Value of the first sample, if any.
pub fn first_value(samples: &[VectorSample]) -> Option<f64> {
    samples.first().map(|s| s.value)
}
