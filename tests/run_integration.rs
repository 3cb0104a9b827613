//! End-to-end tests for scrapebench runs.
//!
//! Exporters run on real listeners. A small in-process backend discovers them
//! through the file-SD directory, scrapes them over HTTP and answers instant
//! queries with what it ingested.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{Router, extract::Query, extract::State, routing::get};
use scrapebench::{
    PrometheusClient, RunConfig, RunState, Verifier,
    exporter::{ExporterInstance, METRICS_PATH},
    generator::{GeneratorKind, IncrementingGenerator, SeriesGrid},
    verifier::RunResult,
};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Test Helpers
// =============================================================================

/// Per-instance totals ingested by the fake backend.
type Ingested = Arc<Mutex<HashMap<String, f64>>>;

/// Sum every sample value in a text-format scrape body.
fn sum_exposition(body: &str) -> f64 {
    body.lines()
        .filter(|line| !line.starts_with('#') && !line.trim().is_empty())
        .filter_map(|line| line.split_whitespace().last()?.parse::<f64>().ok())
        .sum()
}

/// Read every target address announced in `dir`.
fn discover_targets(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
        .filter_map(|e| std::fs::read_to_string(e.path()).ok())
        .filter_map(|content| serde_json::from_str::<Value>(&content).ok())
        .flat_map(|groups| {
            groups
                .as_array()
                .into_iter()
                .flatten()
                .flat_map(|g| g["targets"].as_array().cloned().unwrap_or_default())
                .filter_map(|t| t.as_str().map(str::to_string))
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Scrape every discovered target every `interval` until cancelled.
fn spawn_scraper(
    dir: PathBuf,
    interval: Duration,
    ingested: Ingested,
    token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let client = reqwest::Client::new();
        loop {
            for target in discover_targets(&dir) {
                let url = format!("http://{target}{METRICS_PATH}");
                let Ok(resp) = client.get(&url).send().await else {
                    continue;
                };
                if !resp.status().is_success() {
                    continue;
                }
                let Ok(body) = resp.text().await else {
                    continue;
                };
                *ingested.lock().unwrap().entry(target).or_default() += sum_exposition(&body);
            }
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    })
}

/// Query endpoint answering per-instance totals from `ingested`.
async fn query_handler(
    State(ingested): State<Ingested>,
    Query(params): Query<HashMap<String, String>>,
) -> axum::Json<Value> {
    let instance = regex::Regex::new(r#"instance="([^"]+)""#)
        .unwrap()
        .captures(&params["query"])
        .map(|c| c[1].to_string());

    let value = instance.and_then(|i| ingested.lock().unwrap().get(&i).copied());
    let result = match value {
        Some(v) => json!([{ "metric": {}, "value": [0.0, v.to_string()] }]),
        None => json!([]),
    };
    axum::Json(json!({
        "status": "success",
        "data": { "resultType": "vector", "result": result }
    }))
}

/// Start the fake backend's query API and return its base URL.
async fn start_query_backend(ingested: Ingested) -> String {
    let router = Router::new()
        .route("/api/v1/query", get(query_handler))
        .with_state(ingested);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let addr = listener.local_addr().expect("Failed to get local addr");

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    format!("http://{}", addr)
}

fn test_config(dir: &Path, exporters: &str) -> RunConfig {
    let mut config = RunConfig::new(exporters.parse().unwrap());
    config.first_port = 0;
    config.host = "127.0.0.1".to_string();
    config.registration_dir = dir.to_path_buf();
    config.test_duration = Duration::from_millis(800);
    config.max_query_retries = 5;
    config.retry_interval = Duration::from_millis(100);
    config.shutdown_grace = Duration::from_secs(2);
    config.generator.metric_count = 5;
    config.generator.label_count = 4;
    config.generator.max_value = 1000;
    config.generator.seed = Some(11);
    config
}

async fn run_against(config: RunConfig, base_url: &str) -> (RunResult, Verifier) {
    let client = PrometheusClient::new(base_url, Duration::from_secs(5)).unwrap();
    let verifier = Verifier::new(config, Arc::new(client));
    let result = verifier.run(CancellationToken::new()).await.unwrap();
    (result, verifier)
}

// =============================================================================
// Exporter Tests
// =============================================================================

#[tokio::test]
async fn test_exporter_serves_and_reports_exact_sum() {
    let dir = tempfile::tempdir().unwrap();
    let generator = Box::new(IncrementingGenerator::new(SeriesGrid::new(100, 100)));
    let instance = ExporterInstance::start("127.0.0.1", 0, Some(dir.path()), generator)
        .await
        .unwrap();
    assert_eq!(instance.kind(), GeneratorKind::Incrementing);

    let registration: Value =
        serde_json::from_str(&std::fs::read_to_string(instance.registration().unwrap()).unwrap())
            .unwrap();
    assert_eq!(registration[0]["targets"][0], instance.address());
    assert_eq!(registration[0]["labels"]["job"], "inc");

    let client = reqwest::Client::new();
    let url = format!("http://{}{}", instance.address(), METRICS_PATH);
    let mut last_body = String::new();
    for _ in 0..5 {
        let resp = client.get(&url).send().await.unwrap();
        assert_eq!(resp.status(), 200);
        let content_type = resp.headers()["content-type"].to_str().unwrap().to_string();
        assert!(content_type.starts_with("text/plain"));
        last_body = resp.text().await.unwrap();
    }
    assert!(last_body.contains(r#"test0{lab="0"} 5"#));
    assert!(last_body.contains(r#"test99{lab="99"} 5"#));
    assert_eq!(sum_exposition(&last_body), 50_000.0);

    let result = instance.stop(Duration::from_secs(2)).await;
    assert_eq!(result.sum, 150_000);

    // Nothing is served after stop.
    assert!(client.get(&url).send().await.is_err());
}

// =============================================================================
// Full Run Tests
// =============================================================================

#[tokio::test]
async fn test_run_against_faithful_backend_has_zero_delta() {
    let dir = tempfile::tempdir().unwrap();
    let ingested = Ingested::default();
    let base_url = start_query_backend(Arc::clone(&ingested)).await;

    let token = CancellationToken::new();
    let scraper = spawn_scraper(
        dir.path().to_path_buf(),
        Duration::from_millis(50),
        Arc::clone(&ingested),
        token.clone(),
    );

    let config = test_config(dir.path(), "inc:2,static:1,randcyclic:1,oscillate:1");
    let (result, verifier) = run_against(config, &base_url).await;
    token.cancel();
    scraper.await.unwrap();

    assert_eq!(verifier.state(), RunState::Done);
    assert_eq!(result.instances.len(), 5);
    assert!(result.expected_total > 0, "backend never scraped");
    assert_eq!(result.total_abs_delta, 0);
    assert!(!result.cancelled);
    assert!(result.all_within_tolerance());
}

#[tokio::test]
async fn test_run_against_empty_backend_reports_full_delta() {
    let dir = tempfile::tempdir().unwrap();
    let scraped = Ingested::default();
    let empty = Ingested::default();
    let base_url = start_query_backend(Arc::clone(&empty)).await;

    // Scrapes happen, but the backend answers queries from an empty store.
    let token = CancellationToken::new();
    let scraper = spawn_scraper(
        dir.path().to_path_buf(),
        Duration::from_millis(50),
        scraped,
        token.clone(),
    );

    let mut config = test_config(dir.path(), "inc:1,static:1");
    config.max_query_retries = 2;
    config.retry_interval = Duration::from_millis(20);
    let (result, _) = run_against(config, &base_url).await;
    token.cancel();
    scraper.await.unwrap();

    assert!(result.expected_total > 0);
    assert_eq!(result.total_abs_delta, result.expected_total as u64);
    assert_eq!(result.failed_instances(), 2);
    assert!(result.instances.iter().all(|o| o.attempts == 3 && o.actual.is_none()));
}

#[tokio::test]
async fn test_run_report_serializes() {
    let dir = tempfile::tempdir().unwrap();
    let base_url = start_query_backend(Ingested::default()).await;

    let mut config = test_config(dir.path(), "static:1");
    config.test_duration = Duration::from_millis(100);
    config.max_query_retries = 0;
    let (result, _) = run_against(config, &base_url).await;

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["expected_total"], 0);
    assert_eq!(json["instances"].as_array().unwrap().len(), 1);
    assert!(json["elapsed"].is_string());

    let back: RunResult = serde_json::from_value(json).unwrap();
    assert_eq!(back.instances, result.instances);
}
