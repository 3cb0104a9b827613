//! Exporter instance: one generator behind one scrape endpoint.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use super::{ExporterError, Exposition, TargetRegistration};
use crate::generator::{GeneratorKind, MetricsGenerator};

/// Default grace period for draining in-flight scrapes on stop.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Path the backend scrapes.
pub const METRICS_PATH: &str = "/metrics";

/// Final sum reported by one instance when it stops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSum {
    /// Instance address as registered for discovery.
    pub instance: String,
    /// Generator sum captured after the endpoint stopped serving.
    pub sum: i64,
}

/// Lifecycle of an exporter instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Running,
    Draining,
    Stopped,
}

/// Generator plus everything a scrape touches, guarded by one lock.
struct ScrapeSlot {
    generator: Box<dyn MetricsGenerator>,
    exposition: Exposition,
    state: InstanceState,
}

type SharedSlot = Arc<Mutex<ScrapeSlot>>;

/// A running scrape endpoint bound to one generator.
pub struct ExporterInstance {
    address: String,
    kind: GeneratorKind,
    registration: Option<PathBuf>,
    slot: SharedSlot,
    shutdown: CancellationToken,
    server: JoinHandle<std::io::Result<()>>,
}

impl ExporterInstance {
    /// Bind `host:port`, publish a registration record, then start serving.
    ///
    /// Port 0 binds an ephemeral port; the registered address uses the port
    /// actually bound. When `registration_dir` is `None` no record is written.
    /// If the record cannot be written the listener is dropped before any
    /// scrape is served.
    pub async fn start(
        host: &str,
        port: u16,
        registration_dir: Option<&Path>,
        generator: Box<dyn MetricsGenerator>,
    ) -> Result<Self, ExporterError> {
        let kind = generator.kind();
        let exposition = Exposition::new(generator.grid())?;

        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|source| ExporterError::Bind {
                address: format!("{host}:{port}"),
                source,
            })?;
        let port = listener.local_addr()?.port();
        let address = format!("{host}:{port}");

        let registration = match registration_dir {
            Some(dir) => Some(
                TargetRegistration::new(&address, kind.as_ref())
                    .write(dir, port)
                    .await?,
            ),
            None => None,
        };

        let slot = Arc::new(Mutex::new(ScrapeSlot {
            generator,
            exposition,
            state: InstanceState::Running,
        }));
        let shutdown = CancellationToken::new();
        let router = create_router(Arc::clone(&slot));
        let signal = shutdown.clone().cancelled_owned();
        let server = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(signal)
                .await
        });

        tracing::info!(instance = %address, kind = %kind, "Exporter started");
        Ok(Self {
            address,
            kind,
            registration,
            slot,
            shutdown,
            server,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn kind(&self) -> GeneratorKind {
        self.kind
    }

    /// Path of the registration record, if one was written.
    pub fn registration(&self) -> Option<&Path> {
        self.registration.as_deref()
    }

    pub async fn state(&self) -> InstanceState {
        self.slot.lock().await.state
    }

    /// Stop serving and capture the final sum.
    ///
    /// In-flight scrapes get up to `grace` to finish; after that the server
    /// task is aborted. Either way the endpoint is marked stopped and the sum
    /// is read under the same lock, so it covers every completed collection
    /// and nothing after.
    pub async fn stop(self, grace: Duration) -> InstanceSum {
        self.slot.lock().await.state = InstanceState::Draining;
        self.shutdown.cancel();

        let mut server = self.server;
        match tokio::time::timeout(grace, &mut server).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => {
                tracing::warn!(instance = %self.address, error = %e, "Exporter server failed");
            }
            Ok(Err(e)) => {
                tracing::warn!(instance = %self.address, error = %e, "Exporter task failed");
            }
            Err(_) => {
                tracing::warn!(
                    instance = %self.address,
                    grace_ms = grace.as_millis(),
                    "Exporter drain timed out, aborting"
                );
                server.abort();
                let _ = server.await;
            }
        }

        let sum = {
            let mut slot = self.slot.lock().await;
            slot.state = InstanceState::Stopped;
            slot.generator.sum()
        };

        tracing::info!(instance = %self.address, sum, "Exporter stopped");
        InstanceSum {
            instance: self.address,
            sum,
        }
    }
}

impl std::fmt::Debug for ExporterInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExporterInstance")
            .field("address", &self.address)
            .field("kind", &self.kind)
            .field("registration", &self.registration)
            .finish_non_exhaustive()
    }
}

fn create_router(slot: SharedSlot) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route(METRICS_PATH, get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(slot)
}

async fn index_handler() -> Html<String> {
    Html(format!(
        "<html>\n<head><title>load exporter</title></head>\n<body>\n<h1>load exporter</h1>\n<p><a href=\"{METRICS_PATH}\">Metrics</a></p>\n</body>\n</html>\n"
    ))
}

/// One scrape: advance the generator and render its samples.
async fn metrics_handler(State(slot): State<SharedSlot>) -> Response {
    let mut slot = slot.lock().await;
    if slot.state == InstanceState::Stopped {
        return (StatusCode::SERVICE_UNAVAILABLE, "exporter stopped").into_response();
    }

    let samples = slot.generator.collect();
    match slot.exposition.render(&samples) {
        Ok(body) => (
            [(header::CONTENT_TYPE, slot.exposition.format_type())],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, cycle = slot.generator.cycle(), "Exposition render failed");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("Error: {}", e)).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::{IncrementingGenerator, SeriesGrid, StaticGenerator};
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_slot(generator: Box<dyn MetricsGenerator>) -> SharedSlot {
        let exposition = Exposition::new(generator.grid()).unwrap();
        Arc::new(Mutex::new(ScrapeSlot {
            generator,
            exposition,
            state: InstanceState::Running,
        }))
    }

    #[tokio::test]
    async fn test_metrics_endpoint_advances_generator() {
        let slot = test_slot(Box::new(IncrementingGenerator::new(SeriesGrid::new(2, 2))));
        let app = create_router(Arc::clone(&slot));

        let response = app
            .oneshot(
                Request::builder()
                    .uri(METRICS_PATH)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8_lossy(&bytes);
        assert!(body.contains(r#"test1{lab="1"} 1"#));
        assert_eq!(slot.lock().await.generator.cycle(), 1);
    }

    #[tokio::test]
    async fn test_stopped_slot_refuses_scrape() {
        let slot = test_slot(Box::new(StaticGenerator::new(SeriesGrid::new(1, 1))));
        slot.lock().await.state = InstanceState::Stopped;
        let app = create_router(Arc::clone(&slot));

        let response = app
            .oneshot(
                Request::builder()
                    .uri(METRICS_PATH)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(slot.lock().await.generator.cycle(), 0);
    }

    #[tokio::test]
    async fn test_index_links_metrics() {
        let slot = test_slot(Box::new(StaticGenerator::new(SeriesGrid::new(1, 1))));
        let response = create_router(slot)
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("/metrics"));
    }

    #[tokio::test]
    async fn test_stop_without_scrapes_reports_zero() {
        let dir = tempfile::tempdir().unwrap();
        let generator = Box::new(IncrementingGenerator::new(SeriesGrid::new(100, 100)));
        let instance = ExporterInstance::start("127.0.0.1", 0, Some(dir.path()), generator)
            .await
            .unwrap();

        assert_eq!(instance.state().await, InstanceState::Running);
        assert!(instance.registration().unwrap().exists());
        let address = instance.address().to_string();

        let result = instance.stop(Duration::from_secs(1)).await;
        assert_eq!(result.instance, address);
        assert_eq!(result.sum, 0);
    }

    #[tokio::test]
    async fn test_stop_past_grace_aborts_and_keeps_completed_sum() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let generator = Box::new(IncrementingGenerator::new(SeriesGrid::new(2, 2)));
        let instance = ExporterInstance::start("127.0.0.1", 0, None, generator)
            .await
            .unwrap();

        let client = reqwest::Client::new();
        let url = format!("http://{}{}", instance.address(), METRICS_PATH);
        for _ in 0..2 {
            let resp = client.get(&url).send().await.unwrap();
            assert_eq!(resp.status(), 200);
            resp.text().await.unwrap();
        }

        // A half-sent request keeps its connection busy through graceful shutdown.
        let mut stream = tokio::net::TcpStream::connect(instance.address())
            .await
            .unwrap();
        stream
            .write_all(b"GET /metrics HTTP/1.1\r\nHost: localhost\r\n")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = tokio::time::Instant::now();
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            instance.stop(Duration::from_millis(50)),
        )
        .await
        .expect("stop must not wait on the stalled connection");
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(result.sum, 2 * 2 * (1 + 2));

        // Finishing the request now is refused without advancing the generator.
        stream.write_all(b"\r\n").await.unwrap();
        let mut response = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
            .await
            .unwrap()
            .unwrap();
        assert!(String::from_utf8_lossy(&response).starts_with("HTTP/1.1 503"));
    }

    #[tokio::test]
    async fn test_registration_failure_leaves_nothing_listening() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();

        // Reserve a port, release it, then try to start an exporter on it.
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let generator = Box::new(StaticGenerator::new(SeriesGrid::new(1, 1)));
        let result = ExporterInstance::start("127.0.0.1", port, Some(&blocker), generator).await;
        assert!(matches!(result, Err(ExporterError::Registration { .. })));

        // Port is free again.
        assert!(std::net::TcpListener::bind(("127.0.0.1", port)).is_ok());
    }
}
