//! scrapebench Binary Entry Point
//!
//! `run` performs a full verification run against a backend; `serve` runs a
//! single standalone exporter and prints its final sum on shutdown.
//! Core functionality is provided by the `scrapebench` library crate.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use scrapebench::{
    config::{ExporterSpecList, RunConfig, parse_duration},
    exporter::{DEFAULT_SHUTDOWN_GRACE, ExporterInstance},
    generator::{
        DEFAULT_LABEL_COUNT, DEFAULT_MAX_VALUE, DEFAULT_METRIC_COUNT, GeneratorFactory,
        GeneratorKind, SeriesGrid,
    },
    query::PrometheusClient,
    verifier::{RunResult, Verifier},
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// scrapebench - Ingestion Correctness Benchmark
#[derive(Parser, Debug)]
#[command(name = "scrapebench", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve synthetic exporters, then verify what the backend recorded
    Run(RunArgs),
    /// Serve one standalone exporter until interrupted
    Serve(ServeArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Path to configuration file
    #[arg(short, long, env = "SCRAPEBENCH_CONFIG")]
    config: Option<PathBuf>,

    /// Exporter mix, e.g. "inc:3,static:2" (overrides config file)
    #[arg(long, env = "SCRAPEBENCH_EXPORTERS")]
    exporters: Option<ExporterSpecList>,

    /// First exporter port (overrides config file)
    #[arg(long, env = "SCRAPEBENCH_FIRST_PORT")]
    first_port: Option<u16>,

    /// Test duration, e.g. "5m" (overrides config file)
    #[arg(long, env = "SCRAPEBENCH_TEST_DURATION", value_parser = parse_duration)]
    test_duration: Option<Duration>,

    /// Query backend base URL (overrides config file)
    #[arg(long, env = "SCRAPEBENCH_QUERY_URL")]
    query_url: Option<String>,

    /// Write the JSON run result here
    #[arg(long)]
    report: Option<PathBuf>,

    /// Exit non-zero when the total absolute delta exceeds this
    #[arg(long)]
    max_total_delta: Option<u64>,
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Listen address as host:port
    #[arg(long, default_value = "localhost:10000", env = "SCRAPEBENCH_LISTEN")]
    listen: String,

    /// Generator kind
    #[arg(long, default_value = "inc")]
    kind: GeneratorKind,

    #[arg(long, default_value_t = DEFAULT_METRIC_COUNT)]
    metric_count: u32,

    #[arg(long, default_value_t = DEFAULT_LABEL_COUNT)]
    label_count: u32,

    /// Exclusive upper bound for random-cyclic values
    #[arg(long, default_value_t = DEFAULT_MAX_VALUE)]
    max_value: u32,

    /// File-SD directory to announce the exporter in
    #[arg(long)]
    registration_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,scrapebench=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run(args).await,
        Command::Serve(args) => serve(args).await,
    }
}

async fn run(args: RunArgs) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            RunConfig::load(path)?
        }
        None => RunConfig::default(),
    };

    // Apply CLI/env overrides (CLI > ENV > config file)
    if let Some(exporters) = args.exporters {
        config.exporters = exporters;
    }
    if let Some(port) = args.first_port {
        config.first_port = port;
    }
    if let Some(duration) = args.test_duration {
        config.test_duration = duration;
    }
    if let Some(url) = args.query_url {
        config.query.url = url;
    }
    config.validate()?;

    tracing::info!(
        exporters = %config.exporters,
        first_port = config.first_port,
        test_duration = ?config.test_duration,
        query_url = %config.query.url,
        "Starting verification run"
    );

    let client = PrometheusClient::new(&config.query.resolved_url(), config.query.timeout)?;
    let verifier = Verifier::new(config, Arc::new(client));

    // First signal cuts the run short, a second one exits immediately.
    let token = CancellationToken::new();
    tokio::spawn({
        let token = token.clone();
        async move {
            shutdown_signal().await;
            token.cancel();
            shutdown_signal().await;
            tracing::warn!("Second shutdown signal, exiting");
            std::process::exit(130);
        }
    });

    let result = verifier.run(token).await?;

    if let Some(path) = &args.report {
        write_report(path, &result).await?;
        tracing::info!("Report written to: {}", path.display());
    }

    if result.cancelled {
        tracing::warn!("Run was cancelled; verification is incomplete");
    }

    if let Some(max) = args.max_total_delta
        && result.total_abs_delta > max
    {
        tracing::error!(
            total_abs_delta = result.total_abs_delta,
            max_total_delta = max,
            "Total delta exceeds maximum"
        );
        return Ok(ExitCode::FAILURE);
    }

    if result.total_abs_delta != 0 {
        tracing::warn!(
            total_abs_delta = result.total_abs_delta,
            failed = result.failed_instances(),
            "Backend totals differ from served totals"
        );
    }
    Ok(ExitCode::SUCCESS)
}

async fn serve(args: ServeArgs) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let (host, port) = args
        .listen
        .rsplit_once(':')
        .ok_or_else(|| format!("listen address '{}' must be host:port", args.listen))?;
    let port: u16 = port.parse()?;

    let factory = GeneratorFactory::new(
        SeriesGrid::new(args.metric_count, args.label_count),
        args.max_value,
        None,
    );
    let generator = factory.build(args.kind)?;
    let instance =
        ExporterInstance::start(host, port, args.registration_dir.as_deref(), generator).await?;

    tracing::info!("Exporter listening on: http://{}", instance.address());
    tracing::info!("Press Ctrl+C to shutdown");

    shutdown_signal().await;
    let sum = instance.stop(DEFAULT_SHUTDOWN_GRACE).await;
    println!("{}", sum.sum);
    Ok(ExitCode::SUCCESS)
}

async fn write_report(path: &Path, result: &RunResult) -> Result<(), Box<dyn std::error::Error>> {
    let json = serde_json::to_vec_pretty(result)?;
    tokio::fs::write(path, json).await?;
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }
}
