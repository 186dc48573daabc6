use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use zoneminder_exporter::collector::Collector;
use zoneminder_exporter::config::Config;
use zoneminder_exporter::export::MetricsServer;
use zoneminder_exporter::zoneminder;

/// Prometheus exporter for ZoneMinder daemon, monitor, and event state.
#[derive(Parser)]
#[command(name = "zoneminder-exporter", about)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Address to listen on for the metrics endpoint (overrides config).
    #[arg(long)]
    listen_address: Option<String>,

    /// Path under which to expose metrics (overrides config).
    #[arg(long)]
    telemetry_path: Option<String>,

    /// Base URL of the ZoneMinder API (overrides config).
    #[arg(long)]
    api_url: Option<String>,

    /// Budget for a single collection cycle, e.g. "30s" (overrides config).
    #[arg(long, value_parser = humantime::parse_duration)]
    collect_timeout: Option<Duration>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print version information and exit.
    Version,
}

/// Build-time version info, injected via RUSTFLAGS or build.rs.
mod version {
    /// Release version string (set at build time).
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    /// Target OS.
    pub fn target_os() -> &'static str {
        std::env::consts::OS
    }

    /// Target architecture.
    pub fn target_arch() -> &'static str {
        std::env::consts::ARCH
    }

    /// Full version string with platform info.
    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            RELEASE,
            git_commit(),
            target_os(),
            target_arch(),
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle version subcommand before anything else.
    if let Some(Command::Version) = &cli.command {
        println!("zoneminder-exporter {}", version::full());
        return Ok(());
    }

    // Initialize tracing.
    let filter = EnvFilter::try_new(&cli.log_level)
        .with_context(|| format!("invalid log level: {}", cli.log_level))?;

    fmt().with_env_filter(filter).with_target(true).init();

    let mut cfg = match &cli.config {
        Some(path) => {
            Config::load(path).with_context(|| format!("loading config from {}", path.display()))?
        }
        None => Config::default(),
    };

    // CLI flags override file values.
    if let Some(listen_address) = cli.listen_address {
        cfg.web.listen_address = listen_address;
    }
    if let Some(telemetry_path) = cli.telemetry_path {
        cfg.web.telemetry_path = telemetry_path;
    }
    if let Some(api_url) = cli.api_url {
        cfg.zoneminder.api_url = api_url;
    }
    if let Some(collect_timeout) = cli.collect_timeout {
        cfg.zoneminder.collect_timeout = collect_timeout;
    }

    cfg.validate()?;

    tracing::info!(
        version = version::RELEASE,
        commit = version::git_commit(),
        "starting zoneminder-exporter",
    );

    // Build and run the tokio runtime.
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(async { run(cfg).await })
}

async fn run(cfg: Config) -> Result<()> {
    // Set up signal handling.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("received SIGINT, shutting down");
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, shutting down");
            }
        }

        let _ = shutdown_tx.send(());
    });

    let client = zoneminder::Client::new(&cfg.zoneminder).context("building API client")?;

    let collector = Collector::new(
        client,
        cfg.zoneminder.collect_timeout,
        cfg.zoneminder.event_lookback,
    )
    .context("building collector")?;

    let server = MetricsServer::new(&cfg.web, collector);

    // Failure to bind is fatal; scrape-time upstream failures are not.
    server.start().await?;

    // Wait for shutdown signal.
    let _ = shutdown_rx.await;

    // Graceful shutdown.
    server.stop().await?;

    tracing::info!("zoneminder-exporter stopped");

    Ok(())
}
