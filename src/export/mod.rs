use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::collector::{self, CollectSummary, Collector, Observation};
use crate::config::WebConfig;
use crate::zoneminder::ZmClient;

/// HTTP server exposing the scrape endpoint.
///
/// Every request to the telemetry path runs one full collection cycle and
/// renders its observations into a fresh registry; nothing is cached
/// between scrapes.
pub struct MetricsServer<C> {
    listen_address: String,
    state: Arc<AppState<C>>,
    shutdown: parking_lot::Mutex<Option<CancellationToken>>,
}

/// Shared state for axum handlers.
struct AppState<C> {
    collector: Collector<C>,
    telemetry_path: String,
}

impl<C: ZmClient + 'static> MetricsServer<C> {
    /// Create a server for the given listener configuration and collector.
    pub fn new(cfg: &WebConfig, collector: Collector<C>) -> Self {
        Self {
            listen_address: cfg.listen_address.clone(),
            state: Arc::new(AppState {
                collector,
                telemetry_path: cfg.telemetry_path.clone(),
            }),
            shutdown: parking_lot::Mutex::new(None),
        }
    }

    /// Bind the listener and start serving scrapes.
    ///
    /// A bind failure is the one fatal error in the exporter; everything
    /// upstream degrades per scrape instead.
    pub async fn start(&self) -> Result<()> {
        let bind_addr = bind_address(&self.listen_address);

        let app = Router::new()
            .route("/", get(landing_handler::<C>))
            .route(&self.state.telemetry_path, get(metrics_handler::<C>))
            .with_state(self.state.clone());

        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("listening on {bind_addr}"))?;

        let local_addr = listener.local_addr().context("getting local address")?;

        let cancel = CancellationToken::new();
        *self.shutdown.lock() = Some(cancel.clone());

        tokio::spawn(async move {
            info!(addr = %local_addr, "metrics server started");

            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    cancel.cancelled().await;
                })
                .await;

            if let Err(e) = result {
                error!(error = %e, "metrics server error");
            }
        });

        Ok(())
    }

    /// Gracefully shut down the server.
    pub async fn stop(&self) -> Result<()> {
        if let Some(cancel) = self.shutdown.lock().take() {
            cancel.cancel();
        }

        Ok(())
    }
}

/// Expand the ":port" listen shorthand to an address on all interfaces.
fn bind_address(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    }
}

/// GET on the telemetry path: run one collection cycle and render it.
async fn metrics_handler<C: ZmClient + 'static>(
    State(state): State<Arc<AppState<C>>>,
) -> impl IntoResponse {
    let started = Instant::now();

    let mut observations: Vec<Observation> = Vec::new();
    let summary = state.collector.collect_into(&mut observations).await;

    debug!(
        observations = observations.len(),
        family_errors = summary.family_errors,
        "scrape complete",
    );

    match render(&observations, summary, started.elapsed()) {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => {
            error!(error = %e, "rendering metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "encoding error".to_string(),
            )
        }
    }
}

/// GET / - landing page linking to the telemetry path.
async fn landing_handler<C: ZmClient + 'static>(
    State(state): State<Arc<AppState<C>>>,
) -> Html<String> {
    Html(format!(
        "<html>\
         <head><title>ZoneMinder Exporter</title></head>\
         <body><h1>ZoneMinder Exporter</h1>\
         <p><a href=\"{}\">Metrics</a></p></body>\
         </html>",
        state.telemetry_path,
    ))
}

/// Render one scrape's observations in the Prometheus text format.
///
/// Families without observations are left unregistered so idle monitors
/// surface as absent series, not zeros.
fn render(
    observations: &[Observation],
    summary: CollectSummary,
    elapsed: Duration,
) -> Result<String> {
    let registry = Registry::new();

    let present: HashSet<&str> = observations.iter().map(|o| o.name).collect();
    let mut families: HashMap<&'static str, GaugeVec> = HashMap::new();

    for desc in collector::DESCRIPTORS {
        if !present.contains(desc.name) {
            continue;
        }

        let gauge = GaugeVec::new(
            Opts::new(desc.name, desc.help).namespace(collector::NAMESPACE),
            desc.labels,
        )
        .with_context(|| format!("building gauge {}", desc.name))?;

        registry
            .register(Box::new(gauge.clone()))
            .with_context(|| format!("registering gauge {}", desc.name))?;

        families.insert(desc.name, gauge);
    }

    for desc in collector::DESCRIPTORS {
        let Some(gauge) = families.get(desc.name) else {
            continue;
        };

        for obs in observations.iter().filter(|o| o.name == desc.name) {
            // Label values aligned to the descriptor's label order.
            let values: Vec<&str> = desc
                .labels
                .iter()
                .map(|label| {
                    obs.labels
                        .iter()
                        .find(|(name, _)| name == label)
                        .map(|(_, value)| value.as_str())
                        .unwrap_or("")
                })
                .collect();

            gauge.with_label_values(&values).set(obs.value);
        }
    }

    let scrape_duration = Gauge::with_opts(
        Opts::new(
            "scrape_duration_seconds",
            "Wall-clock duration of the last collection cycle.",
        )
        .namespace(collector::NAMESPACE),
    )
    .context("building scrape duration gauge")?;
    scrape_duration.set(elapsed.as_secs_f64());
    registry
        .register(Box::new(scrape_duration))
        .context("registering scrape duration gauge")?;

    let family_errors = Gauge::with_opts(
        Opts::new(
            "scrape_family_errors",
            "Resource families that produced no data in the last collection cycle.",
        )
        .namespace(collector::NAMESPACE),
    )
    .context("building family errors gauge")?;
    family_errors.set(summary.family_errors as f64);
    registry
        .register(Box::new(family_errors))
        .context("registering family errors gauge")?;

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&registry.gather(), &mut buffer)
        .context("encoding metrics")?;

    String::from_utf8(buffer).context("converting metrics to string")
}
