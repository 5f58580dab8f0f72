//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Metrics collection and export utilities."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::{
    Encoder, GaugeVec, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec,
    IntGauge, IntGaugeVec, Opts, Registry, TextEncoder,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across the workspace.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Router serving the registry in text exposition format at `/metrics`.
pub fn exporter_router(registry: SharedRegistry) -> Router {
    Router::new()
        .route("/metrics", get(render_registry))
        .with_state(registry)
}

/// Bind `addr` and serve [`exporter_router`] until [`MetricsServer::shutdown`].
pub async fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind metrics listener {addr}"))?;
    let bound = listener
        .local_addr()
        .context("failed to read metrics listener address")?;
    info!(address = %bound, "metrics exporter listening");

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let app = exporter_router(registry);
    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                stop_rx.await.ok();
            })
            .await
            .context("metrics exporter stopped with an error")
    });

    Ok(MetricsServer {
        addr: bound,
        stop: Some(stop_tx),
        task,
    })
}

async fn render_registry(State(registry): State<SharedRegistry>) -> Response {
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&registry.gather()) {
        Ok(body) => ([(header::CONTENT_TYPE, encoder.format_type())], body).into_response(),
        Err(err) => {
            error!(error = %err, "metrics encoding failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding error").into_response()
        }
    }
}

/// Running `/metrics` exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections and wait for in-flight scrapes to finish.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.task.await.context("metrics exporter task panicked")?
    }
}

/// Metrics recorded by the daemon process itself.
#[derive(Clone)]
pub struct DaemonMetrics {
    starts_total: IntCounter,
    config_load_seconds: Histogram,
    build_info: GaugeVec,
}

impl DaemonMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let starts_total = IntCounter::with_opts(Opts::new(
            "indevoltd_starts_total",
            "Total number of times the polling daemon has initialised",
        ))?;
        registry.register(Box::new(starts_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.001, 2.0, 12)
            .context("failed to construct histogram buckets")?;
        let config_load_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "indevoltd_config_load_seconds",
                "Time spent loading and validating configuration",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(config_load_seconds.clone()))?;

        let build_info = GaugeVec::new(
            Opts::new(
                "indevoltd_build_info",
                "Build metadata for the running daemon binary",
            ),
            &["version"],
        )?;
        registry.register(Box::new(build_info.clone()))?;

        Ok(Self {
            starts_total,
            config_load_seconds,
            build_info,
        })
    }

    pub fn inc_start(&self) {
        self.starts_total.inc();
    }

    pub fn observe_config_load(&self, seconds: f64) {
        self.config_load_seconds.observe(seconds);
    }

    pub fn set_build_info(&self, version: &str) {
        self.build_info.with_label_values(&[version]).set(1.0);
    }
}

/// Outcome label attached to `indevolt_fetches_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Success,
    Timeout,
    NetworkError,
    ProtocolError,
}

impl FetchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchOutcome::Success => "success",
            FetchOutcome::Timeout => "timeout",
            FetchOutcome::NetworkError => "network_error",
            FetchOutcome::ProtocolError => "protocol_error",
        }
    }
}

/// Per-connection poll instrumentation shared by every coordinator.
#[derive(Clone, Debug)]
pub struct PollMetrics {
    connections_active: IntGauge,
    fetches: IntCounterVec,
    consecutive_failures: IntGaugeVec,
    fetch_seconds: HistogramVec,
    snapshot_registers: IntGaugeVec,
    last_success: GaugeVec,
    skipped_ticks: IntCounter,
}

impl PollMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let connections_active = IntGauge::with_opts(Opts::new(
            "indevolt_connections_active",
            "Number of device connections with an active coordinator",
        ))?;
        registry.register(Box::new(connections_active.clone()))?;

        let fetches = IntCounterVec::new(
            Opts::new(
                "indevolt_fetches_total",
                "Device fetch attempts by connection and outcome",
            ),
            &["connection", "outcome"],
        )?;
        registry.register(Box::new(fetches.clone()))?;

        let consecutive_failures = IntGaugeVec::new(
            Opts::new(
                "indevolt_consecutive_failures",
                "Current failure streak per connection",
            ),
            &["connection"],
        )?;
        registry.register(Box::new(consecutive_failures.clone()))?;

        let buckets = prometheus::exponential_buckets(0.01, 2.0, 14)
            .context("failed to construct histogram buckets")?;
        let fetch_seconds = HistogramVec::new(
            HistogramOpts::new(
                "indevolt_fetch_seconds",
                "Wall-clock duration of device RPC fetches",
            )
            .buckets(buckets),
            &["connection"],
        )?;
        registry.register(Box::new(fetch_seconds.clone()))?;

        let snapshot_registers = IntGaugeVec::new(
            Opts::new(
                "indevolt_snapshot_registers",
                "Number of registers present in the current snapshot",
            ),
            &["connection"],
        )?;
        registry.register(Box::new(snapshot_registers.clone()))?;

        let last_success = GaugeVec::new(
            Opts::new(
                "indevolt_last_success_timestamp_seconds",
                "Unix time of the last successful fetch",
            ),
            &["connection"],
        )?;
        registry.register(Box::new(last_success.clone()))?;

        let skipped_ticks = IntCounter::with_opts(Opts::new(
            "indevolt_skipped_ticks_total",
            "Ticks skipped because a previous fetch was still in flight",
        ))?;
        registry.register(Box::new(skipped_ticks.clone()))?;

        Ok(Self {
            connections_active,
            fetches,
            consecutive_failures,
            fetch_seconds,
            snapshot_registers,
            last_success,
            skipped_ticks,
        })
    }

    pub fn connection_started(&self) {
        self.connections_active.inc();
    }

    pub fn connection_stopped(&self, connection: &str) {
        self.connections_active.dec();
        let _ = self.consecutive_failures.remove_label_values(&[connection]);
    }

    pub fn record_fetch(&self, connection: &str, outcome: FetchOutcome, seconds: f64) {
        self.fetches
            .with_label_values(&[connection, outcome.as_str()])
            .inc();
        self.fetch_seconds
            .with_label_values(&[connection])
            .observe(seconds);
    }

    pub fn record_snapshot(&self, connection: &str, registers: usize, unix_seconds: f64) {
        self.snapshot_registers
            .with_label_values(&[connection])
            .set(registers as i64);
        self.last_success
            .with_label_values(&[connection])
            .set(unix_seconds);
    }

    pub fn set_consecutive_failures(&self, connection: &str, failures: u32) {
        self.consecutive_failures
            .with_label_values(&[connection])
            .set(i64::from(failures));
    }

    pub fn inc_skipped_tick(&self) {
        self.skipped_ticks.inc();
    }

    /// Total fetches recorded for a connection/outcome pair.
    pub fn fetch_count(&self, connection: &str, outcome: FetchOutcome) -> u64 {
        self.fetches
            .with_label_values(&[connection, outcome.as_str()])
            .get()
    }
}

pub use prometheus;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_metrics_track_outcomes() {
        let registry = new_registry();
        let metrics = PollMetrics::new(registry.clone()).unwrap();
        metrics.connection_started();
        metrics.record_fetch("balcony", FetchOutcome::Success, 0.05);
        metrics.record_fetch("balcony", FetchOutcome::Timeout, 60.0);
        metrics.record_fetch("balcony", FetchOutcome::Timeout, 60.0);
        metrics.set_consecutive_failures("balcony", 2);

        assert_eq!(metrics.fetch_count("balcony", FetchOutcome::Success), 1);
        assert_eq!(metrics.fetch_count("balcony", FetchOutcome::Timeout), 2);
        assert_eq!(metrics.fetch_count("balcony", FetchOutcome::ProtocolError), 0);

        let names: Vec<String> = registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_owned())
            .collect();
        assert!(names.contains(&"indevolt_fetches_total".to_owned()));
        assert!(names.contains(&"indevolt_connections_active".to_owned()));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = new_registry();
        PollMetrics::new(registry.clone()).unwrap();
        assert!(PollMetrics::new(registry).is_err());
    }

    #[tokio::test]
    async fn exporter_serves_registry() {
        let registry = new_registry();
        let daemon = DaemonMetrics::new(registry.clone()).unwrap();
        daemon.inc_start();
        daemon.set_build_info("0.1.0");

        let server = spawn_http_server(registry, "127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let body = reqwest::get(format!("http://{}/metrics", server.addr()))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.contains("indevoltd_starts_total 1"));
        server.shutdown().await.unwrap();
    }
}
