//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Binary entrypoint for the Indevolt polling daemon."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indevolt_catalog::{descriptions_for, DeviceModel};
use indevolt_common::config::{AppConfig, DeviceConfig, LoggingConfig, DEFAULT_PORT};
use indevolt_common::logging::init_tracing;
use indevolt_core::{
    probe_device, ConnectionRegistry, CoordinatorUpdate, DeviceConnection, SensorAdapter,
};
use indevolt_metrics::{new_registry, spawn_http_server, DaemonMetrics, PollMetrics};
use tokio::signal;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const SERVICE_NAME: &str = "indevoltd";

#[derive(Debug, Parser)]
#[command(author, version, about = "Indevolt polling daemon", long_about = None)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Poll every configured device until interrupted")]
    Run,
    #[command(about = "Read the serial number of a device and print its identity")]
    Probe {
        #[arg(long)]
        host: String,
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,
        #[arg(long, help = "Device model, e.g. BK1600 or SolidFlex2000")]
        model: DeviceModel,
        #[arg(long, default_value_t = 60, help = "Request timeout in seconds")]
        timeout: u64,
    },
    #[command(about = "List the registers polled for a device model")]
    Keys {
        #[arg(long)]
        model: DeviceModel,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_daemon(cli.config).await,
        Commands::Probe {
            host,
            port,
            model,
            timeout,
        } => {
            init_console_tracing()?;
            let device = DeviceConfig::new(host, model)
                .with_port(port)
                .with_request_timeout(Duration::from_secs(timeout));
            device.validate("probe")?;
            let identity = probe_device(&device)
                .await
                .with_context(|| format!("probe of {}:{} failed", device.host, device.port))?;
            println!(
                "Title: {}\nSerial: {}\nModel: {}\nGeneration: {}\nFirmware: {}",
                identity.title,
                identity.serial.as_deref().unwrap_or("unknown"),
                identity.model,
                identity.generation.number(),
                identity.firmware
            );
            Ok(())
        }
        Commands::Keys { model } => {
            for description in descriptions_for(model.generation()) {
                let unit = description.unit.map(|unit| unit.symbol()).unwrap_or("");
                println!("{:>6}  {:<4} {}", description.key, unit, description.name);
            }
            Ok(())
        }
    }
}

fn init_console_tracing() -> Result<()> {
    let logging = LoggingConfig {
        stdout_only: true,
        ..LoggingConfig::default()
    };
    init_tracing(SERVICE_NAME, &logging)
}

async fn run_daemon(config_path: Option<PathBuf>) -> Result<()> {
    let mut candidates = Vec::new();
    if let Some(path) = config_path {
        candidates.push(path);
    }
    candidates.push(PathBuf::from("configs/indevolt.toml"));
    candidates.push(PathBuf::from("configs/example.toml"));

    let load_started = Instant::now();
    let loaded = AppConfig::load_with_source(&candidates)?;
    let load_duration = load_started.elapsed();
    let config = loaded.config;
    init_tracing(SERVICE_NAME, &config.logging)?;
    info!(
        source = %loaded.source.display(),
        devices = config.devices.len(),
        "configuration loaded"
    );

    let metrics_registry = new_registry();
    let daemon_metrics = DaemonMetrics::new(metrics_registry.clone())?;
    daemon_metrics.observe_config_load(load_duration.as_secs_f64());
    daemon_metrics.inc_start();
    daemon_metrics.set_build_info(env!("CARGO_PKG_VERSION"));

    let (metrics_server, poll_metrics) = if config.metrics.enabled {
        info!(address = %config.metrics.listen, "metrics exporter enabled");
        let server = spawn_http_server(metrics_registry.clone(), config.metrics.listen).await?;
        (Some(server), Some(PollMetrics::new(metrics_registry)?))
    } else {
        info!("metrics exporter disabled by configuration");
        (None, None)
    };

    let registry = Arc::new(ConnectionRegistry::new(poll_metrics));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut supervisors = Vec::new();
    for (id, device) in &config.devices {
        supervisors.push(tokio::spawn(supervise_connection(
            registry.clone(),
            id.clone(),
            device.clone(),
            config.setup_retry,
            shutdown_rx.clone(),
        )));
    }

    info!("daemon running; waiting for termination signal");
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");
    shutdown_tx.send_replace(true);
    for supervisor in supervisors {
        if let Err(err) = supervisor.await {
            warn!(error = %err, "connection supervisor join error");
        }
    }
    registry.shutdown_all().await;

    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }
    Ok(())
}

/// Keep trying to load one connection until it succeeds or the daemon stops.
async fn supervise_connection(
    registry: Arc<ConnectionRegistry>,
    id: String,
    device: DeviceConfig,
    retry: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            result = connect(&registry, &id, &device) => match result {
                Ok(()) => return,
                Err(err) => warn!(
                    connection = %id,
                    host = %device.host,
                    retry_in = ?retry,
                    error = %format!("{err:#}"),
                    "device not ready; will retry"
                ),
            },
        }
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tokio::time::sleep(retry) => {}
        }
    }
}

async fn connect(registry: &ConnectionRegistry, id: &str, device: &DeviceConfig) -> Result<()> {
    let serial = match &device.serial {
        Some(serial) => serial.clone(),
        None => probe_device(device)
            .await?
            .serial
            .unwrap_or_else(|| id.to_owned()),
    };
    let connection = registry.setup(id, device.clone()).await?;
    attach_sensor_log(&connection, &serial);
    Ok(())
}

/// Subscribe one adapter per catalog sensor plus a listener that logs their
/// values after every poll.
fn attach_sensor_log(connection: &DeviceConnection, serial: &str) {
    let coordinator = connection.coordinator();
    let adapters: Vec<Arc<SensorAdapter>> = descriptions_for(connection.generation())
        .iter()
        .map(|description| Arc::new(SensorAdapter::new(description, serial, connection.id())))
        .collect();
    for adapter in &adapters {
        coordinator.subscribe(adapter.clone());
    }

    let connection_id = connection.id().to_owned();
    coordinator.subscribe(Arc::new(move |update: &CoordinatorUpdate| match update {
        CoordinatorUpdate::Refreshed(_) => {
            for adapter in &adapters {
                if let Some(value) = adapter.value() {
                    let description = adapter.description();
                    debug!(
                        connection = %connection_id,
                        unique_id = adapter.unique_id(),
                        sensor = description.name,
                        unit = description.unit.map(|unit| unit.symbol()).unwrap_or(""),
                        value = %value,
                        "sensor value"
                    );
                }
            }
        }
        CoordinatorUpdate::Failed {
            consecutive_failures,
            ..
        } => {
            debug!(
                connection = %connection_id,
                sensors = adapters.len(),
                consecutive_failures,
                "sensors unavailable; serving stale values"
            );
        }
    }));
}
