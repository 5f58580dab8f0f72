//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the polling runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::path::Path;

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::{self, time::UtcTime};
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::registry::Registry;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "INDEVOLT_LOG";
const DEFAULT_DIRECTIVE: &str = "info";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Flush guards for the non-blocking writers. Dropping them loses buffered lines,
/// so they live for the rest of the process.
#[derive(Default)]
struct SinkGuards {
    stdout: Option<WorkerGuard>,
    file: Option<WorkerGuard>,
}

static SINKS: OnceCell<SinkGuards> = OnceCell::new();

/// Available log formats for the daemon.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    StructuredJson,
    #[default]
    Pretty,
}

/// Resolve the log filter from `INDEVOLT_LOG`, then `RUST_LOG`, then `info`.
fn resolve_filter() -> EnvFilter {
    let Ok(directive) = std::env::var(LOG_ENV) else {
        return EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));
    };
    EnvFilter::try_new(&directive).unwrap_or_else(|err| {
        eprintln!("ignoring {LOG_ENV}={directive:?} ({err}); using {DEFAULT_DIRECTIVE}");
        EnvFilter::new(DEFAULT_DIRECTIVE)
    })
}

fn console_layer(format: LogFormat, writer: NonBlocking) -> BoxedLayer {
    let base = fmt::layer().with_timer(UtcTime::rfc_3339());
    match format {
        LogFormat::Pretty => base.with_target(true).with_writer(writer).boxed(),
        LogFormat::StructuredJson => base.with_target(false).json().with_writer(writer).boxed(),
    }
}

/// Daily rolling JSON file named `<prefix>.log.<date>` under `directory`.
fn rolling_file(directory: &Path, prefix: &str) -> Result<(BoxedLayer, WorkerGuard)> {
    std::fs::create_dir_all(directory)
        .with_context(|| format!("failed to create log directory {}", directory.display()))?;
    let appender = tracing_appender::rolling::daily(directory, format!("{prefix}.log"));
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let layer = fmt::layer()
        .with_timer(UtcTime::rfc_3339())
        .with_target(true)
        .json()
        .with_writer(writer)
        .boxed();
    Ok((layer, guard))
}

/// Install the global subscriber described by `config`.
///
/// Stdout gets pretty or JSON lines per `config.format`. Unless `stdout_only`
/// is set, every event is also written as JSON to a daily rolling file in
/// `config.directory`. Only the first call installs anything; later calls
/// return `Ok(())` and leave the existing subscriber in place.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    if SINKS.get().is_some() {
        return Ok(());
    }

    let mut guards = SinkGuards::default();
    let (stdout, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    guards.stdout = Some(stdout_guard);
    let mut layers = vec![console_layer(config.format, stdout)];

    if !config.stdout_only {
        let prefix = config.file_prefix.as_deref().unwrap_or(service_name);
        let (layer, guard) = rolling_file(&config.directory, prefix)?;
        guards.file = Some(guard);
        layers.push(layer);
    }

    if tracing_subscriber::registry()
        .with(layers)
        .with(resolve_filter())
        .try_init()
        .is_err()
    {
        // Another subscriber (e.g. a test harness) already owns the process.
        return Ok(());
    }
    let _ = SINKS.set(guards);

    info!(
        service = %service_name,
        log_dir = %config.directory.display(),
        format = ?config.format,
        file_sink = !config.stdout_only,
        "tracing initialised"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_repeatable() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            directory: dir.path().to_path_buf(),
            ..LoggingConfig::default()
        };
        init_tracing("indevolt-test", &config).unwrap();
        init_tracing("indevolt-test", &config).unwrap();
        assert!(dir.path().exists());
    }
}
