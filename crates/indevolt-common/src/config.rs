//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the polling runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use indevolt_catalog::{DeviceGeneration, DeviceModel};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

/// Port the Indevolt local API listens on out of the box.
pub const DEFAULT_PORT: u16 = 8080;
/// RPC method that returns register values.
pub const DEFAULT_RPC_METHOD: &str = "Indevolt.GetData";

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_scan_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_rpc_method() -> String {
    DEFAULT_RPC_METHOD.to_owned()
}

fn default_failure_log_threshold() -> u32 {
    3
}

fn default_setup_retry() -> Duration {
    Duration::from_secs(30)
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_metrics_enabled() -> bool {
    false
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9899))
}

/// Primary configuration object for the polling daemon.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Devices keyed by their setup-time entry id.
    #[serde(default)]
    pub devices: IndexMap<String, DeviceConfig>,
    /// Delay between setup attempts for devices that were not ready.
    #[serde(default = "default_setup_retry")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub setup_retry: Duration,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "INDEVOLT_CONFIG";

    /// Load configuration from disk, respecting the `INDEVOLT_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            let path = candidate.as_ref();
            if path.exists() {
                let config = Self::from_path(path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path.to_path_buf(),
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<AppConfig>()
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Retrieve a device configuration by entry id.
    pub fn device(&self, entry_id: &str) -> Option<&DeviceConfig> {
        self.devices.get(entry_id)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.devices.is_empty() {
            return Err(anyhow!("configuration must contain at least one device"));
        }
        if self.setup_retry.is_zero() {
            return Err(anyhow!("setup_retry must be greater than zero"));
        }
        for (entry_id, device) in &self.devices {
            device.validate(entry_id)?;
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            devices: IndexMap::new(),
            setup_retry: default_setup_retry(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Connection settings for one device. Validated before a coordinator is built.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub model: DeviceModel,
    #[serde(default = "default_scan_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub scan_interval: Duration,
    /// Total bound for one RPC request, connect through body.
    #[serde(default = "default_request_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub request_timeout: Duration,
    #[serde(default = "default_rpc_method")]
    pub rpc_method: String,
    /// Consecutive failures after which fetch errors are logged at error level.
    #[serde(default = "default_failure_log_threshold")]
    pub failure_log_threshold: u32,
    /// Serial number recorded by the setup probe, if known.
    #[serde(default)]
    pub serial: Option<String>,
    #[serde(default)]
    pub firmware: Option<String>,
}

impl DeviceConfig {
    /// Build a configuration with defaults for everything but host and model.
    pub fn new(host: impl Into<String>, model: DeviceModel) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            model,
            scan_interval: default_scan_interval(),
            request_timeout: default_request_timeout(),
            rpc_method: default_rpc_method(),
            failure_log_threshold: default_failure_log_threshold(),
            serial: None,
            firmware: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = interval;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn generation(&self) -> DeviceGeneration {
        self.model.generation()
    }

    /// Firmware label, falling back to the generation default.
    pub fn firmware_or_default(&self) -> &str {
        self.firmware
            .as_deref()
            .unwrap_or_else(|| self.generation().default_firmware())
    }

    pub fn validate(&self, entry_id: &str) -> Result<()> {
        let host = self.host.trim();
        if host.is_empty() {
            return Err(anyhow!("device '{}' must declare a host", entry_id));
        }
        if host.contains("://") || host.contains('/') {
            return Err(anyhow!(
                "device '{}' host must be a bare hostname or address, got '{}'",
                entry_id,
                self.host
            ));
        }
        if self.port == 0 {
            return Err(anyhow!("device '{}' port must be non-zero", entry_id));
        }
        if self.scan_interval.is_zero() {
            return Err(anyhow!(
                "device '{}' scan_interval must be greater than zero",
                entry_id
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(anyhow!(
                "device '{}' request_timeout must be greater than zero",
                entry_id
            ));
        }
        if self.rpc_method.trim().is_empty() {
            return Err(anyhow!("device '{}' rpc_method must not be empty", entry_id));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
    /// Disable the rolling file sink, keeping stdout only.
    #[serde(default)]
    pub stdout_only: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
            stdout_only: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
setup_retry = 15

[logging]
format = "structured-json"
stdout_only = true

[devices.balcony]
host = "192.168.1.40"
model = "BK1600Ultra"

[devices.garage]
host = "indevolt-garage.local"
port = 8081
model = "SolidFlex2000"
scan_interval = 10
request_timeout = 5
failure_log_threshold = 5
"#;

    #[test]
    fn parses_devices_with_defaults() {
        let config: AppConfig = SAMPLE.parse().unwrap();
        assert_eq!(config.setup_retry, Duration::from_secs(15));
        assert_eq!(config.logging.format, LogFormat::StructuredJson);
        assert!(!config.metrics.enabled);

        let balcony = config.device("balcony").unwrap();
        assert_eq!(balcony.port, DEFAULT_PORT);
        assert_eq!(balcony.scan_interval, Duration::from_secs(30));
        assert_eq!(balcony.request_timeout, Duration::from_secs(60));
        assert_eq!(balcony.rpc_method, DEFAULT_RPC_METHOD);
        assert_eq!(balcony.generation(), DeviceGeneration::Gen1);
        assert_eq!(balcony.firmware_or_default(), "V1.3.0A_R006.072_M4848_00000039");

        let garage = config.device("garage").unwrap();
        assert_eq!(garage.port, 8081);
        assert_eq!(garage.request_timeout, Duration::from_secs(5));
        assert_eq!(garage.failure_log_threshold, 5);
        assert_eq!(garage.generation(), DeviceGeneration::Gen2);

        let ids: Vec<_> = config.devices.keys().cloned().collect();
        assert_eq!(ids, vec!["balcony", "garage"]);
    }

    #[test]
    fn rejects_empty_device_list() {
        let err = "setup_retry = 5".parse::<AppConfig>().unwrap_err();
        assert!(err.to_string().contains("at least one device"));
    }

    #[test]
    fn rejects_unknown_model() {
        let err = "[devices.a]\nhost = \"10.0.0.2\"\nmodel = \"BK9000\""
            .parse::<AppConfig>()
            .unwrap_err();
        assert!(format!("{err:#}").contains("BK9000"));
    }

    #[test]
    fn device_validation_catches_bad_values() {
        let base = DeviceConfig::new("10.0.0.2", DeviceModel::Bk1600);
        assert!(base.validate("a").is_ok());
        assert!(DeviceConfig::new(" ", DeviceModel::Bk1600).validate("a").is_err());
        assert!(DeviceConfig::new("http://10.0.0.2", DeviceModel::Bk1600)
            .validate("a")
            .is_err());
        assert!(base.clone().with_port(0).validate("a").is_err());
        assert!(base
            .clone()
            .with_scan_interval(Duration::ZERO)
            .validate("a")
            .is_err());
        assert!(base
            .with_request_timeout(Duration::ZERO)
            .validate("a")
            .is_err());
    }

    #[test]
    fn load_with_source_picks_first_existing_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("indevolt.toml");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let missing = dir.path().join("missing.toml");
        let loaded = AppConfig::load_with_source(&[missing, path.clone()]).unwrap();
        assert_eq!(loaded.source, path);
        assert_eq!(loaded.config.devices.len(), 2);
    }

    #[test]
    fn shipped_example_config_is_valid() {
        let config: AppConfig = include_str!("../../../configs/example.toml")
            .parse()
            .unwrap();
        assert!(config.metrics.enabled);
        assert_eq!(
            config.device("garage").map(DeviceConfig::generation),
            Some(DeviceGeneration::Gen2)
        );
    }
}
