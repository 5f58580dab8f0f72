//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Setup-time device probe."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use indevolt_catalog::{DeviceGeneration, DeviceModel};
use indevolt_common::config::DeviceConfig;
use indevolt_net::{DeviceClient, DeviceTransport, ErrorKind, FetchError};
use thiserror::Error;
use tracing::{error, info};

/// Identity of a device confirmed reachable at setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub host: String,
    pub port: u16,
    pub serial: Option<String>,
    pub model: DeviceModel,
    pub generation: DeviceGeneration,
    pub firmware: String,
    pub title: String,
}

/// Operator-facing reason a probe failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupFailure {
    Timeout,
    Unknown,
}

impl SetupFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            SetupFailure::Timeout => "timeout",
            SetupFailure::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Error)]
#[error("device probe failed ({}): {source}", .failure.as_str())]
pub struct ProbeError {
    pub failure: SetupFailure,
    #[source]
    pub source: FetchError,
}

impl From<FetchError> for ProbeError {
    fn from(source: FetchError) -> Self {
        let failure = match source.kind() {
            ErrorKind::Timeout => SetupFailure::Timeout,
            _ => SetupFailure::Unknown,
        };
        Self { failure, source }
    }
}

/// Read the serial number from a device and derive its identity.
pub async fn probe_device(config: &DeviceConfig) -> Result<DeviceIdentity, ProbeError> {
    let client = DeviceClient::from_config(config)?;
    let serial = client.probe_serial().await;
    client.close().await;
    match serial {
        Ok(serial) => {
            let identity = identity_for(config, serial);
            info!(
                host = %identity.host,
                serial = identity.serial.as_deref().unwrap_or(""),
                title = %identity.title,
                "device probe succeeded"
            );
            Ok(identity)
        }
        Err(err) => {
            error!(host = %config.host, kind = %err.kind(), error = %err, "device probe failed");
            Err(err.into())
        }
    }
}

fn identity_for(config: &DeviceConfig, serial: Option<String>) -> DeviceIdentity {
    DeviceIdentity {
        host: config.host.clone(),
        port: config.port,
        serial,
        model: config.model,
        generation: config.generation(),
        firmware: config.firmware_or_default().to_owned(),
        title: format!("INDEVOLT {} ({})", config.model, config.host),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn identity_uses_model_defaults() {
        let config = DeviceConfig::new("192.168.1.20", DeviceModel::Bk1600Ultra);
        let identity = identity_for(&config, Some("SN01".into()));
        assert_eq!(identity.title, "INDEVOLT BK1600Ultra (192.168.1.20)");
        assert_eq!(identity.generation, DeviceGeneration::Gen1);
        assert_eq!(identity.firmware, "V1.3.0A_R006.072_M4848_00000039");
    }

    #[test]
    fn failures_are_classified() {
        let timeout: ProbeError = FetchError::Timeout(Duration::from_secs(60)).into();
        assert_eq!(timeout.failure, SetupFailure::Timeout);
        let refused: ProbeError = FetchError::Network("refused".into()).into();
        assert_eq!(refused.failure, SetupFailure::Unknown);
        assert_eq!(
            ProbeError::from(FetchError::Status(500)).failure.as_str(),
            "unknown"
        );
    }
}
