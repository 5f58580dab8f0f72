//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Registry of loaded device connections."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use indevolt_catalog::DeviceGeneration;
use indevolt_common::config::DeviceConfig;
use indevolt_metrics::PollMetrics;
use indevolt_net::{DeviceClient, DeviceTransport};
use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::coordinator::{CoordinatorSettings, PollingCoordinator};
use crate::error::RegistryError;

/// One configured device and the coordinator polling it.
#[derive(Debug)]
pub struct DeviceConnection {
    id: String,
    config: DeviceConfig,
    coordinator: PollingCoordinator,
}

impl DeviceConnection {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn generation(&self) -> DeviceGeneration {
        self.config.generation()
    }

    pub fn coordinator(&self) -> &PollingCoordinator {
        &self.coordinator
    }
}

/// Explicit map of loaded connections, owned by the host process.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: Mutex<IndexMap<String, Arc<DeviceConnection>>>,
    metrics: Option<PollMetrics>,
}

impl ConnectionRegistry {
    pub fn new(metrics: Option<PollMetrics>) -> Self {
        Self {
            connections: Mutex::new(IndexMap::new()),
            metrics,
        }
    }

    /// Load a connection using the HTTP device client.
    pub async fn setup(
        &self,
        id: &str,
        config: DeviceConfig,
    ) -> Result<Arc<DeviceConnection>, RegistryError> {
        validate(id, &config)?;
        let client = DeviceClient::from_config(&config).map_err(|source| RegistryError::Client {
            id: id.to_owned(),
            source,
        })?;
        self.setup_with_transport(id, config, Arc::new(client)).await
    }

    /// Load a connection over an injected transport. Nothing is registered
    /// unless the first refresh succeeds; on failure the transport is closed.
    pub async fn setup_with_transport(
        &self,
        id: &str,
        config: DeviceConfig,
        transport: Arc<dyn DeviceTransport>,
    ) -> Result<Arc<DeviceConnection>, RegistryError> {
        if let Err(err) = validate(id, &config) {
            transport.close().await;
            return Err(err);
        }
        if self.connections.lock().contains_key(id) {
            return Err(RegistryError::AlreadyLoaded(id.to_owned()));
        }

        let coordinator = PollingCoordinator::new(
            id,
            CoordinatorSettings::for_device(&config),
            transport,
            self.metrics.clone(),
        );
        if let Err(source) = coordinator.start().await {
            coordinator.shutdown().await;
            return Err(RegistryError::NotReady {
                id: id.to_owned(),
                source,
            });
        }

        let connection = Arc::new(DeviceConnection {
            id: id.to_owned(),
            config,
            coordinator,
        });
        let duplicate = {
            let mut connections = self.connections.lock();
            if connections.contains_key(id) {
                true
            } else {
                connections.insert(id.to_owned(), connection.clone());
                false
            }
        };
        if duplicate {
            connection.coordinator.shutdown().await;
            return Err(RegistryError::AlreadyLoaded(id.to_owned()));
        }

        info!(
            connection = id,
            host = %connection.config.host,
            model = %connection.config.model,
            "device connection loaded"
        );
        Ok(connection)
    }

    pub fn get(&self, id: &str) -> Option<Arc<DeviceConnection>> {
        self.connections.lock().get(id).cloned()
    }

    /// Loaded connection ids in load order.
    pub fn ids(&self) -> Vec<String> {
        self.connections.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }

    /// Shut a connection down and forget it. Unknown ids are a no-op.
    pub async fn unload(&self, id: &str) -> bool {
        let removed = self.connections.lock().shift_remove(id);
        match removed {
            Some(connection) => {
                connection.coordinator.shutdown().await;
                info!(connection = id, "device connection unloaded");
                true
            }
            None => {
                warn!(connection = id, "unload requested for unknown connection");
                false
            }
        }
    }

    /// Unload every connection.
    pub async fn shutdown_all(&self) {
        let drained: Vec<Arc<DeviceConnection>> = self
            .connections
            .lock()
            .drain(..)
            .map(|(_, connection)| connection)
            .collect();
        for connection in drained {
            connection.coordinator.shutdown().await;
        }
    }
}

fn validate(id: &str, config: &DeviceConfig) -> Result<(), RegistryError> {
    config
        .validate(id)
        .map_err(|err| RegistryError::InvalidConfig {
            id: id.to_owned(),
            reason: format!("{err:#}"),
        })
}
