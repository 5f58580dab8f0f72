//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Transport seam between the coordinator and a device."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use indevolt_catalog::RegisterKey;
use serde_json::Value;

use crate::error::FetchError;

/// Raw register values as returned by the device. Keys the device did not
/// report are absent.
pub type RegisterValues = BTreeMap<RegisterKey, Value>;

/// Unified interface implemented by anything able to read device registers.
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    /// Read the given registers in a single request.
    async fn fetch(&self, keys: &[RegisterKey]) -> Result<RegisterValues, FetchError>;

    /// Release connection resources. Must tolerate repeated calls.
    async fn close(&self) {}
}

#[async_trait]
impl<T> DeviceTransport for Arc<T>
where
    T: DeviceTransport + ?Sized,
{
    async fn fetch(&self, keys: &[RegisterKey]) -> Result<RegisterValues, FetchError> {
        (**self).fetch(keys).await
    }

    async fn close(&self) {
        (**self).close().await
    }
}
