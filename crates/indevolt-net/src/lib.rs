//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Device RPC client and transport abstraction."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
#![warn(missing_docs)]

pub mod client;
pub mod error;
pub mod transport;

pub use client::{ClientSettings, DeviceClient};
pub use error::{ErrorKind, FetchError};
pub use transport::{DeviceTransport, RegisterValues};
