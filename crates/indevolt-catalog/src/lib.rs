//! ---
//! ems_section: "02-device-registers"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Static register catalog for Indevolt device generations."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Register catalog shared by the device client and the polling coordinator.
//! Everything in this crate is immutable data plus pure lookups keyed by
//! device generation.
#![warn(missing_docs)]

pub mod model;
pub mod register;
pub mod sensors;

pub use model::{CatalogError, DeviceGeneration, DeviceModel};
pub use register::{RegisterKey, SERIAL_NUMBER_KEY};
pub use sensors::{
    description, descriptions_for, keys_for, DeviceClass, SensorDescription, StateClass, Unit,
};
