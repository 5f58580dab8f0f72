//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Polling coordinator and connection lifecycle."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---

pub mod consumer;
pub mod coordinator;
pub mod error;
pub mod listener;
pub mod registry;
pub mod setup;
pub mod snapshot;
pub mod timer;

pub use consumer::{project, unique_id, SensorAdapter, SensorValue};
pub use coordinator::{
    CoordinatorSettings, CoordinatorState, PollingCoordinator, DEFAULT_FAILURE_LOG_THRESHOLD,
};
pub use error::{CoordinatorError, RegistryError};
pub use listener::{CoordinatorUpdate, ListenerId, UpdateListener};
pub use registry::{ConnectionRegistry, DeviceConnection};
pub use setup::{probe_device, DeviceIdentity, ProbeError, SetupFailure};
pub use snapshot::Snapshot;
pub use timer::PollTimer;
