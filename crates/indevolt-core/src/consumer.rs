//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Projection of snapshot registers into sensor values."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fmt;

use indevolt_catalog::SensorDescription;
use parking_lot::Mutex;

use crate::listener::{CoordinatorUpdate, UpdateListener};
use crate::snapshot::Snapshot;

/// Value of one sensor after unit scaling or enum mapping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorValue {
    Numeric(f64),
    Label(&'static str),
}

impl fmt::Display for SensorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorValue::Numeric(value) => write!(f, "{value}"),
            SensorValue::Label(label) => f.write_str(label),
        }
    }
}

/// Read one register out of a snapshot. A missing key, or an enum code with
/// no label, yields `None`.
pub fn project(description: &SensorDescription, snapshot: &Snapshot) -> Option<SensorValue> {
    let raw = snapshot.get(description.key)?;
    if description.is_enum() {
        if raw.fract() != 0.0 {
            return None;
        }
        description
            .label_for(raw as i64)
            .map(SensorValue::Label)
    } else {
        Some(SensorValue::Numeric(raw * description.coefficient))
    }
}

/// Ready-made listener tracking one sensor.
pub struct SensorAdapter {
    description: &'static SensorDescription,
    unique_id: String,
    state: Mutex<AdapterState>,
}

#[derive(Default)]
struct AdapterState {
    value: Option<SensorValue>,
    available: bool,
}

impl SensorAdapter {
    pub fn new(description: &'static SensorDescription, serial: &str, entry_id: &str) -> Self {
        Self {
            description,
            unique_id: unique_id(serial, entry_id, description.key),
            state: Mutex::new(AdapterState::default()),
        }
    }

    pub fn description(&self) -> &'static SensorDescription {
        self.description
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    /// Last projected value. Kept across failed polls.
    pub fn value(&self) -> Option<SensorValue> {
        self.state.lock().value
    }

    /// Whether the most recent poll succeeded.
    pub fn available(&self) -> bool {
        self.state.lock().available
    }

    /// Allowed labels for enum sensors, empty otherwise.
    pub fn options(&self) -> Vec<&'static str> {
        self.description.options()
    }
}

impl fmt::Debug for SensorAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SensorAdapter")
            .field("unique_id", &self.unique_id)
            .field("value", &self.value())
            .field("available", &self.available())
            .finish()
    }
}

impl UpdateListener for SensorAdapter {
    fn on_update(&self, update: &CoordinatorUpdate) {
        let mut state = self.state.lock();
        match update {
            CoordinatorUpdate::Refreshed(snapshot) => {
                state.value = project(self.description, snapshot);
                state.available = true;
            }
            CoordinatorUpdate::Failed { .. } => state.available = false,
        }
    }
}

/// `indevolt_{serial}_{entry}_{key}`.
pub fn unique_id(serial: &str, entry_id: &str, key: &str) -> String {
    format!("indevolt_{serial}_{entry_id}_{key}")
}
