//! ---
//! ems_section: "02-device-registers"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Static register catalog for Indevolt device generations."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use serde::Serialize;

use crate::model::DeviceGeneration;
use crate::register::RegisterKey;

/// Unit of measurement attached to a numeric register.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum Unit {
    /// Watts.
    #[serde(rename = "W")]
    Watt,
    /// Kilowatt hours.
    #[serde(rename = "kWh")]
    KiloWattHour,
    /// Percentage.
    #[serde(rename = "%")]
    Percent,
}

impl Unit {
    /// Symbol used when rendering values.
    pub fn symbol(&self) -> &'static str {
        match self {
            Unit::Watt => "W",
            Unit::KiloWattHour => "kWh",
            Unit::Percent => "%",
        }
    }
}

/// Physical quantity of a register.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    /// Instantaneous power.
    Power,
    /// Accumulated energy.
    Energy,
    /// Battery related percentage.
    Battery,
    /// Discrete state with a value to label mapping.
    Enum,
}

/// How consumers should aggregate a numeric register over time.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StateClass {
    /// Point-in-time measurement.
    Measurement,
    /// Monotonic counter that may reset.
    TotalIncreasing,
}

/// Data-only description of one register as exposed to consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorDescription {
    /// Register identifier requested from the device.
    pub key: &'static str,
    /// Human readable name.
    pub name: &'static str,
    /// Unit for numeric registers.
    pub unit: Option<Unit>,
    /// Quantity classification.
    pub device_class: DeviceClass,
    /// Aggregation hint for numeric registers.
    pub state_class: Option<StateClass>,
    /// Multiplier applied to the raw register value.
    pub coefficient: f64,
    /// Raw value to label mapping, only populated for enum registers.
    pub state_mapping: &'static [(i64, &'static str)],
}

impl SensorDescription {
    const fn numeric(
        key: &'static str,
        name: &'static str,
        unit: Unit,
        device_class: DeviceClass,
        state_class: StateClass,
    ) -> Self {
        Self {
            key,
            name,
            unit: Some(unit),
            device_class,
            state_class: Some(state_class),
            coefficient: 1.0,
            state_mapping: &[],
        }
    }

    const fn power(key: &'static str, name: &'static str) -> Self {
        Self::numeric(key, name, Unit::Watt, DeviceClass::Power, StateClass::Measurement)
    }

    const fn energy(key: &'static str, name: &'static str) -> Self {
        Self::numeric(
            key,
            name,
            Unit::KiloWattHour,
            DeviceClass::Energy,
            StateClass::TotalIncreasing,
        )
    }

    const fn battery(key: &'static str, name: &'static str) -> Self {
        Self::numeric(
            key,
            name,
            Unit::Percent,
            DeviceClass::Battery,
            StateClass::Measurement,
        )
    }

    const fn enumerated(
        key: &'static str,
        name: &'static str,
        state_mapping: &'static [(i64, &'static str)],
    ) -> Self {
        Self {
            key,
            name,
            unit: None,
            device_class: DeviceClass::Enum,
            state_class: None,
            coefficient: 1.0,
            state_mapping,
        }
    }

    const fn scaled(self, coefficient: f64) -> Self {
        Self {
            coefficient,
            ..self
        }
    }

    /// Register key in its owned form.
    pub fn register_key(&self) -> RegisterKey {
        RegisterKey::new(self.key)
    }

    /// True for registers rendered through [`SensorDescription::state_mapping`].
    pub fn is_enum(&self) -> bool {
        matches!(self.device_class, DeviceClass::Enum)
    }

    /// Label for a raw enum value, if the value is known for this register.
    pub fn label_for(&self, raw: i64) -> Option<&'static str> {
        self.state_mapping
            .iter()
            .find(|(value, _)| *value == raw)
            .map(|(_, label)| *label)
    }

    /// Distinct labels an enum register can report, in table order.
    pub fn options(&self) -> Vec<&'static str> {
        let mut options: Vec<&'static str> = Vec::with_capacity(self.state_mapping.len());
        for &(_, label) in self.state_mapping {
            if !options.contains(&label) {
                options.push(label);
            }
        }
        options
    }
}

const BATTERY_STATE: &[(i64, &str)] = &[(1000, "Static"), (1001, "Charging"), (1002, "Discharging")];
const METER_CONNECTION: &[(i64, &str)] = &[(1000, "ON"), (1001, "OFF")];

const GEN1_WORKING_MODE: &[(i64, &str)] = &[
    (0, "Outdoor Portable"),
    (1, "Self-consumed Prioritized"),
    (5, "Charge/Discharge Schedule"),
];
const GEN2_WORKING_MODE: &[(i64, &str)] = &[
    (1, "Self-consumed Prioritized"),
    (5, "Charge/Discharge Schedule"),
];

static SENSORS_GEN1: [SensorDescription; 19] = [
    SensorDescription::power("1664", "DC Input Power1"),
    SensorDescription::power("1665", "DC Input Power2"),
    SensorDescription::power("2108", "Total AC Output Power"),
    SensorDescription::energy("1502", "Daily Production"),
    SensorDescription::energy("1505", "Cumulative Production").scaled(0.001),
    SensorDescription::power("2101", "Total AC Input Power"),
    SensorDescription::energy("2107", "Total AC Input Energy"),
    SensorDescription::power("1501", "Total DC Output Power"),
    SensorDescription::power("6000", "Battery Power"),
    SensorDescription::battery("6002", "Battery SOC"),
    SensorDescription::battery("6105", "Emergency power supply"),
    SensorDescription::energy("6004", "Battery Daily Charging Energy"),
    SensorDescription::energy("6005", "Battery Daily Discharging Energy"),
    SensorDescription::energy("6006", "Battery Total Charging Energy"),
    SensorDescription::energy("6007", "Battery Total Discharging Energy"),
    SensorDescription::power("21028", "Meter Power"),
    SensorDescription::enumerated("7101", "Working mode", GEN1_WORKING_MODE),
    SensorDescription::enumerated("6001", "Battery Charge/Discharge State", BATTERY_STATE),
    SensorDescription::enumerated("7120", "Meter Connection Status", METER_CONNECTION),
];

static SENSORS_GEN2: [SensorDescription; 23] = [
    SensorDescription::power("1664", "DC Input Power1"),
    SensorDescription::power("1665", "DC Input Power2"),
    SensorDescription::power("1666", "DC Input Power3"),
    SensorDescription::power("1667", "DC Input Power4"),
    SensorDescription::power("1501", "Total DC Output Power"),
    SensorDescription::power("2108", "Total AC Output Power"),
    SensorDescription::energy("1502", "Daily Production"),
    SensorDescription::energy("1505", "Cumulative Production").scaled(0.001),
    SensorDescription::power("2101", "Total AC Input Power"),
    SensorDescription::energy("2107", "Total AC Input Energy"),
    SensorDescription::energy("142", "Rated capacity"),
    SensorDescription::power("6000", "Battery Power"),
    SensorDescription::battery("6009", "Battery SOC"),
    SensorDescription::battery("6105", "Emergency power supply"),
    SensorDescription::energy("6004", "Battery Daily Charging Energy"),
    SensorDescription::energy("6005", "Battery Daily Discharging Energy"),
    SensorDescription::energy("6006", "Battery Total Charging Energy"),
    SensorDescription::energy("6007", "Battery Total Discharging Energy"),
    SensorDescription::power("11016", "Meter Power"),
    SensorDescription::enumerated("7101", "Working mode", GEN2_WORKING_MODE),
    SensorDescription::enumerated("6001", "Battery Charge/Discharge State", BATTERY_STATE),
    SensorDescription::enumerated("7120", "Meter Connection Status", METER_CONNECTION),
    SensorDescription::power("667", "Bypass Power"),
];

/// Sensor table for a device generation.
pub fn descriptions_for(generation: DeviceGeneration) -> &'static [SensorDescription] {
    match generation {
        DeviceGeneration::Gen1 => &SENSORS_GEN1,
        DeviceGeneration::Gen2 => &SENSORS_GEN2,
    }
}

/// Look up a single description by register key.
pub fn description(generation: DeviceGeneration, key: &str) -> Option<&'static SensorDescription> {
    descriptions_for(generation).iter().find(|d| d.key == key)
}

/// Ordered register keys that every fetch for `generation` must request.
pub fn keys_for(generation: DeviceGeneration) -> Vec<RegisterKey> {
    descriptions_for(generation)
        .iter()
        .map(SensorDescription::register_key)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn keys_are_unique_per_generation() {
        for generation in [DeviceGeneration::Gen1, DeviceGeneration::Gen2] {
            let keys = keys_for(generation);
            let unique: HashSet<_> = keys.iter().collect();
            assert_eq!(unique.len(), keys.len(), "{generation:?} has duplicate keys");
        }
    }

    #[test]
    fn keys_are_value_stable() {
        assert_eq!(keys_for(DeviceGeneration::Gen2), keys_for(DeviceGeneration::Gen2));
        let first = keys_for(DeviceGeneration::Gen1);
        assert_eq!(first[0].as_str(), "1664");
        assert_eq!(first.last().map(RegisterKey::as_str), Some("7120"));
    }

    #[test]
    fn generations_overlap_but_differ() {
        let gen1: HashSet<_> = keys_for(DeviceGeneration::Gen1).into_iter().collect();
        let gen2: HashSet<_> = keys_for(DeviceGeneration::Gen2).into_iter().collect();
        assert!(gen1.contains("6002") && !gen2.contains("6002"));
        assert!(gen2.contains("6009") && !gen1.contains("6009"));
        assert!(gen1.contains("7101") && gen2.contains("7101"));
    }

    #[test]
    fn working_mode_mapping_differs_by_generation() {
        let gen1 = description(DeviceGeneration::Gen1, "7101").unwrap();
        let gen2 = description(DeviceGeneration::Gen2, "7101").unwrap();
        assert_eq!(gen1.label_for(0), Some("Outdoor Portable"));
        assert_eq!(gen2.label_for(0), None);
        assert_eq!(gen2.label_for(5), Some("Charge/Discharge Schedule"));
        assert_eq!(gen2.options(), vec!["Self-consumed Prioritized", "Charge/Discharge Schedule"]);
    }

    #[test]
    fn cumulative_production_is_scaled() {
        let desc = description(DeviceGeneration::Gen1, "1505").unwrap();
        assert!((desc.coefficient - 0.001).abs() < f64::EPSILON);
        assert_eq!(desc.unit, Some(Unit::KiloWattHour));
        assert!(!desc.is_enum());
    }
}
