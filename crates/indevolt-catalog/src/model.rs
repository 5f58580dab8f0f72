//! ---
//! ems_section: "02-device-registers"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Static register catalog for Indevolt device generations."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Errors raised while resolving catalog lookups from user input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    /// The supplied model name is not one of the supported units.
    #[error("unsupported device model: {0}")]
    UnknownModel(String),
}

/// Hardware/firmware generation. Determines which registers exist and how
/// enum registers map to labels.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceGeneration {
    /// BK1600 family.
    Gen1,
    /// SolidFlex/PowerFlex family.
    Gen2,
}

impl DeviceGeneration {
    /// Firmware label recorded for a freshly configured unit of this generation.
    pub fn default_firmware(&self) -> &'static str {
        match self {
            DeviceGeneration::Gen1 => "V1.3.0A_R006.072_M4848_00000039",
            DeviceGeneration::Gen2 => "V1.3.09_R00D.012_M4801_00000015",
        }
    }

    /// Numeric generation as printed by operators.
    pub fn number(&self) -> u8 {
        match self {
            DeviceGeneration::Gen1 => 1,
            DeviceGeneration::Gen2 => 2,
        }
    }
}

/// Supported Indevolt units.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceModel {
    /// BK1600 micro-storage unit.
    #[serde(rename = "BK1600")]
    Bk1600,
    /// BK1600 Ultra micro-storage unit.
    #[serde(rename = "BK1600Ultra")]
    Bk1600Ultra,
    /// SolidFlex 2000 storage system.
    #[serde(rename = "SolidFlex2000")]
    SolidFlex2000,
    /// PowerFlex 2000 storage system.
    #[serde(rename = "PowerFlex2000")]
    PowerFlex2000,
}

impl DeviceModel {
    /// Every model accepted by the setup probe, in display order.
    pub const ALL: [DeviceModel; 4] = [
        DeviceModel::Bk1600,
        DeviceModel::Bk1600Ultra,
        DeviceModel::SolidFlex2000,
        DeviceModel::PowerFlex2000,
    ];

    /// Generation that determines the register table used for this model.
    pub fn generation(&self) -> DeviceGeneration {
        match self {
            DeviceModel::Bk1600 | DeviceModel::Bk1600Ultra => DeviceGeneration::Gen1,
            DeviceModel::SolidFlex2000 | DeviceModel::PowerFlex2000 => DeviceGeneration::Gen2,
        }
    }

    /// Product name as used in configuration files.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceModel::Bk1600 => "BK1600",
            DeviceModel::Bk1600Ultra => "BK1600Ultra",
            DeviceModel::SolidFlex2000 => "SolidFlex2000",
            DeviceModel::PowerFlex2000 => "PowerFlex2000",
        }
    }
}

impl fmt::Display for DeviceModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceModel {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeviceModel::ALL
            .into_iter()
            .find(|model| model.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CatalogError::UnknownModel(s.to_owned()))
    }
}
