//! ---
//! ems_section: "02-device-registers"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Static register catalog for Indevolt device generations."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Register holding the device serial number, read once during setup.
pub const SERIAL_NUMBER_KEY: &str = "0";

/// Identifier of a single measurement point on the device.
///
/// The RPC endpoint addresses registers by their decimal id rendered as a
/// string (`"1664"`), both in the request list and in the response object.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegisterKey(String);

impl RegisterKey {
    /// Wrap a raw register identifier.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Borrow the identifier as sent on the wire.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Register used by the setup probe to read the serial number.
    pub fn serial_number() -> Self {
        Self::new(SERIAL_NUMBER_KEY)
    }
}

impl fmt::Display for RegisterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RegisterKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for RegisterKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for RegisterKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}
