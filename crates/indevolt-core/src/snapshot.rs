//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Immutable register snapshot captured by one successful fetch."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use indevolt_catalog::RegisterKey;
use indevolt_net::RegisterValues;
use serde_json::Value;

/// Register values captured at one poll instant.
///
/// A snapshot is only ever built from a successful fetch and is shared as
/// `Arc<Snapshot>`; a newer poll replaces it wholesale.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    values: BTreeMap<RegisterKey, f64>,
    captured_at: DateTime<Utc>,
    requested: usize,
}

impl Snapshot {
    /// Normalise a raw device response. Numbers are kept, numeric strings are
    /// parsed, everything else is dropped.
    pub fn from_raw(raw: RegisterValues, requested: usize) -> Self {
        Self::from_raw_at(raw, requested, Utc::now())
    }

    pub fn from_raw_at(raw: RegisterValues, requested: usize, captured_at: DateTime<Utc>) -> Self {
        let values = raw
            .into_iter()
            .filter_map(|(key, value)| numeric(&value).map(|number| (key, number)))
            .collect();
        Self {
            values,
            captured_at,
            requested,
        }
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn values(&self) -> &BTreeMap<RegisterKey, f64> {
        &self.values
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Number of keys that were requested in the fetch.
    pub fn requested(&self) -> usize {
        self.requested
    }

    /// Requested keys the device did not report.
    pub fn missing(&self) -> usize {
        self.requested.saturating_sub(self.values.len())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}
