use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

/// Optional per-parameter metadata sent alongside the values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ParameterHint {
    /// Unit string as reported by the gateway (e.g. "rpm", "C").
    #[serde(default)]
    pub unit: Option<String>,

    /// Vendor-supplied semantic class (e.g. "temperature", "speed").
    #[serde(default)]
    pub class: Option<String>,
}

/// One inbound ingestion message from a gateway device.
///
/// `values` maps a sensor key to a float or null; null values are skipped
/// during ingestion, not treated as errors. A `BTreeMap` keeps iteration in
/// key order, which makes per-payload processing deterministic.
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryPayload {
    pub device_id: String,

    pub vin: String,

    /// Device/event time (RFC3339). Defaults to ingestion time when absent.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,

    #[serde(default)]
    pub values: BTreeMap<String, Option<f64>>,

    /// Per-key unit/class hints, keyed like `values`.
    #[serde(default)]
    pub config: BTreeMap<String, ParameterHint>,
}

/// Structural payload rejection, raised before any processing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("device_id is required")]
    MissingDeviceId,

    #[error("vin is required")]
    MissingVin,
}

impl TelemetryPayload {
    /// Checks the identity fields the engine cannot proceed without.
    pub fn validate(&self) -> Result<(), PayloadError> {
        if self.device_id.trim().is_empty() {
            return Err(PayloadError::MissingDeviceId);
        }
        if self.vin.trim().is_empty() {
            return Err(PayloadError::MissingVin);
        }
        Ok(())
    }

    /// The hint for one key, if the gateway sent one.
    pub fn hint(&self, param_key: &str) -> Option<&ParameterHint> {
        self.config.get(param_key)
    }

    /// Event time, falling back to the current instant.
    pub fn event_time(&self) -> DateTime<Utc> {
        self.timestamp.unwrap_or_else(Utc::now)
    }
}
