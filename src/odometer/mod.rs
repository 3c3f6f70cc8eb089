use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::store::{OdometerRecord, OdometerSource, StoreError, TelemetryTxn};

/// Key substrings (matched case-insensitively) identifying odometer-like
/// parameters. `"A6-"` is the standard OBD2 PID 0xA6 prefix.
pub const ODOMETER_MARKERS: &[&str] = &[
    "A6-",
    "ODOMETER",
    "ODO",
    "MILEAGE",
    "DISTANCE_TOTAL",
    "TOTAL_DISTANCE",
];

/// Absolute plausibility cap: no road vehicle reads past this.
const MAX_PLAUSIBLE_MILEAGE: f64 = 1_000_000.0;

/// Maximum believable forward jump past the recorded maximum. Guards against
/// integer/overflow glitches such as a PID momentarily reporting 0xFFFFFF.
const MAX_FORWARD_JUMP: f64 = 10_000.0;

const MILES_PER_KM: f64 = 0.621_371;

/// Distance unit configured for the installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceUnit {
    Miles,
    Kilometers,
}

impl DistanceUnit {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Miles => "miles",
            Self::Kilometers => "kilometers",
        }
    }

    /// Converts a kilometer reading into this unit.
    pub fn from_km(self, km: f64) -> f64 {
        match self {
            Self::Kilometers => km,
            Self::Miles => km * MILES_PER_KM,
        }
    }
}

/// Read-only source of the installation's distance-unit setting. The
/// setting itself is owned by system configuration, outside this engine.
pub trait SettingsProvider: Send + Sync {
    fn distance_unit(&self) -> DistanceUnit;
}

/// A fixed distance-unit setting, typically seeded from configuration.
pub struct FixedSettings(pub DistanceUnit);

impl SettingsProvider for FixedSettings {
    fn distance_unit(&self) -> DistanceUnit {
        self.0
    }
}

/// Whether a sensor key carries an odometer-like reading.
pub fn is_odometer_key(param_key: &str) -> bool {
    let upper = param_key.to_uppercase();
    ODOMETER_MARKERS.iter().any(|m| upper.contains(m))
}

/// Whether the key is the standard PID 0xA6 form, which per spec always
/// reports kilometers.
pub fn is_standard_pid_key(param_key: &str) -> bool {
    param_key.to_uppercase().contains("A6-")
}

/// Converts a raw odometer reading into the configured unit. Standard-PID
/// keys report kilometers; everything else is taken as already configured.
pub fn convert_reading(param_key: &str, raw: f64, unit: DistanceUnit) -> f64 {
    if is_standard_pid_key(param_key) {
        unit.from_km(raw)
    } else {
        raw
    }
}

/// Why an odometer reading was refused.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum OdometerRejection {
    #[error("reading {mileage} is not positive")]
    NonPositive { mileage: f64 },

    #[error("reading {mileage} exceeds the absolute plausibility cap")]
    AboveAbsoluteCap { mileage: f64 },

    #[error("reading {mileage} jumps too far past recorded max {current_max}")]
    JumpExceedsGuard { mileage: f64, current_max: f64 },
}

/// Validates a unit-converted odometer reading against physical plausibility
/// and the vehicle's recorded maximum.
///
/// Shared by the inline per-value check (gates caching/storing the raw
/// signal) and the payload-level auto-sync pass (gates the odometer record
/// write).
pub fn sanitize(mileage: f64, current_max: f64) -> Result<f64, OdometerRejection> {
    if mileage <= 0.0 {
        return Err(OdometerRejection::NonPositive { mileage });
    }
    if mileage > MAX_PLAUSIBLE_MILEAGE {
        return Err(OdometerRejection::AboveAbsoluteCap { mileage });
    }
    if current_max > 0.0 && mileage > current_max + MAX_FORWARD_JUMP {
        return Err(OdometerRejection::JumpExceedsGuard {
            mileage,
            current_max,
        });
    }
    Ok(mileage)
}

/// What the auto-sync pass decided for one payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SyncOutcome {
    /// No odometer-like key with a value was present.
    NoOdometerKey,
    /// The reading failed sanitization.
    Rejected(OdometerRejection),
    /// The reading did not advance past the recorded maximum.
    NotForward,
    /// A manual record owns this date; left untouched.
    ManualUntouched,
    /// An existing livelink record was advanced in place.
    Updated(f64),
    /// A new livelink record was created.
    Created(f64),
}

/// Payload-level odometer auto-sync: picks the odometer key, sanitizes the
/// reading, and upserts the day's odometer record. Only ever advances the
/// odometer forward.
///
/// When several odometer-like keys appear, the lexicographically smallest
/// wins; the map is ordered, so selection is deterministic.
pub fn auto_sync<T: TelemetryTxn>(
    txn: &T,
    vin: &str,
    values: &BTreeMap<String, Option<f64>>,
    timestamp: DateTime<Utc>,
    unit: DistanceUnit,
) -> Result<SyncOutcome, StoreError> {
    auto_sync_at(txn, vin, values, timestamp, unit, Utc::now().date_naive())
}

fn auto_sync_at<T: TelemetryTxn>(
    txn: &T,
    vin: &str,
    values: &BTreeMap<String, Option<f64>>,
    timestamp: DateTime<Utc>,
    unit: DistanceUnit,
    today: NaiveDate,
) -> Result<SyncOutcome, StoreError> {
    let Some((param_key, raw)) = values
        .iter()
        .find_map(|(k, v)| v.filter(|_| is_odometer_key(k)).map(|v| (k.as_str(), v)))
    else {
        return Ok(SyncOutcome::NoOdometerKey);
    };

    let mileage = convert_reading(param_key, raw, unit);
    let current_max = txn.max_mileage(vin)?;

    let mileage = match sanitize(mileage, current_max) {
        Ok(m) => m,
        Err(rejection) => {
            warn!(vin, param_key, %rejection, "odometer auto-sync rejected reading");
            return Ok(SyncOutcome::Rejected(rejection));
        }
    };

    if mileage <= current_max {
        debug!(vin, mileage, current_max, "odometer reading does not advance");
        return Ok(SyncOutcome::NotForward);
    }

    // Clock-skew guard: never record a future date.
    let date = timestamp.date_naive().min(today);

    match txn.odometer_record(vin, date)? {
        Some(existing) => match existing.source {
            OdometerSource::Manual => {
                debug!(vin, %date, "manual odometer record left untouched");
                Ok(SyncOutcome::ManualUntouched)
            }
            OdometerSource::Livelink => {
                txn.update_odometer_mileage(vin, date, mileage)?;
                debug!(vin, %date, mileage, "advanced odometer record");
                Ok(SyncOutcome::Updated(mileage))
            }
        },
        None => {
            txn.insert_odometer_record(&OdometerRecord {
                vin: vin.to_string(),
                date,
                mileage,
                source: OdometerSource::Livelink,
                notes: Some(format!("Auto-recorded from {param_key}")),
            })?;
            info!(vin, %date, mileage, param_key, "created odometer record");
            Ok(SyncOutcome::Created(mileage))
        }
    }
}
