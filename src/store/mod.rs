pub mod migrate;
pub mod sqlite;

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

/// Storage-layer error.
///
/// Connection and constraint failures propagate to the caller, which owns
/// retry policy. The one constraint the engine handles itself, the history
/// uniqueness index, is reported as [`InsertOutcome::Duplicate`] instead.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A stored row failed to decode (bad timestamp text, unknown enum tag).
    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("migration failed: {0}")]
    Migration(String),
}

/// Derived display bucket for a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterCategory {
    Temperature,
    Engine,
    Electrical,
    Other,
}

impl ParameterCategory {
    /// Canonical string representation for storage.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::Engine => "engine",
            Self::Electrical => "electrical",
            Self::Other => "other",
        }
    }

    /// Parses the stored representation.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "temperature" => Some(Self::Temperature),
            "engine" => Some(Self::Engine),
            "electrical" => Some(Self::Electrical),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

/// Persisted definition of a sensor parameter.
///
/// `param_key` is the vendor-assigned identifier (e.g. `"A6-Odometer"`,
/// `"ENGINE_RPM"`) and is immutable once created. `unit` and `param_class`
/// may be back-filled once if they arrive later, never overwritten.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDefinition {
    pub param_key: String,
    pub display_name: String,
    pub unit: Option<String>,
    pub param_class: Option<String>,
    pub category: ParameterCategory,
    pub warning_min: Option<f64>,
    pub warning_max: Option<f64>,
    pub show_on_dashboard: bool,
    pub archive_only: bool,
    /// Minimum seconds between stored history samples. 0 stores every
    /// admitted sample.
    pub storage_interval_secs: u32,
}

/// One historical telemetry sample. Never updated, only inserted and pruned.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryPoint {
    pub vin: String,
    pub device_id: String,
    pub param_key: String,
    pub value: f64,
    /// Device/event time.
    pub timestamp: DateTime<Utc>,
    /// Ingestion time.
    pub received_at: DateTime<Utc>,
}

/// Dashboard cache row: the most recent value per `(vin, param_key)`.
///
/// The only overwrite-in-place entity in the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct LatestValue {
    pub vin: String,
    pub param_key: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
}

/// Per-day rollup of history for one `(vin, param_key)`.
#[derive(Debug, Clone, PartialEq)]
pub struct DailySummary {
    pub vin: String,
    pub param_key: String,
    pub date: NaiveDate,
    pub min_value: f64,
    pub max_value: f64,
    pub avg_value: f64,
    pub sample_count: u32,
}

/// Origin of an odometer record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OdometerSource {
    /// Entered by a person; never overwritten by auto-sync.
    Manual,
    /// Auto-recorded from gateway telemetry; may advance in place same-day.
    Livelink,
}

impl OdometerSource {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Livelink => "livelink",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(Self::Manual),
            "livelink" => Some(Self::Livelink),
            _ => None,
        }
    }
}

/// One odometer reading per `(vin, date)`.
#[derive(Debug, Clone, PartialEq)]
pub struct OdometerRecord {
    pub vin: String,
    pub date: NaiveDate,
    pub mileage: f64,
    pub source: OdometerSource,
    pub notes: Option<String>,
}

/// Result of a history insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The `(device_id, param_key, timestamp)` uniqueness index matched an
    /// existing row. Treated as "already stored", not an error.
    Duplicate,
}

/// Handle to a telemetry store that can open transactions.
///
/// One transaction spans one payload: the dedup-hash check, cache upserts,
/// history inserts, and odometer sync for that payload commit or roll back
/// together.
pub trait TelemetryStore {
    type Txn<'a>: TelemetryTxn
    where
        Self: 'a;

    /// Opens a write transaction. Dropping the transaction without calling
    /// [`TelemetryTxn::commit`] rolls it back.
    fn begin(&self) -> Result<Self::Txn<'_>, StoreError>;
}

impl<S: TelemetryStore> TelemetryStore for &S {
    type Txn<'a>
        = S::Txn<'a>
    where
        Self: 'a;

    fn begin(&self) -> Result<Self::Txn<'_>, StoreError> {
        (**self).begin()
    }
}

impl<S: TelemetryStore> TelemetryStore for std::sync::Arc<S> {
    type Txn<'a>
        = S::Txn<'a>
    where
        Self: 'a;

    fn begin(&self) -> Result<Self::Txn<'_>, StoreError> {
        (**self).begin()
    }
}

/// The reads and writes the engine performs within one transaction.
pub trait TelemetryTxn {
    // --- Parameter registry ---

    fn parameter(&self, param_key: &str) -> Result<Option<ParameterDefinition>, StoreError>;

    fn insert_parameter(&self, def: &ParameterDefinition) -> Result<(), StoreError>;

    /// Fills `unit` / `param_class` / `category` only where currently unset
    /// (`category` only moves off `other`). Set fields are never overwritten.
    fn backfill_parameter(
        &self,
        param_key: &str,
        unit: Option<&str>,
        param_class: Option<&str>,
        category: ParameterCategory,
    ) -> Result<(), StoreError>;

    // --- Payload dedup ---

    fn last_payload_hash(&self, device_id: &str) -> Result<Option<String>, StoreError>;

    /// Records the fingerprint of the most recently accepted payload,
    /// creating the device row if it does not exist yet. The `vin` link is
    /// owned by vehicle management and left untouched here.
    fn record_payload_hash(&self, device_id: &str, fingerprint: &str) -> Result<(), StoreError>;

    // --- Latest-value cache ---

    fn latest_value(&self, vin: &str, param_key: &str) -> Result<Option<LatestValue>, StoreError>;

    fn upsert_latest_value(&self, latest: &LatestValue) -> Result<(), StoreError>;

    // --- History ---

    fn last_point_timestamp(
        &self,
        vin: &str,
        param_key: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError>;

    fn insert_point(&self, point: &TelemetryPoint) -> Result<InsertOutcome, StoreError>;

    fn point_count(&self, vin: &str, param_key: &str) -> Result<u64, StoreError>;

    /// Deletes history strictly older than `cutoff`. Returns rows deleted.
    fn prune_points_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    // --- Daily summaries ---

    /// Computes min/max/avg/count per `(vin, param_key)` over the day window
    /// `[midnight(date), midnight(date) + 1d)`, optionally filtered to one
    /// vehicle. Does not write anything.
    fn summarize_day(
        &self,
        date: NaiveDate,
        vin: Option<&str>,
    ) -> Result<Vec<DailySummary>, StoreError>;

    fn upsert_daily_summary(&self, summary: &DailySummary) -> Result<(), StoreError>;

    fn stored_daily_summaries(
        &self,
        vin: &str,
        date: NaiveDate,
    ) -> Result<Vec<DailySummary>, StoreError>;

    // --- Odometer collaborator ---

    /// Maximum mileage across the vehicle's odometer records, 0.0 if none.
    fn max_mileage(&self, vin: &str) -> Result<f64, StoreError>;

    fn odometer_record(
        &self,
        vin: &str,
        date: NaiveDate,
    ) -> Result<Option<OdometerRecord>, StoreError>;

    fn insert_odometer_record(&self, record: &OdometerRecord) -> Result<(), StoreError>;

    fn update_odometer_mileage(
        &self,
        vin: &str,
        date: NaiveDate,
        mileage: f64,
    ) -> Result<(), StoreError>;

    /// Commits the transaction.
    fn commit(self) -> Result<(), StoreError>;
}
