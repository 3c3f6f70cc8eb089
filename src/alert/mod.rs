use tracing::warn;

use crate::store::ParameterDefinition;

/// Which configured bound a value crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdKind {
    Min,
    Max,
}

impl ThresholdKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Min => "min",
            Self::Max => "max",
        }
    }
}

/// A threshold crossing, ready for handoff to the notifier.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdAlert {
    pub vin: String,
    /// Vehicle display name resolved through the directory, or the VIN
    /// itself when unknown.
    pub vehicle_name: String,
    pub param_key: String,
    pub parameter_name: String,
    pub value: f64,
    pub kind: ThresholdKind,
    pub threshold: f64,
    pub unit: Option<String>,
}

/// Compares a value against the parameter's configured bounds. The max
/// bound is checked first; at most one alert is produced.
pub fn evaluate(def: &ParameterDefinition, value: f64) -> Option<(ThresholdKind, f64)> {
    if let Some(max) = def.warning_max {
        if value > max {
            return Some((ThresholdKind::Max, max));
        }
    }
    if let Some(min) = def.warning_min {
        if value < min {
            return Some((ThresholdKind::Min, min));
        }
    }
    None
}

/// Resolves vehicle display names for alert text. Vehicle ownership lives
/// outside this engine.
pub trait VehicleDirectory: Send + Sync {
    fn display_name(&self, vin: &str) -> Option<String>;
}

/// A directory that knows nothing; alerts fall back to the raw VIN.
pub struct UnknownVehicles;

impl VehicleDirectory for UnknownVehicles {
    fn display_name(&self, _vin: &str) -> Option<String> {
        None
    }
}

/// Receives threshold crossings. Fire-and-forget from the engine's
/// perspective: cooldown and delivery failures are the notifier's problem
/// and never roll back ingestion.
pub trait Notifier: Send + Sync {
    fn notify_threshold(&self, alert: &ThresholdAlert);
}

/// Default notifier: a structured warning in the log stream.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify_threshold(&self, alert: &ThresholdAlert) {
        warn!(
            vehicle = %alert.vehicle_name,
            parameter = %alert.parameter_name,
            value = alert.value,
            kind = alert.kind.as_str(),
            threshold = alert.threshold,
            unit = alert.unit.as_deref().unwrap_or(""),
            "threshold alert",
        );
    }
}
