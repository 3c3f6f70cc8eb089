use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::alert::{self, Notifier, ThresholdAlert, VehicleDirectory};
use crate::dedup;
use crate::odometer::{self, OdometerRejection, SettingsProvider};
use crate::payload::TelemetryPayload;
use crate::registry::ParameterRegistry;
use crate::store::{
    LatestValue, StoreError, TelemetryPoint, TelemetryStore, TelemetryTxn,
};

/// Why a parameter in an accepted payload produced no writes at all.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// The value was null. Not an error; the key is simply passed over.
    NullValue,
    /// An odometer-like reading failed sanitization; neither the cache nor
    /// history sees it.
    OdometerRejected(OdometerRejection),
}

/// The decision trail for one ingested payload.
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    /// The payload matched the device's previous fingerprint and had zero
    /// side effects.
    pub duplicate: bool,
    /// Parameters whose history insert completed (a benign uniqueness
    /// duplicate counts: the value is durably stored either way).
    pub stored_count: usize,
    /// Parameters that updated the latest-value cache but were withheld
    /// from history by their sampling interval.
    pub throttled: Vec<String>,
    /// Parameters that produced no writes, with the reason.
    pub skipped: Vec<(String, SkipReason)>,
    /// Threshold crossings observed; dispatched after commit.
    pub alerts: Vec<ThresholdAlert>,
}

/// The ingestion orchestrator.
///
/// One [`ingest`](Self::ingest) call handles one inbound payload inside one
/// storage transaction: the dedup gate, the per-parameter
/// register/sanitize/cache/admit/store loop, and the payload-level odometer
/// auto-sync pass. Threshold alerts are evaluated inline but handed to the
/// notifier only after the transaction commits.
pub struct IngestionPipeline<S> {
    store: S,
    registry: ParameterRegistry,
    settings: Arc<dyn SettingsProvider>,
    vehicles: Arc<dyn VehicleDirectory>,
    notifier: Arc<dyn Notifier>,
}

impl<S: TelemetryStore> IngestionPipeline<S> {
    pub fn new(
        store: S,
        settings: Arc<dyn SettingsProvider>,
        vehicles: Arc<dyn VehicleDirectory>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            registry: ParameterRegistry::new(),
            settings,
            vehicles,
            notifier,
        }
    }

    /// Ingests one payload. Returns the decision trail; storage failures
    /// propagate to the caller, which owns retry policy.
    pub fn ingest(&self, payload: &TelemetryPayload) -> Result<IngestReport, StoreError> {
        let report = match self.ingest_txn(payload) {
            Ok(report) => report,
            Err(e) => {
                // The registry cache may have run ahead of the rolled-back
                // transaction; drop it so the two cannot disagree.
                self.registry.clear_cache();
                return Err(e);
            }
        };

        // Fire-and-forget: the notifier cannot roll back a committed payload.
        for alert in &report.alerts {
            self.notifier.notify_threshold(alert);
        }

        Ok(report)
    }

    fn ingest_txn(&self, payload: &TelemetryPayload) -> Result<IngestReport, StoreError> {
        let timestamp = payload.event_time();
        let received_at = Utc::now();
        let unit = self.settings.distance_unit();

        let txn = self.store.begin()?;

        // The only whole-payload reject decision: a retransmission has zero
        // side effects.
        let fingerprint = dedup::fingerprint(&payload.values);
        if dedup::is_duplicate(&txn, &payload.device_id, &fingerprint)? {
            debug!(
                device_id = %payload.device_id,
                %fingerprint,
                "duplicate payload, nothing to do",
            );
            txn.commit()?;
            return Ok(IngestReport {
                duplicate: true,
                ..IngestReport::default()
            });
        }

        let mut report = IngestReport::default();

        for (param_key, value) in &payload.values {
            let Some(raw) = *value else {
                report
                    .skipped
                    .push((param_key.clone(), SkipReason::NullValue));
                continue;
            };

            let def = self
                .registry
                .get_or_register(&txn, param_key, payload.hint(param_key))?;

            // Odometer-like signals are unit-converted and sanity-checked
            // before they may touch the cache or history.
            let value = if odometer::is_odometer_key(param_key) {
                let converted = odometer::convert_reading(param_key, raw, unit);
                match odometer::sanitize(converted, txn.max_mileage(&payload.vin)?) {
                    Ok(mileage) => mileage,
                    Err(rejection) => {
                        warn!(
                            vin = %payload.vin,
                            %param_key,
                            %rejection,
                            "implausible odometer reading skipped",
                        );
                        report
                            .skipped
                            .push((param_key.clone(), SkipReason::OdometerRejected(rejection)));
                        continue;
                    }
                }
            } else {
                raw
            };

            // The dashboard cache is always freshened, independent of
            // whether history admits this sample.
            txn.upsert_latest_value(&LatestValue {
                vin: payload.vin.clone(),
                param_key: param_key.clone(),
                value,
                timestamp,
                received_at,
            })?;

            if let Some((kind, threshold)) = alert::evaluate(&def, value) {
                let vehicle_name = self
                    .vehicles
                    .display_name(&payload.vin)
                    .unwrap_or_else(|| payload.vin.clone());
                report.alerts.push(ThresholdAlert {
                    vin: payload.vin.clone(),
                    vehicle_name,
                    param_key: param_key.clone(),
                    parameter_name: def.display_name.clone(),
                    value,
                    kind,
                    threshold,
                    unit: def.unit.clone(),
                });
            }

            // Sampling-interval admission. The read-then-write here has a
            // benign race under concurrent ingestion for the same vin+key;
            // the history uniqueness index is the only strict invariant.
            if def.storage_interval_secs > 0 {
                if let Some(last) = txn.last_point_timestamp(&payload.vin, param_key)? {
                    let elapsed = timestamp.signed_duration_since(last).num_seconds();
                    if elapsed < i64::from(def.storage_interval_secs) {
                        report.throttled.push(param_key.clone());
                        continue;
                    }
                }
            }

            txn.insert_point(&TelemetryPoint {
                vin: payload.vin.clone(),
                device_id: payload.device_id.clone(),
                param_key: param_key.clone(),
                value,
                timestamp,
                received_at,
            })?;
            report.stored_count += 1;
        }

        // Payload-level pass, once per payload regardless of how many
        // odometer keys were processed above.
        let sync = odometer::auto_sync(&txn, &payload.vin, &payload.values, timestamp, unit)?;
        debug!(vin = %payload.vin, ?sync, "odometer auto-sync");

        dedup::record_fingerprint(&txn, &payload.device_id, &fingerprint)?;
        txn.commit()?;

        debug!(
            device_id = %payload.device_id,
            vin = %payload.vin,
            stored = report.stored_count,
            throttled = report.throttled.len(),
            skipped = report.skipped.len(),
            "payload ingested",
        );

        Ok(report)
    }
}
