use chrono::NaiveDate;
use tracing::info;

use crate::store::{StoreError, TelemetryStore, TelemetryTxn};

/// Rolls one day of history up into per-`(vin, param_key)` summaries.
///
/// Idempotent: re-running for the same date recomputes and overwrites, which
/// is what backfill and repair rely on.
pub struct DailyAggregator<S> {
    store: S,
}

impl<S: TelemetryStore> DailyAggregator<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Aggregates the given calendar day, optionally restricted to one
    /// vehicle. Returns the number of summary rows upserted.
    pub fn aggregate(&self, date: NaiveDate, vin: Option<&str>) -> Result<usize, StoreError> {
        let txn = self.store.begin()?;

        let summaries = txn.summarize_day(date, vin)?;
        for summary in &summaries {
            txn.upsert_daily_summary(summary)?;
        }

        txn.commit()?;

        info!(%date, vin = vin.unwrap_or("*"), rows = summaries.len(), "daily aggregation");
        Ok(summaries.len())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};

    use super::*;
    use crate::store::sqlite::SqliteStore;
    use crate::store::TelemetryPoint;

    fn ts(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0).unwrap()
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, day).unwrap()
    }

    fn seed(store: &SqliteStore, vin: &str, key: &str, samples: &[(u32, u32, f64)]) {
        let txn = store.begin().expect("begin");
        for (day, hour, value) in samples {
            txn.insert_point(&TelemetryPoint {
                vin: vin.to_string(),
                device_id: format!("dev-{vin}"),
                param_key: key.to_string(),
                value: *value,
                timestamp: ts(*day, *hour),
                received_at: ts(*day, *hour),
            })
            .expect("insert");
        }
        txn.commit().expect("commit");
    }

    #[test]
    fn test_aggregate_computes_min_max_avg_count() {
        let store = SqliteStore::open_in_memory().expect("open");
        seed(&store, "V1", "SPEED", &[(14, 8, 30.0), (14, 12, 70.0), (14, 18, 50.0)]);
        seed(&store, "V1", "ENGINE_RPM", &[(14, 8, 2000.0)]);
        // Next day is out of the window.
        seed(&store, "V1", "TRIP", &[(15, 8, 1.0)]);

        let aggregator = DailyAggregator::new(&store);
        let rows = aggregator.aggregate(date(14), None).expect("aggregate");
        assert_eq!(rows, 2);

        let txn = store.begin().expect("begin");
        let stored = txn.stored_daily_summaries("V1", date(14)).expect("read");
        txn.commit().expect("commit");

        assert_eq!(stored.len(), 2);
        let speed = stored
            .iter()
            .find(|s| s.param_key == "SPEED")
            .expect("speed summary");
        assert_eq!(speed.min_value, 30.0);
        assert_eq!(speed.max_value, 70.0);
        assert_eq!(speed.avg_value, 50.0);
        assert_eq!(speed.sample_count, 3);
    }

    #[test]
    fn test_aggregate_is_idempotent() {
        let store = SqliteStore::open_in_memory().expect("open");
        seed(&store, "V1", "SPEED", &[(14, 8, 30.0), (14, 12, 70.0)]);

        let aggregator = DailyAggregator::new(&store);
        aggregator.aggregate(date(14), None).expect("first run");

        let txn = store.begin().expect("begin");
        let first = txn.stored_daily_summaries("V1", date(14)).expect("read");
        txn.commit().expect("commit");

        aggregator.aggregate(date(14), None).expect("second run");

        let txn = store.begin().expect("begin");
        let second = txn.stored_daily_summaries("V1", date(14)).expect("read");
        txn.commit().expect("commit");

        assert_eq!(first, second);
    }

    #[test]
    fn test_aggregate_vin_filter() {
        let store = SqliteStore::open_in_memory().expect("open");
        seed(&store, "V1", "SPEED", &[(14, 8, 30.0)]);
        seed(&store, "V2", "SPEED", &[(14, 8, 90.0)]);

        let aggregator = DailyAggregator::new(&store);
        let rows = aggregator.aggregate(date(14), Some("V2")).expect("aggregate");
        assert_eq!(rows, 1);

        let txn = store.begin().expect("begin");
        assert!(txn.stored_daily_summaries("V1", date(14)).expect("read").is_empty());
        assert_eq!(txn.stored_daily_summaries("V2", date(14)).expect("read").len(), 1);
        txn.commit().expect("commit");
    }

    #[test]
    fn test_aggregate_empty_day() {
        let store = SqliteStore::open_in_memory().expect("open");
        let aggregator = DailyAggregator::new(&store);
        assert_eq!(aggregator.aggregate(date(14), None).expect("aggregate"), 0);
    }
}
