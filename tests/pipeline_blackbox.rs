use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeDelta, TimeZone, Utc};

use livelink_ingest::alert::{LogNotifier, UnknownVehicles};
use livelink_ingest::jobs::RetentionPruner;
use livelink_ingest::odometer::{DistanceUnit, FixedSettings};
use livelink_ingest::payload::TelemetryPayload;
use livelink_ingest::pipeline::IngestionPipeline;
use livelink_ingest::rollup::DailyAggregator;
use livelink_ingest::store::sqlite::SqliteStore;
use livelink_ingest::store::{OdometerSource, TelemetryStore, TelemetryTxn};

const MILES_PER_KM: f64 = 0.621_371;

fn engine() -> (Arc<SqliteStore>, IngestionPipeline<Arc<SqliteStore>>) {
    let store = Arc::new(SqliteStore::open_in_memory().expect("open"));
    let pipeline = IngestionPipeline::new(
        Arc::clone(&store),
        Arc::new(FixedSettings(DistanceUnit::Miles)),
        Arc::new(UnknownVehicles),
        Arc::new(LogNotifier),
    );
    (store, pipeline)
}

fn payload(
    device_id: &str,
    vin: &str,
    timestamp: DateTime<Utc>,
    values: &[(&str, Option<f64>)],
) -> TelemetryPayload {
    TelemetryPayload {
        device_id: device_id.to_string(),
        vin: vin.to_string(),
        timestamp: Some(timestamp),
        values: values.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        config: BTreeMap::new(),
    }
}

fn ts(hour: u32, min: u32, sec: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 14, hour, min, sec).unwrap()
}

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 14).unwrap()
}

/// The concrete end-to-end scenario: device D1, vin V1, an RPM signal and a
/// standard-PID odometer, submitted twice.
#[test]
fn concrete_scenario_first_and_repeat_submission() {
    let (store, pipeline) = engine();
    // Use "now" so the odometer date guard does not clamp the record away
    // from the payload's day.
    let now = Utc::now();
    let msg = payload(
        "D1",
        "V1",
        now,
        &[("RPM", Some(1500.0)), ("A6-Odometer", Some(42.0))],
    );

    let first = pipeline.ingest(&msg).expect("first ingest");
    assert!(!first.duplicate);
    assert_eq!(first.stored_count, 2);

    let txn = store.begin().expect("begin");
    let rpm = txn.latest_value("V1", "RPM").expect("read").expect("cached");
    assert_eq!(rpm.value, 1500.0);

    // 42 km converted to miles per the system setting.
    let odo = txn
        .latest_value("V1", "A6-Odometer")
        .expect("read")
        .expect("cached");
    assert!((odo.value - 42.0 * MILES_PER_KM).abs() < 1e-9);

    let record = txn
        .odometer_record("V1", now.date_naive())
        .expect("read")
        .expect("created");
    assert_eq!(record.source, OdometerSource::Livelink);
    assert!((record.mileage - 42.0 * MILES_PER_KM).abs() < 1e-9);
    txn.commit().expect("commit");

    // Identical retransmission: hash matches, zero side effects.
    let second = pipeline.ingest(&msg).expect("second ingest");
    assert!(second.duplicate);
    assert_eq!(second.stored_count, 0);

    let txn = store.begin().expect("begin");
    assert_eq!(txn.point_count("V1", "RPM").expect("count"), 1);
    assert_eq!(txn.point_count("V1", "A6-Odometer").expect("count"), 1);
    let record = txn
        .odometer_record("V1", now.date_naive())
        .expect("read")
        .expect("still there");
    assert!((record.mileage - 42.0 * MILES_PER_KM).abs() < 1e-9);
    txn.commit().expect("commit");
}

/// Submitting at t, t+N-1, t+N with a sampling interval of N stores exactly
/// two points while the cache reflects every submission.
#[test]
fn admission_monotonicity() {
    let (store, pipeline) = engine();

    // An operator has already tuned this parameter's sampling interval.
    {
        let txn = store.begin().expect("begin");
        txn.insert_parameter(&livelink_ingest::store::ParameterDefinition {
            param_key: "SPEED_LIMITED".to_string(),
            display_name: "Speed Limited".to_string(),
            unit: Some("mph".to_string()),
            param_class: Some("speed".to_string()),
            category: livelink_ingest::store::ParameterCategory::Engine,
            warning_min: None,
            warning_max: None,
            show_on_dashboard: true,
            archive_only: false,
            storage_interval_secs: 60,
        })
        .expect("tuned parameter");
        txn.commit().expect("commit");
    }

    let samples = [
        (ts(10, 0, 0), 11.0, 1u64),
        (ts(10, 0, 59), 22.0, 1),
        (ts(10, 1, 0), 33.0, 2),
    ];

    for (timestamp, value, expected_points) in samples {
        pipeline
            .ingest(&payload(
                "D1",
                "V1",
                timestamp,
                &[("SPEED_LIMITED", Some(value))],
            ))
            .expect("ingest");

        let txn = store.begin().expect("begin");
        assert_eq!(
            txn.point_count("V1", "SPEED_LIMITED").expect("count"),
            expected_points,
            "at {timestamp}"
        );
        let cached = txn
            .latest_value("V1", "SPEED_LIMITED")
            .expect("read")
            .expect("cached");
        assert_eq!(cached.value, value, "cache at {timestamp}");
        txn.commit().expect("commit");
    }
}

/// Odometer records only ever advance, and manual records are immune.
#[test]
fn odometer_monotonic_forward() {
    let (store, pipeline) = engine();
    let now = Utc::now();

    let readings = [50_000.0, 49_000.0, 50_250.0, 50_100.0];
    let mut expected_max: f64 = 0.0;

    for (i, reading) in readings.into_iter().enumerate() {
        pipeline
            .ingest(&payload(
                "D1",
                "V1",
                now + TimeDelta::seconds(i as i64),
                &[("VEHICLE_ODOMETER", Some(reading))],
            ))
            .expect("ingest");

        expected_max = expected_max.max(reading);
        let txn = store.begin().expect("begin");
        assert_eq!(
            txn.max_mileage("V1").expect("max"),
            expected_max,
            "after reading {reading}"
        );
        txn.commit().expect("commit");
    }

    // A vehicle with a manual record for today: auto-sync must not touch it.
    {
        let txn = store.begin().expect("begin");
        txn.insert_odometer_record(&livelink_ingest::store::OdometerRecord {
            vin: "V2".to_string(),
            date: now.date_naive(),
            mileage: 10_000.0,
            source: OdometerSource::Manual,
            notes: None,
        })
        .expect("manual record");
        txn.commit().expect("commit");
    }

    pipeline
        .ingest(&payload(
            "D2",
            "V2",
            now,
            &[("VEHICLE_ODOMETER", Some(11_000.0))],
        ))
        .expect("ingest");

    let txn = store.begin().expect("begin");
    let record = txn
        .odometer_record("V2", now.date_naive())
        .expect("read")
        .expect("manual record");
    assert_eq!(record.mileage, 10_000.0);
    assert_eq!(record.source, OdometerSource::Manual);
    txn.commit().expect("commit");
}

/// The documented bounds: the absolute cap and the forward-jump guard.
#[test]
fn odometer_bounds() {
    let (store, pipeline) = engine();
    let now = Utc::now();

    // Establish max = 50,000.
    pipeline
        .ingest(&payload("D1", "V1", now, &[("ODO", Some(50_000.0))]))
        .expect("seed");

    // max + 10,001 is rejected; max + 5,000 is accepted.
    let report = pipeline
        .ingest(&payload(
            "D1",
            "V1",
            now + TimeDelta::seconds(1),
            &[("ODO", Some(60_001.0))],
        ))
        .expect("ingest");
    assert_eq!(report.stored_count, 0);
    assert_eq!(report.skipped.len(), 1);

    let report = pipeline
        .ingest(&payload(
            "D1",
            "V1",
            now + TimeDelta::seconds(2),
            &[("ODO", Some(55_000.0))],
        ))
        .expect("ingest");
    assert_eq!(report.stored_count, 1);

    // The absolute cap applies regardless of history.
    let report = pipeline
        .ingest(&payload(
            "D1",
            "V1",
            now + TimeDelta::seconds(3),
            &[("ODO", Some(1_000_001.0))],
        ))
        .expect("ingest");
    assert_eq!(report.stored_count, 0);

    let txn = store.begin().expect("begin");
    assert_eq!(txn.max_mileage("V1").expect("max"), 55_000.0);
    txn.commit().expect("commit");
}

/// Re-running aggregation with no new data produces identical rows.
#[test]
fn aggregation_idempotence() {
    let (store, pipeline) = engine();

    for (sec, value) in [(0, 40.0), (10, 80.0), (20, 60.0)] {
        pipeline
            .ingest(&payload("D1", "V1", ts(9, 0, sec), &[("SPEED", Some(value))]))
            .expect("ingest");
    }

    let aggregator = DailyAggregator::new(Arc::clone(&store));
    assert_eq!(aggregator.aggregate(date(), None).expect("first"), 1);

    let txn = store.begin().expect("begin");
    let first = txn.stored_daily_summaries("V1", date()).expect("read");
    txn.commit().expect("commit");

    assert_eq!(aggregator.aggregate(date(), None).expect("second"), 1);

    let txn = store.begin().expect("begin");
    let second = txn.stored_daily_summaries("V1", date()).expect("read");
    txn.commit().expect("commit");

    assert_eq!(first, second);
    assert_eq!(first[0].min_value, 40.0);
    assert_eq!(first[0].max_value, 80.0);
    assert_eq!(first[0].avg_value, 60.0);
    assert_eq!(first[0].sample_count, 3);
}

/// Pruning deletes only old history; cache, summaries, and odometer records
/// survive, and the second run deletes nothing.
#[test]
fn retention_safety() {
    let (store, pipeline) = engine();
    let now = Utc::now();
    let old = now - TimeDelta::days(45);

    pipeline
        .ingest(&payload("D1", "V1", old, &[("SPEED", Some(30.0))]))
        .expect("old ingest");
    pipeline
        .ingest(&payload("D1", "V1", now, &[("SPEED", Some(60.0))]))
        .expect("fresh ingest");

    let aggregator = DailyAggregator::new(Arc::clone(&store));
    aggregator
        .aggregate(old.date_naive(), None)
        .expect("aggregate old day");

    let pruner = RetentionPruner::new(Arc::clone(&store));
    assert_eq!(pruner.prune(30).expect("prune"), 1);
    assert_eq!(pruner.prune(30).expect("re-prune"), 0);

    let txn = store.begin().expect("begin");
    assert_eq!(txn.point_count("V1", "SPEED").expect("count"), 1);
    assert!(txn.latest_value("V1", "SPEED").expect("latest").is_some());
    assert_eq!(
        txn.stored_daily_summaries("V1", old.date_naive())
            .expect("summaries")
            .len(),
        1
    );
    txn.commit().expect("commit");
}

/// Two devices interleaving payloads do not disturb each other's dedup
/// state.
#[test]
fn dedup_is_per_device() {
    let (_store, pipeline) = engine();
    let msg_a = payload("D1", "V1", ts(9, 0, 0), &[("SPEED", Some(30.0))]);
    let msg_b = payload("D2", "V2", ts(9, 0, 0), &[("SPEED", Some(30.0))]);

    assert!(!pipeline.ingest(&msg_a).expect("a1").duplicate);
    assert!(!pipeline.ingest(&msg_b).expect("b1").duplicate);
    assert!(pipeline.ingest(&msg_a).expect("a2").duplicate);
    assert!(pipeline.ingest(&msg_b).expect("b2").duplicate);

    // A changed value breaks the duplicate chain.
    let msg_a2 = payload("D1", "V1", ts(9, 0, 5), &[("SPEED", Some(31.0))]);
    assert!(!pipeline.ingest(&msg_a2).expect("a3").duplicate);
}
