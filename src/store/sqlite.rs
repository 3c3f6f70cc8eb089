use std::path::Path;

use chrono::{DateTime, Days, NaiveDate, NaiveTime, SecondsFormat, Utc};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{params, Connection, OptionalExtension};

use super::migrate;
use super::{
    DailySummary, InsertOutcome, LatestValue, OdometerRecord, OdometerSource, ParameterCategory,
    ParameterDefinition, StoreError, TelemetryPoint, TelemetryStore, TelemetryTxn,
};

/// SQLite-backed telemetry store.
///
/// A single connection behind a mutex: [`TelemetryStore::begin`] takes the
/// lock for the duration of the transaction, so one payload's writes commit
/// or roll back atomically relative to any concurrent payload.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (creating if needed) a database file and applies pending
    /// migrations.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        migrate::up(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Opens an in-memory database with the full schema. Used in tests and
    /// for ephemeral embedding.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        migrate::up(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

}

impl TelemetryStore for SqliteStore {
    type Txn<'a> = SqliteTxn<'a>;

    fn begin(&self) -> Result<SqliteTxn<'_>, StoreError> {
        let conn = self.conn.lock();
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(SqliteTxn {
            conn,
            committed: false,
        })
    }
}

/// One open transaction. Rolls back on drop unless committed.
pub struct SqliteTxn<'a> {
    conn: MutexGuard<'a, Connection>,
    committed: bool,
}

impl Drop for SqliteTxn<'_> {
    fn drop(&mut self) {
        if !self.committed {
            let _ = self.conn.execute_batch("ROLLBACK");
        }
    }
}

// --- Row codecs ---

/// Timestamps are stored as fixed-width RFC3339 UTC text so that
/// lexicographic comparison in SQL matches chronological order.
fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_ts(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp {s:?}: {e}")))
}

fn encode_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn decode_date(s: &str) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| StoreError::Corrupt(format!("bad date {s:?}: {e}")))
}

fn decode_category(s: &str) -> Result<ParameterCategory, StoreError> {
    ParameterCategory::from_str(s)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown parameter category {s:?}")))
}

fn decode_source(s: &str) -> Result<OdometerSource, StoreError> {
    OdometerSource::from_str(s)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown odometer source {s:?}")))
}

/// UTC midnight bounds of the given calendar day.
fn day_window(date: NaiveDate) -> Result<(DateTime<Utc>, DateTime<Utc>), StoreError> {
    let start = date.and_time(NaiveTime::MIN).and_utc();
    let next = date
        .checked_add_days(Days::new(1))
        .ok_or_else(|| StoreError::Corrupt(format!("date out of range: {date}")))?;
    Ok((start, next.and_time(NaiveTime::MIN).and_utc()))
}

impl TelemetryTxn for SqliteTxn<'_> {
    fn parameter(&self, param_key: &str) -> Result<Option<ParameterDefinition>, StoreError> {
        type Row = (
            String,
            String,
            Option<String>,
            Option<String>,
            String,
            Option<f64>,
            Option<f64>,
            bool,
            bool,
            u32,
        );

        let row: Option<Row> = self
            .conn
            .query_row(
                "SELECT param_key, display_name, unit, param_class, category,
                        warning_min, warning_max, show_on_dashboard, archive_only,
                        storage_interval_secs
                 FROM parameters WHERE param_key = ?1",
                [param_key],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                        row.get(8)?,
                        row.get(9)?,
                    ))
                },
            )
            .optional()?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(ParameterDefinition {
            param_key: row.0,
            display_name: row.1,
            unit: row.2,
            param_class: row.3,
            category: decode_category(&row.4)?,
            warning_min: row.5,
            warning_max: row.6,
            show_on_dashboard: row.7,
            archive_only: row.8,
            storage_interval_secs: row.9,
        }))
    }

    fn insert_parameter(&self, def: &ParameterDefinition) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO parameters
                 (param_key, display_name, unit, param_class, category,
                  warning_min, warning_max, show_on_dashboard, archive_only,
                  storage_interval_secs)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                def.param_key,
                def.display_name,
                def.unit,
                def.param_class,
                def.category.as_str(),
                def.warning_min,
                def.warning_max,
                def.show_on_dashboard,
                def.archive_only,
                def.storage_interval_secs,
            ],
        )?;
        Ok(())
    }

    fn backfill_parameter(
        &self,
        param_key: &str,
        unit: Option<&str>,
        param_class: Option<&str>,
        category: ParameterCategory,
    ) -> Result<(), StoreError> {
        // COALESCE keeps already-set metadata; category only moves off the
        // default bucket.
        self.conn.execute(
            "UPDATE parameters SET
                 unit = COALESCE(unit, ?2),
                 param_class = COALESCE(param_class, ?3),
                 category = CASE WHEN category = 'other' THEN ?4 ELSE category END
             WHERE param_key = ?1",
            params![param_key, unit, param_class, category.as_str()],
        )?;
        Ok(())
    }

    fn last_payload_hash(&self, device_id: &str) -> Result<Option<String>, StoreError> {
        let hash: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT last_payload_hash FROM devices WHERE device_id = ?1",
                [device_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hash.flatten())
    }

    fn record_payload_hash(&self, device_id: &str, fingerprint: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO devices (device_id, last_payload_hash) VALUES (?1, ?2)
             ON CONFLICT (device_id) DO UPDATE SET
                 last_payload_hash = excluded.last_payload_hash",
            params![device_id, fingerprint],
        )?;
        Ok(())
    }

    fn latest_value(&self, vin: &str, param_key: &str) -> Result<Option<LatestValue>, StoreError> {
        let row: Option<(f64, String, String)> = self
            .conn
            .query_row(
                "SELECT value, timestamp, received_at FROM latest_values
                 WHERE vin = ?1 AND param_key = ?2",
                params![vin, param_key],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((value, timestamp, received_at)) = row else {
            return Ok(None);
        };

        Ok(Some(LatestValue {
            vin: vin.to_string(),
            param_key: param_key.to_string(),
            value,
            timestamp: decode_ts(&timestamp)?,
            received_at: decode_ts(&received_at)?,
        }))
    }

    fn upsert_latest_value(&self, latest: &LatestValue) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO latest_values (vin, param_key, value, timestamp, received_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (vin, param_key) DO UPDATE SET
                 value = excluded.value,
                 timestamp = excluded.timestamp,
                 received_at = excluded.received_at",
            params![
                latest.vin,
                latest.param_key,
                latest.value,
                encode_ts(latest.timestamp),
                encode_ts(latest.received_at),
            ],
        )?;
        Ok(())
    }

    fn last_point_timestamp(
        &self,
        vin: &str,
        param_key: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let ts: Option<String> = self
            .conn
            .query_row(
                "SELECT MAX(timestamp) FROM telemetry_points
                 WHERE vin = ?1 AND param_key = ?2",
                params![vin, param_key],
                |row| row.get(0),
            )
            .optional()?
            .flatten();

        ts.as_deref().map(decode_ts).transpose()
    }

    fn insert_point(&self, point: &TelemetryPoint) -> Result<InsertOutcome, StoreError> {
        let changed = self.conn.execute(
            "INSERT INTO telemetry_points
                 (vin, device_id, param_key, value, timestamp, received_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (device_id, param_key, timestamp) DO NOTHING",
            params![
                point.vin,
                point.device_id,
                point.param_key,
                point.value,
                encode_ts(point.timestamp),
                encode_ts(point.received_at),
            ],
        )?;

        Ok(if changed == 0 {
            InsertOutcome::Duplicate
        } else {
            InsertOutcome::Inserted
        })
    }

    fn point_count(&self, vin: &str, param_key: &str) -> Result<u64, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM telemetry_points WHERE vin = ?1 AND param_key = ?2",
            params![vin, param_key],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn prune_points_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let deleted = self.conn.execute(
            "DELETE FROM telemetry_points WHERE timestamp < ?1",
            [encode_ts(cutoff)],
        )?;
        Ok(deleted as u64)
    }

    fn summarize_day(
        &self,
        date: NaiveDate,
        vin: Option<&str>,
    ) -> Result<Vec<DailySummary>, StoreError> {
        let (start, end) = day_window(date)?;
        let start = encode_ts(start);
        let end = encode_ts(end);

        let mut sql = String::from(
            "SELECT vin, param_key, MIN(value), MAX(value), AVG(value), COUNT(*)
             FROM telemetry_points
             WHERE timestamp >= ?1 AND timestamp < ?2",
        );
        let mut bind: Vec<&dyn rusqlite::ToSql> = vec![&start, &end];
        if let Some(ref vin) = vin {
            sql.push_str(" AND vin = ?3");
            bind.push(vin);
        }
        sql.push_str(" GROUP BY vin, param_key ORDER BY vin, param_key");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(bind.as_slice(), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (vin, param_key, min_value, max_value, avg_value, count) = row?;
            out.push(DailySummary {
                vin,
                param_key,
                date,
                min_value,
                max_value,
                avg_value,
                sample_count: count as u32,
            });
        }
        Ok(out)
    }

    fn upsert_daily_summary(&self, summary: &DailySummary) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO daily_summaries
                 (vin, param_key, date, min_value, max_value, avg_value, sample_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (vin, param_key, date) DO UPDATE SET
                 min_value = excluded.min_value,
                 max_value = excluded.max_value,
                 avg_value = excluded.avg_value,
                 sample_count = excluded.sample_count",
            params![
                summary.vin,
                summary.param_key,
                encode_date(summary.date),
                summary.min_value,
                summary.max_value,
                summary.avg_value,
                summary.sample_count,
            ],
        )?;
        Ok(())
    }

    fn stored_daily_summaries(
        &self,
        vin: &str,
        date: NaiveDate,
    ) -> Result<Vec<DailySummary>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT param_key, min_value, max_value, avg_value, sample_count
             FROM daily_summaries
             WHERE vin = ?1 AND date = ?2
             ORDER BY param_key",
        )?;

        let rows = stmt.query_map(params![vin, encode_date(date)], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (param_key, min_value, max_value, avg_value, count) = row?;
            out.push(DailySummary {
                vin: vin.to_string(),
                param_key,
                date,
                min_value,
                max_value,
                avg_value,
                sample_count: count as u32,
            });
        }
        Ok(out)
    }

    fn max_mileage(&self, vin: &str) -> Result<f64, StoreError> {
        let max: f64 = self.conn.query_row(
            "SELECT COALESCE(MAX(mileage), 0.0) FROM odometer_records WHERE vin = ?1",
            [vin],
            |row| row.get(0),
        )?;
        Ok(max)
    }

    fn odometer_record(
        &self,
        vin: &str,
        date: NaiveDate,
    ) -> Result<Option<OdometerRecord>, StoreError> {
        let row: Option<(f64, String, Option<String>)> = self
            .conn
            .query_row(
                "SELECT mileage, source, notes FROM odometer_records
                 WHERE vin = ?1 AND date = ?2",
                params![vin, encode_date(date)],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((mileage, source, notes)) = row else {
            return Ok(None);
        };

        Ok(Some(OdometerRecord {
            vin: vin.to_string(),
            date,
            mileage,
            source: decode_source(&source)?,
            notes,
        }))
    }

    fn insert_odometer_record(&self, record: &OdometerRecord) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO odometer_records (vin, date, mileage, source, notes)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.vin,
                encode_date(record.date),
                record.mileage,
                record.source.as_str(),
                record.notes,
            ],
        )?;
        Ok(())
    }

    fn update_odometer_mileage(
        &self,
        vin: &str,
        date: NaiveDate,
        mileage: f64,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE odometer_records SET mileage = ?3 WHERE vin = ?1 AND date = ?2",
            params![vin, encode_date(date), mileage],
        )?;
        Ok(())
    }

    fn commit(mut self) -> Result<(), StoreError> {
        self.conn.execute_batch("COMMIT")?;
        self.committed = true;
        Ok(())
    }
}
