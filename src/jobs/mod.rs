use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::rollup::DailyAggregator;
use crate::store::{StoreError, TelemetryStore, TelemetryTxn};

/// Deletes history older than the retention horizon.
///
/// Only raw `telemetry_points` rows are eligible; the latest-value cache and
/// daily summaries are never touched. Idempotent: a second run with nothing
/// eligible deletes zero rows.
pub struct RetentionPruner<S> {
    store: S,
}

impl<S: TelemetryStore> RetentionPruner<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Prunes history older than `retention_days`. Returns rows deleted.
    pub fn prune(&self, retention_days: u32) -> Result<u64, StoreError> {
        self.prune_as_of(Utc::now(), retention_days)
    }

    fn prune_as_of(&self, now: DateTime<Utc>, retention_days: u32) -> Result<u64, StoreError> {
        let cutoff = now - TimeDelta::days(i64::from(retention_days));

        let txn = self.store.begin()?;
        let deleted = txn.prune_points_before(cutoff)?;
        txn.commit()?;

        info!(retention_days, deleted, "retention prune");
        Ok(deleted)
    }
}

/// Periodically runs the daily aggregation and the retention prune.
///
/// Both jobs stay idempotent and externally invocable one-shot; this runner
/// only provides cadence for deployments without an outside scheduler.
pub struct JobScheduler<S> {
    store: S,
    aggregation_interval: Duration,
    prune_interval: Duration,
    retention_days: u32,
}

impl<S> JobScheduler<S>
where
    S: TelemetryStore + Clone,
{
    pub fn new(
        store: S,
        aggregation_interval: Duration,
        prune_interval: Duration,
        retention_days: u32,
    ) -> Self {
        Self {
            store,
            aggregation_interval,
            prune_interval,
            retention_days,
        }
    }

    /// Runs until the token is cancelled. Each interval fires once
    /// immediately on startup, so a fresh deployment catches up right away.
    pub async fn run(self, cancel: CancellationToken) {
        let mut aggregate = tokio::time::interval(self.aggregation_interval);
        let mut prune = tokio::time::interval(self.prune_interval);
        aggregate.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        prune.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            aggregation_interval = ?self.aggregation_interval,
            prune_interval = ?self.prune_interval,
            retention_days = self.retention_days,
            "job scheduler started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("job scheduler stopped");
                    break;
                }
                _ = aggregate.tick() => {
                    self.aggregate_recent();
                }
                _ = prune.tick() => {
                    if let Err(e) = RetentionPruner::new(self.store.clone())
                        .prune(self.retention_days)
                    {
                        warn!(error = %e, "retention prune failed");
                    }
                }
            }
        }
    }

    /// Aggregates yesterday and today. Yesterday is included so the first
    /// run after midnight finalizes the completed day.
    fn aggregate_recent(&self) {
        let today = Utc::now().date_naive();
        let aggregator = DailyAggregator::new(self.store.clone());

        for date in [today.pred_opt(), Some(today)].into_iter().flatten() {
            if let Err(e) = aggregator.aggregate(date, None) {
                warn!(%date, error = %e, "daily aggregation failed");
            }
        }
    }
}
