//! Retention cleanup
//!
//! Samples and log entries created before `now - retention_days` are
//! deleted. The two deletes are independent: a failure on one table does
//! not undo the other.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::{ConfigError, MonitorError, Result, StoreError};
use crate::metrics::EngineMetrics;
use crate::models::to_store_precision;
use crate::store::MetricStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub cutoff: DateTime<Utc>,
    pub samples_deleted: u64,
    pub logs_deleted: u64,
}

pub struct RetentionCleaner {
    store: Arc<dyn MetricStore>,
    retention_days: u32,
    metrics: EngineMetrics,
}

impl RetentionCleaner {
    pub fn new(store: Arc<dyn MetricStore>, retention_days: u32, metrics: EngineMetrics) -> Self {
        Self {
            store,
            retention_days,
            metrics,
        }
    }

    /// `now - retention_days`, truncated to the stores' microsecond granularity
    pub fn cutoff_at(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        Duration::try_days(i64::from(self.retention_days))
            .and_then(|horizon| now.checked_sub_signed(horizon))
            .map(to_store_precision)
            .ok_or_else(|| {
                MonitorError::Config(ConfigError::InvalidValue {
                    field: "monitoring.retention_days".to_string(),
                    value: self.retention_days.to_string(),
                })
            })
    }

    /// Delete everything older than the retention horizon
    pub async fn cleanup(&self) -> Result<CleanupReport> {
        let cutoff = self.cutoff_at(Utc::now())?;
        self.cleanup_before(cutoff).await
    }

    /// Delete rows created strictly before `cutoff`
    ///
    /// Both tables are always attempted; any failure is returned afterwards.
    pub async fn cleanup_before(&self, cutoff: DateTime<Utc>) -> Result<CleanupReport> {
        info!(
            "Cleaning up data older than {} days (cutoff: {})",
            self.retention_days,
            cutoff.format("%Y-%m-%d %H:%M:%S")
        );

        let samples = self.store.delete_samples_older_than(cutoff).await;
        let logs = self.store.delete_logs_older_than(cutoff).await;

        let mut failures = Vec::new();
        let samples_deleted = match samples {
            Ok(count) => {
                self.metrics.record_rows_deleted("resource_metrics", count);
                count
            }
            Err(e) => {
                error!("Failed to clean up resource metrics: {}", e);
                failures.push(format!("resource_metrics: {}", e));
                0
            }
        };
        let logs_deleted = match logs {
            Ok(count) => {
                self.metrics.record_rows_deleted("monitoring_logs", count);
                count
            }
            Err(e) => {
                error!("Failed to clean up monitoring logs: {}", e);
                failures.push(format!("monitoring_logs: {}", e));
                0
            }
        };

        if !failures.is_empty() {
            return Err(MonitorError::Store(StoreError::Database {
                reason: format!("retention cleanup failed for {}", failures.join("; ")),
            }));
        }

        info!(
            "Data cleanup completed: {} samples and {} log entries deleted",
            samples_deleted, logs_deleted
        );
        Ok(CleanupReport {
            cutoff,
            samples_deleted,
            logs_deleted,
        })
    }
}
