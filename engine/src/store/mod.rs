//! Metric store abstraction
//!
//! The engine persists samples, log entries and health records through
//! [`MetricStore`] and reads alert rules from it. Two implementations ship
//! with the crate: an in-memory store and a SQLite store.

mod memory;
mod sqlite;

pub use memory::{InMemoryMetricStore, StoreOp};
pub use sqlite::SqliteMetricStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreResult;
use crate::models::{AlertRule, LogLevel, MetricSample, MonitoringLogEntry, SourceKind, SystemHealthRecord};

/// Ordering of query results by `collected_at`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// Predicate over metric samples. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleFilter {
    pub source_kind: Option<SourceKind>,

    /// Exact instance name; `None` matches any instance
    pub source_name: Option<String>,

    pub metric_type: Option<String>,

    pub metric_name: Option<String>,

    pub organization_id: Option<Uuid>,

    /// Inclusive lower bound on `collected_at`
    pub from: Option<DateTime<Utc>>,

    /// Exclusive upper bound on `collected_at`
    pub to: Option<DateTime<Utc>>,
}

impl SampleFilter {
    pub fn matches(&self, sample: &MetricSample) -> bool {
        self.source_kind.map_or(true, |kind| sample.source_kind == kind)
            && self.source_name.as_ref().map_or(true, |name| &sample.source_name == name)
            && self.metric_type.as_ref().map_or(true, |t| &sample.metric_type == t)
            && self.metric_name.as_ref().map_or(true, |name| &sample.metric_name == name)
            && self.organization_id.map_or(true, |org| sample.organization_id == Some(org))
            && self.from.map_or(true, |from| sample.collected_at >= from)
            && self.to.map_or(true, |to| sample.collected_at < to)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleQuery {
    pub filter: SampleFilter,
    pub order: SortOrder,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl SampleQuery {
    /// Latest sample for a metric; an empty or absent instance name matches any instance
    pub fn latest(source_kind: SourceKind, source_name: Option<&str>, metric_name: &str) -> Self {
        Self {
            filter: SampleFilter {
                source_kind: Some(source_kind),
                source_name: source_name.filter(|name| !name.is_empty()).map(str::to_string),
                metric_name: Some(metric_name.to_string()),
                ..SampleFilter::default()
            },
            order: SortOrder::Descending,
            limit: Some(1),
            offset: 0,
        }
    }
}

/// Predicate over log entries; results are returned newest first
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogFilter {
    pub level: Option<LogLevel>,
    pub source: Option<String>,
    pub component: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl LogFilter {
    pub fn matches(&self, entry: &MonitoringLogEntry) -> bool {
        self.level.map_or(true, |level| entry.level == level)
            && self.source.as_ref().map_or(true, |source| &entry.source == source)
            && self
                .component
                .as_ref()
                .map_or(true, |component| entry.component.as_ref() == Some(component))
            && self.since.map_or(true, |since| entry.created_at >= since)
    }
}

/// Durable storage for everything the engine produces
#[async_trait]
pub trait MetricStore: Send + Sync {
    async fn insert_sample(&self, sample: &MetricSample) -> StoreResult<()> {
        self.insert_samples(std::slice::from_ref(sample)).await
    }

    /// Insert a batch; either every sample is stored or none is
    async fn insert_samples(&self, samples: &[MetricSample]) -> StoreResult<()>;

    async fn query_samples(&self, query: &SampleQuery) -> StoreResult<Vec<MetricSample>>;

    async fn latest_sample(
        &self,
        source_kind: SourceKind,
        source_name: Option<&str>,
        metric_name: &str,
    ) -> StoreResult<Option<MetricSample>> {
        let query = SampleQuery::latest(source_kind, source_name, metric_name);
        Ok(self.query_samples(&query).await?.into_iter().next())
    }

    async fn insert_log(&self, entry: &MonitoringLogEntry) -> StoreResult<()>;

    async fn query_logs(&self, filter: &LogFilter) -> StoreResult<Vec<MonitoringLogEntry>>;

    async fn list_rules(&self, enabled_only: bool) -> StoreResult<Vec<AlertRule>>;

    /// Insert or replace a rule by id
    async fn save_rule(&self, rule: &AlertRule) -> StoreResult<()>;

    /// Insert or update the record for `record.component_name`, keeping its id and `created_at`
    async fn upsert_health(&self, record: &SystemHealthRecord) -> StoreResult<()>;

    async fn list_health(&self) -> StoreResult<Vec<SystemHealthRecord>>;

    /// Delete samples with `created_at` strictly before `cutoff`
    ///
    /// Timestamps compare at microsecond granularity; callers should pass a
    /// cutoff truncated with [`to_store_precision`](crate::models::to_store_precision).
    async fn delete_samples_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<u64>;

    /// Delete log entries with `created_at` strictly before `cutoff`, at
    /// microsecond granularity
    async fn delete_logs_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<u64>;

    async fn ping(&self) -> StoreResult<()>;
}
