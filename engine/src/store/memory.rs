use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{LogFilter, MetricStore, SampleQuery, SortOrder};
use crate::error::{StoreError, StoreResult};
use crate::models::{AlertRule, MetricSample, MonitoringLogEntry, SystemHealthRecord};

/// Store operations that can be made to fail on demand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    InsertSamples,
    QuerySamples,
    InsertLog,
    ListRules,
    UpsertHealth,
    DeleteSamples,
    DeleteLogs,
    Ping,
}

#[derive(Default)]
struct Tables {
    samples: Vec<MetricSample>,
    logs: Vec<MonitoringLogEntry>,
    rules: Vec<AlertRule>,
    health: Vec<SystemHealthRecord>,
}

/// Metric store held entirely in process memory
#[derive(Default)]
pub struct InMemoryMetricStore {
    tables: RwLock<Tables>,
    failing: Mutex<HashSet<StoreOp>>,
}

impl InMemoryMetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later call of `op` return an error
    pub fn fail_on(&self, op: StoreOp) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(op);
        }
    }

    /// Undo [`fail_on`](Self::fail_on) for `op`
    pub fn recover(&self, op: StoreOp) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.remove(&op);
        }
    }

    fn check(&self, op: StoreOp) -> StoreResult<()> {
        let failing = self
            .failing
            .lock()
            .map_err(|e| StoreError::Unavailable { reason: e.to_string() })?;
        if failing.contains(&op) {
            return Err(StoreError::Unavailable {
                reason: format!("{:?} is failing", op),
            });
        }
        Ok(())
    }

    pub async fn sample_count(&self) -> usize {
        self.tables.read().await.samples.len()
    }

    pub async fn log_count(&self) -> usize {
        self.tables.read().await.logs.len()
    }
}

#[async_trait]
impl MetricStore for InMemoryMetricStore {
    async fn insert_samples(&self, samples: &[MetricSample]) -> StoreResult<()> {
        self.check(StoreOp::InsertSamples)?;
        self.tables.write().await.samples.extend_from_slice(samples);
        Ok(())
    }

    async fn query_samples(&self, query: &SampleQuery) -> StoreResult<Vec<MetricSample>> {
        self.check(StoreOp::QuerySamples)?;
        let tables = self.tables.read().await;

        let mut matched: Vec<&MetricSample> =
            tables.samples.iter().filter(|s| query.filter.matches(s)).collect();
        match query.order {
            SortOrder::Ascending => matched.sort_by_key(|s| s.collected_at),
            SortOrder::Descending => matched.sort_by(|a, b| b.collected_at.cmp(&a.collected_at)),
        }

        Ok(matched
            .into_iter()
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn insert_log(&self, entry: &MonitoringLogEntry) -> StoreResult<()> {
        self.check(StoreOp::InsertLog)?;
        self.tables.write().await.logs.push(entry.clone());
        Ok(())
    }

    async fn query_logs(&self, filter: &LogFilter) -> StoreResult<Vec<MonitoringLogEntry>> {
        let tables = self.tables.read().await;
        let mut matched: Vec<&MonitoringLogEntry> =
            tables.logs.iter().filter(|e| filter.matches(e)).collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(matched
            .into_iter()
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn list_rules(&self, enabled_only: bool) -> StoreResult<Vec<AlertRule>> {
        self.check(StoreOp::ListRules)?;
        let tables = self.tables.read().await;
        Ok(tables
            .rules
            .iter()
            .filter(|rule| !enabled_only || rule.enabled)
            .cloned()
            .collect())
    }

    async fn save_rule(&self, rule: &AlertRule) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        match tables.rules.iter_mut().find(|r| r.id == rule.id) {
            Some(existing) => *existing = rule.clone(),
            None => tables.rules.push(rule.clone()),
        }
        Ok(())
    }

    async fn upsert_health(&self, record: &SystemHealthRecord) -> StoreResult<()> {
        self.check(StoreOp::UpsertHealth)?;
        let mut tables = self.tables.write().await;
        match tables
            .health
            .iter_mut()
            .find(|r| r.component_name == record.component_name)
        {
            Some(existing) => {
                existing.component_type = record.component_type;
                existing.status = record.status;
                existing.response_time_ms = record.response_time_ms;
                existing.error_message = record.error_message.clone();
                existing.last_checked_at = record.last_checked_at;
                existing.updated_at = record.updated_at;
            }
            None => tables.health.push(record.clone()),
        }
        Ok(())
    }

    async fn list_health(&self) -> StoreResult<Vec<SystemHealthRecord>> {
        let tables = self.tables.read().await;
        let mut records = tables.health.clone();
        records.sort_by(|a, b| a.component_name.cmp(&b.component_name));
        Ok(records)
    }

    async fn delete_samples_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        self.check(StoreOp::DeleteSamples)?;
        let mut tables = self.tables.write().await;
        let before = tables.samples.len();
        tables.samples.retain(|s| s.created_at >= cutoff);
        Ok((before - tables.samples.len()) as u64)
    }

    async fn delete_logs_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        self.check(StoreOp::DeleteLogs)?;
        let mut tables = self.tables.write().await;
        let before = tables.logs.len();
        tables.logs.retain(|e| e.created_at >= cutoff);
        Ok((before - tables.logs.len()) as u64)
    }

    async fn ping(&self) -> StoreResult<()> {
        self.check(StoreOp::Ping)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ComponentType, HealthStatus, LogLevel, Severity, SourceKind};
    use chrono::Duration;

    fn sample_at(value: f64, at: DateTime<Utc>) -> MetricSample {
        MetricSample::new(SourceKind::Postgresql, "primary", "connection", "active_connections", value, "count", at)
    }

    #[tokio::test]
    async fn test_query_ordering_and_paging() {
        let store = InMemoryMetricStore::new();
        let now = Utc::now();
        let samples: Vec<_> = (0..5)
            .map(|i| sample_at(i as f64, now - Duration::minutes(10 - i)))
            .collect();
        store.insert_samples(&samples).await.unwrap();

        let query = SampleQuery {
            order: SortOrder::Descending,
            limit: Some(2),
            offset: 1,
            ..SampleQuery::default()
        };
        let page = store.query_samples(&query).await.unwrap();
        assert_eq!(page.iter().map(|s| s.value).collect::<Vec<_>>(), vec![3.0, 2.0]);

        let latest = store
            .latest_sample(SourceKind::Postgresql, Some(""), "active_connections")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.value, 4.0);
    }

    #[tokio::test]
    async fn test_health_upsert_keeps_identity() {
        let store = InMemoryMetricStore::new();
        let first = SystemHealthRecord::healthy("redis", ComponentType::Cache, 2, Utc::now());
        store.upsert_health(&first).await.unwrap();

        let second = SystemHealthRecord::unhealthy("redis", ComponentType::Cache, "refused", Utc::now());
        store.upsert_health(&second).await.unwrap();

        let records = store.list_health().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, first.id);
        assert_eq!(records[0].created_at, first.created_at);
        assert_eq!(records[0].status, HealthStatus::Unhealthy);
        assert_eq!(records[0].response_time_ms, None);
    }

    #[tokio::test]
    async fn test_rules_enabled_filter() {
        let store = InMemoryMetricStore::new();
        let mut disabled = AlertRule::new("off", SourceKind::Redis, "", "connected_clients", ">", 1.0, Severity::Info);
        disabled.enabled = false;
        let enabled = AlertRule::new("on", SourceKind::Redis, "", "connected_clients", ">", 1.0, Severity::Info);
        store.save_rule(&disabled).await.unwrap();
        store.save_rule(&enabled).await.unwrap();

        assert_eq!(store.list_rules(false).await.unwrap().len(), 2);
        let active = store.list_rules(true).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "on");
    }

    #[tokio::test]
    async fn test_retention_at_sub_microsecond_boundary() {
        let store = InMemoryMetricStore::new();
        let cutoff = DateTime::from_timestamp(1_700_000_000, 250_000).unwrap();
        let inside_same_micro = cutoff + Duration::nanoseconds(700);
        let one_micro_before = cutoff - Duration::microseconds(1);
        store
            .insert_samples(&[sample_at(1.0, inside_same_micro), sample_at(2.0, one_micro_before)])
            .await
            .unwrap();

        assert_eq!(store.delete_samples_older_than(cutoff).await.unwrap(), 1);
        let remaining = store.query_samples(&SampleQuery::default()).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].value, 1.0);
        assert_eq!(remaining[0].created_at, cutoff);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let store = InMemoryMetricStore::new();
        store.fail_on(StoreOp::InsertLog);
        let entry = MonitoringLogEntry::new(LogLevel::Info, "test", "hello");
        assert!(store.insert_log(&entry).await.is_err());

        store.recover(StoreOp::InsertLog);
        store.insert_log(&entry).await.unwrap();
        assert_eq!(store.log_count().await, 1);
    }
}
