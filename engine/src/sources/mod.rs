//! Read-only statistics surfaces of the monitored backends
//!
//! Connection management lives outside the engine; adapters only expose
//! the narrow set of statistics the collector normalizes into samples,
//! plus a liveness check.

pub mod fixed;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SourceResult;
use crate::models::{ComponentType, SourceKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PoolStats {
    pub active: u64,
    pub idle: u64,
    pub max: u64,
}

/// One table or partition with its on-disk footprint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSize {
    pub name: String,
    pub size_bytes: u64,
    pub row_count: u64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlatformAggregates {
    pub organizations: u64,
    pub users: u64,

    /// Users seen in the last 30 days
    pub active_users: u64,
    pub subscriptions_total: u64,
    pub active_subscriptions: u64,
    pub monthly_revenue: f64,
}

/// Resource usage of a single tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantStats {
    pub organization_id: Uuid,
    pub organization_name: String,
    pub user_count: u64,
    pub workspace_count: u64,
    pub active_subscriptions: u64,
    pub monthly_usage: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ColumnarDatabaseStats {
    pub total_bytes: u64,
    pub table_count: u64,
    pub row_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SlowQueryStats {
    pub count: u64,
    pub avg_duration_ms: f64,
    pub max_duration_ms: f64,
}

/// The platform's primary relational database
#[async_trait]
pub trait RelationalSource: Send + Sync {
    fn instance_name(&self) -> &str;

    async fn pool_stats(&self) -> SourceResult<PoolStats>;

    async fn size_on_disk_bytes(&self) -> SourceResult<u64>;

    /// Largest objects first
    async fn top_objects_by_size(&self, limit: usize) -> SourceResult<Vec<ObjectSize>>;

    async fn platform_aggregates(&self) -> SourceResult<PlatformAggregates>;

    async fn tenant_stats(&self) -> SourceResult<Vec<TenantStats>>;

    async fn ping(&self) -> SourceResult<()>;
}

/// One columnar analytics database
#[async_trait]
pub trait ColumnarSource: Send + Sync {
    fn instance_name(&self) -> &str;

    async fn database_stats(&self) -> SourceResult<ColumnarDatabaseStats>;

    /// Largest tables first
    async fn top_tables(&self, limit: usize) -> SourceResult<Vec<ObjectSize>>;

    /// `Ok(None)` when the instance keeps no query log
    async fn slow_queries(&self, window: Duration) -> SourceResult<Option<SlowQueryStats>>;

    async fn ping(&self) -> SourceResult<()>;
}

/// The key-value cache
#[async_trait]
pub trait CacheSource: Send + Sync {
    fn instance_name(&self) -> &str;

    /// Raw `key:value` statistics text, one pair per line
    async fn info(&self) -> SourceResult<String>;

    async fn ping(&self) -> SourceResult<()>;
}

/// Every backend the collector sweeps
#[derive(Clone, Default)]
pub struct SourceSet {
    pub relational: Option<Arc<dyn RelationalSource>>,
    pub columnar: Vec<Arc<dyn ColumnarSource>>,
    pub cache: Option<Arc<dyn CacheSource>>,
}

impl SourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_relational(mut self, source: Arc<dyn RelationalSource>) -> Self {
        self.relational = Some(source);
        self
    }

    pub fn with_columnar(mut self, source: Arc<dyn ColumnarSource>) -> Self {
        self.columnar.push(source);
        self
    }

    pub fn with_cache(mut self, source: Arc<dyn CacheSource>) -> Self {
        self.cache = Some(source);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.relational.is_none() && self.columnar.is_empty() && self.cache.is_none()
    }
}

/// Health record name for a columnar instance
pub fn columnar_component_name(instance: &str) -> String {
    format!("clickhouse_{}", instance)
}

/// Classify a health component by its name
pub fn component_type_for(name: &str, kind: Option<SourceKind>) -> ComponentType {
    match kind {
        Some(SourceKind::Postgresql) | Some(SourceKind::Clickhouse) => ComponentType::Database,
        Some(SourceKind::Redis) => ComponentType::Cache,
        None if name.contains("clickhouse") => ComponentType::Database,
        None if name == "redis" => ComponentType::Cache,
        None => ComponentType::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::fixed::{FixedCacheSource, FixedColumnarSource, FixedRelationalSource};

    #[test]
    fn test_source_set_builder() {
        let set = SourceSet::new();
        assert!(set.is_empty());

        let set = set
            .with_relational(Arc::new(FixedRelationalSource::new("primary")))
            .with_columnar(Arc::new(FixedColumnarSource::new("events")))
            .with_columnar(Arc::new(FixedColumnarSource::new("analytics")))
            .with_cache(Arc::new(FixedCacheSource::new("default")));

        assert!(!set.is_empty());
        assert_eq!(set.columnar.len(), 2);
    }

    #[test]
    fn test_component_classification() {
        assert_eq!(component_type_for("light_admin", Some(SourceKind::Postgresql)), ComponentType::Database);
        assert_eq!(component_type_for("clickhouse_events", None), ComponentType::Database);
        assert_eq!(component_type_for("redis", None), ComponentType::Cache);
        assert_eq!(component_type_for("metric_store", None), ComponentType::Unknown);
        assert_eq!(columnar_component_name("events"), "clickhouse_events");
    }
}
