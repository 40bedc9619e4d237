//! Adapters that report configured values
//!
//! Used for wiring tests and dry runs of the engine without live backends.
//! Each adapter can be switched to unavailable, or made to fail a single
//! call by name.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{
    CacheSource, ColumnarDatabaseStats, ColumnarSource, ObjectSize, PlatformAggregates, PoolStats,
    RelationalSource, SlowQueryStats, TenantStats,
};
use crate::error::{SourceError, SourceResult};

#[derive(Default)]
struct Faults {
    unavailable: AtomicBool,
    failing: Mutex<HashSet<String>>,
}

impl Faults {
    fn check(&self, source_name: &str, call: &str) -> SourceResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SourceError::Unavailable {
                source_name: source_name.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        let failing = self.failing.lock().map_err(|e| SourceError::QueryFailed {
            source_name: source_name.to_string(),
            reason: e.to_string(),
        })?;
        if failing.contains(call) {
            return Err(SourceError::QueryFailed {
                source_name: source_name.to_string(),
                reason: format!("{} failed", call),
            });
        }
        Ok(())
    }

    fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn fail_call(&self, call: &str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(call.to_string());
        }
    }
}

/// Relational source with configured statistics
#[derive(Default)]
pub struct FixedRelationalSource {
    name: String,
    pub pool: PoolStats,
    pub size_bytes: u64,
    pub objects: Vec<ObjectSize>,
    pub aggregates: PlatformAggregates,
    pub tenants: Vec<TenantStats>,
    faults: Faults,
}

impl FixedRelationalSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_pool(mut self, active: u64, idle: u64, max: u64) -> Self {
        self.pool = PoolStats { active, idle, max };
        self
    }

    pub fn with_size_bytes(mut self, size_bytes: u64) -> Self {
        self.size_bytes = size_bytes;
        self
    }

    pub fn with_object(mut self, name: impl Into<String>, size_bytes: u64, row_count: u64) -> Self {
        self.objects.push(ObjectSize {
            name: name.into(),
            size_bytes,
            row_count,
        });
        self
    }

    pub fn with_aggregates(mut self, aggregates: PlatformAggregates) -> Self {
        self.aggregates = aggregates;
        self
    }

    pub fn with_tenant(mut self, tenant: TenantStats) -> Self {
        self.tenants.push(tenant);
        self
    }

    /// Make every call fail with a connectivity error
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.set_unavailable(unavailable);
    }

    /// Make the named trait method fail with a query error
    pub fn fail_call(&self, call: &str) {
        self.faults.fail_call(call);
    }
}

#[async_trait]
impl RelationalSource for FixedRelationalSource {
    fn instance_name(&self) -> &str {
        &self.name
    }

    async fn pool_stats(&self) -> SourceResult<PoolStats> {
        self.faults.check(&self.name, "pool_stats")?;
        Ok(self.pool)
    }

    async fn size_on_disk_bytes(&self) -> SourceResult<u64> {
        self.faults.check(&self.name, "size_on_disk_bytes")?;
        Ok(self.size_bytes)
    }

    async fn top_objects_by_size(&self, limit: usize) -> SourceResult<Vec<ObjectSize>> {
        self.faults.check(&self.name, "top_objects_by_size")?;
        Ok(largest_first(&self.objects, limit))
    }

    async fn platform_aggregates(&self) -> SourceResult<PlatformAggregates> {
        self.faults.check(&self.name, "platform_aggregates")?;
        Ok(self.aggregates.clone())
    }

    async fn tenant_stats(&self) -> SourceResult<Vec<TenantStats>> {
        self.faults.check(&self.name, "tenant_stats")?;
        Ok(self.tenants.clone())
    }

    async fn ping(&self) -> SourceResult<()> {
        self.faults.check(&self.name, "ping")
    }
}

/// Columnar source with configured statistics
#[derive(Default)]
pub struct FixedColumnarSource {
    name: String,
    pub stats: ColumnarDatabaseStats,
    pub tables: Vec<ObjectSize>,

    /// `None` behaves like an instance without a query log
    pub slow_queries: Option<SlowQueryStats>,
    faults: Faults,
}

impl FixedColumnarSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_stats(mut self, total_bytes: u64, table_count: u64, row_count: u64) -> Self {
        self.stats = ColumnarDatabaseStats {
            total_bytes,
            table_count,
            row_count,
        };
        self
    }

    pub fn with_table(mut self, name: impl Into<String>, size_bytes: u64, row_count: u64) -> Self {
        self.tables.push(ObjectSize {
            name: name.into(),
            size_bytes,
            row_count,
        });
        self
    }

    pub fn with_slow_queries(mut self, count: u64, avg_duration_ms: f64, max_duration_ms: f64) -> Self {
        self.slow_queries = Some(SlowQueryStats {
            count,
            avg_duration_ms,
            max_duration_ms,
        });
        self
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.set_unavailable(unavailable);
    }

    pub fn fail_call(&self, call: &str) {
        self.faults.fail_call(call);
    }
}

#[async_trait]
impl ColumnarSource for FixedColumnarSource {
    fn instance_name(&self) -> &str {
        &self.name
    }

    async fn database_stats(&self) -> SourceResult<ColumnarDatabaseStats> {
        self.faults.check(&self.name, "database_stats")?;
        Ok(self.stats)
    }

    async fn top_tables(&self, limit: usize) -> SourceResult<Vec<ObjectSize>> {
        self.faults.check(&self.name, "top_tables")?;
        Ok(largest_first(&self.tables, limit))
    }

    async fn slow_queries(&self, _window: Duration) -> SourceResult<Option<SlowQueryStats>> {
        self.faults.check(&self.name, "slow_queries")?;
        Ok(self.slow_queries)
    }

    async fn ping(&self) -> SourceResult<()> {
        self.faults.check(&self.name, "ping")
    }
}

/// Cache source answering `info` with a fixed text blob
#[derive(Default)]
pub struct FixedCacheSource {
    name: String,
    pub info: String,
    faults: Faults,
}

impl FixedCacheSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_info(mut self, info: impl Into<String>) -> Self {
        self.info = info.into();
        self
    }

    /// Build the info blob from the counters the collector reads
    pub fn with_counters(self, used_memory: u64, connected_clients: u64, hits: u64, misses: u64) -> Self {
        self.with_info(format!(
            "# Memory\r\nused_memory:{}\r\n# Clients\r\nconnected_clients:{}\r\n# Stats\r\nkeyspace_hits:{}\r\nkeyspace_misses:{}\r\n",
            used_memory, connected_clients, hits, misses
        ))
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.set_unavailable(unavailable);
    }

    pub fn fail_call(&self, call: &str) {
        self.faults.fail_call(call);
    }
}

#[async_trait]
impl CacheSource for FixedCacheSource {
    fn instance_name(&self) -> &str {
        &self.name
    }

    async fn info(&self) -> SourceResult<String> {
        self.faults.check(&self.name, "info")?;
        Ok(self.info.clone())
    }

    async fn ping(&self) -> SourceResult<()> {
        self.faults.check(&self.name, "ping")
    }
}

fn largest_first(objects: &[ObjectSize], limit: usize) -> Vec<ObjectSize> {
    let mut sorted = objects.to_vec();
    sorted.sort_by(|a, b| b.size_bytes.cmp(&a.size_bytes));
    sorted.truncate(limit);
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_top_objects_are_limited_and_sorted() {
        let source = FixedRelationalSource::new("primary")
            .with_object("small", 10, 1)
            .with_object("large", 1000, 50)
            .with_object("medium", 100, 5);

        let top = source.top_objects_by_size(2).await.unwrap();
        assert_eq!(top.iter().map(|o| o.name.as_str()).collect::<Vec<_>>(), vec!["large", "medium"]);
    }

    #[tokio::test]
    async fn test_unavailable_source() {
        let source = FixedCacheSource::new("default").with_counters(1, 2, 3, 4);
        source.set_unavailable(true);

        let err = source.info().await.unwrap_err();
        assert!(err.is_unavailable());

        source.set_unavailable(false);
        assert!(source.info().await.unwrap().contains("keyspace_hits:3"));
    }

    #[tokio::test]
    async fn test_single_call_failure() {
        let source = FixedColumnarSource::new("events").with_stats(1024, 2, 10);
        source.fail_call("top_tables");

        assert!(source.database_stats().await.is_ok());
        let err = source.top_tables(5).await.unwrap_err();
        assert!(!err.is_unavailable());
    }
}
