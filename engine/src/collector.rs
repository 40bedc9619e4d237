//! Data collector
//!
//! One sweep reads every configured source, normalizes the statistics into
//! [`MetricSample`]s and checks every component's liveness. Each step is
//! isolated: a failure is written to the monitoring log and the sweep moves
//! on. A connectivity failure skips the rest of that source's steps for the
//! current sweep.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::CollectionConfig;
use crate::error::{Result, SourceError, SourceResult};
use crate::metrics::EngineMetrics;
use crate::models::{
    ComponentType, HealthStatus, LogLevel, MetricSample, MonitoringLogEntry, SourceKind, SystemHealthRecord,
};
use crate::sources::{
    columnar_component_name, component_type_for, CacheSource, ColumnarDatabaseStats, ColumnarSource, ObjectSize,
    PlatformAggregates, PoolStats, RelationalSource, SlowQueryStats, SourceSet, TenantStats,
};
use crate::store::MetricStore;

const LOG_SOURCE: &str = "data_collector";

/// Health component name of the metric store itself
pub const METRIC_STORE_COMPONENT: &str = "metric_store";

/// Health component name of the cache
pub const CACHE_COMPONENT: &str = "redis";

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Outcome of one collection sweep
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionReport {
    /// Samples persisted during the sweep
    pub samples_written: usize,

    /// `<kind>_<instance>:<step>` for every step that failed
    pub failed_steps: Vec<String>,

    /// Sources whose remaining steps were skipped after a connectivity failure
    pub skipped_sources: Vec<String>,

    /// Components whose health record was refreshed
    pub components_checked: usize,

    pub unhealthy_components: Vec<String>,
}

enum StepOutcome {
    Done,
    Failed,
    Unavailable,
}

/// Parsed counters from a cache `info` blob
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheInfo {
    pub used_memory: u64,
    pub connected_clients: u64,
    pub keyspace_hits: u64,
    pub keyspace_misses: u64,
}

impl CacheInfo {
    /// Read `key:value` lines; absent keys count as zero
    pub fn parse(source_name: &str, text: &str) -> SourceResult<Self> {
        let mut info = CacheInfo::default();
        for line in text.lines() {
            let Some((key, value)) = line.trim().split_once(':') else {
                continue;
            };
            let slot = match key {
                "used_memory" => &mut info.used_memory,
                "connected_clients" => &mut info.connected_clients,
                "keyspace_hits" => &mut info.keyspace_hits,
                "keyspace_misses" => &mut info.keyspace_misses,
                _ => continue,
            };
            *slot = value.trim().parse().map_err(|_| SourceError::MalformedResponse {
                source_name: source_name.to_string(),
                reason: format!("{} is not a counter: '{}'", key, value.trim()),
            })?;
        }
        Ok(info)
    }

    pub fn hit_rate_percent(&self) -> f64 {
        hit_rate_percent(self.keyspace_hits, self.keyspace_misses)
    }
}

/// `hits / (hits + misses) * 100`, or 0 when there were no lookups
pub fn hit_rate_percent(hits: u64, misses: u64) -> f64 {
    let total = hits as f64 + misses as f64;
    if total == 0.0 {
        0.0
    } else {
        hits as f64 / total * 100.0
    }
}

pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MB
}

/// Sweeps all sources into the metric store
pub struct DataCollector {
    store: Arc<dyn MetricStore>,
    sources: SourceSet,
    settings: CollectionConfig,
    metrics: EngineMetrics,
}

impl DataCollector {
    pub fn new(
        store: Arc<dyn MetricStore>,
        sources: SourceSet,
        settings: CollectionConfig,
        metrics: EngineMetrics,
    ) -> Self {
        Self {
            store,
            sources,
            settings,
            metrics,
        }
    }

    /// Run one full sweep. Step failures are logged, never returned.
    pub async fn collect_all(&self) -> Result<CollectionReport> {
        info!("Starting data collection");
        let mut report = CollectionReport::default();
        let now = Utc::now();

        if let Some(source) = &self.sources.relational {
            self.collect_relational(source.as_ref(), now, &mut report).await;
        }

        for source in &self.sources.columnar {
            self.collect_columnar(source.as_ref(), now, &mut report).await;
        }

        if let Some(source) = &self.sources.cache {
            self.collect_cache(source.as_ref(), now, &mut report).await;
        }

        self.check_health(&mut report).await;

        info!(
            samples = report.samples_written,
            failed_steps = report.failed_steps.len(),
            unhealthy = report.unhealthy_components.len(),
            "Data collection completed"
        );
        Ok(report)
    }

    async fn collect_relational(&self, source: &dyn RelationalSource, now: DateTime<Utc>, report: &mut CollectionReport) {
        let kind = SourceKind::Postgresql;
        let limit = self.settings.top_objects_limit;

        for step in RelationalStep::ALL {
            let fetch = step.fetch(source, limit, now);
            if let StepOutcome::Unavailable = self.run_step(report, kind, source.instance_name(), step.name(), fetch).await {
                break;
            }
        }
    }

    async fn collect_columnar(&self, source: &dyn ColumnarSource, now: DateTime<Utc>, report: &mut CollectionReport) {
        let kind = SourceKind::Clickhouse;
        let instance = source.instance_name();

        let fetch = async {
            let stats = source.database_stats().await?;
            Ok::<_, SourceError>(columnar_summary_samples(instance, stats, now))
        };
        if let StepOutcome::Unavailable = self.run_step(report, kind, instance, "columnar_stats", fetch).await {
            return;
        }

        let limit = self.settings.top_objects_limit;
        let fetch = async {
            let tables = source.top_tables(limit).await?;
            Ok::<_, SourceError>(object_samples(kind, instance, &tables, now))
        };
        if let StepOutcome::Unavailable = self.run_step(report, kind, instance, "columnar_tables", fetch).await {
            return;
        }

        let window = self.settings.slow_query_window();
        let fetch = async {
            let samples = match source.slow_queries(window).await? {
                Some(stats) => slow_query_samples(instance, stats, now),
                None => {
                    debug!(instance, "No query log available, skipping slow query statistics");
                    Vec::new()
                }
            };
            Ok::<_, SourceError>(samples)
        };
        self.run_step(report, kind, instance, "slow_queries", fetch).await;
    }

    async fn collect_cache(&self, source: &dyn CacheSource, now: DateTime<Utc>, report: &mut CollectionReport) {
        let kind = SourceKind::Redis;
        let instance = source.instance_name();

        let fetch = async {
            let text = source.info().await?;
            let info = CacheInfo::parse(instance, &text)?;
            Ok::<_, SourceError>(cache_samples(instance, info, now))
        };
        self.run_step(report, kind, instance, "cache_stats", fetch).await;
    }

    /// Fetch one step's samples and persist them, logging any failure
    async fn run_step<F>(
        &self,
        report: &mut CollectionReport,
        kind: SourceKind,
        instance: &str,
        step: &str,
        fetch: F,
    ) -> StepOutcome
    where
        F: Future<Output = SourceResult<Vec<MetricSample>>>,
    {
        let component = format!("{}_{}", kind, instance);

        let samples = match fetch.await {
            Ok(samples) => samples,
            Err(err) => {
                let unavailable = err.is_unavailable();
                self.record_failure(report, &component, step, &err.to_string()).await;
                if unavailable {
                    warn!(component = %component, "Source unavailable, skipping remaining steps");
                    report.skipped_sources.push(component);
                    return StepOutcome::Unavailable;
                }
                return StepOutcome::Failed;
            }
        };

        if samples.is_empty() {
            return StepOutcome::Done;
        }

        match self.store.insert_samples(&samples).await {
            Ok(()) => {
                debug!(component = %component, step, count = samples.len(), "Stored samples");
                report.samples_written += samples.len();
                self.metrics.record_samples_written(samples.len());
                StepOutcome::Done
            }
            Err(err) => {
                self.record_failure(report, &component, step, &err.to_string()).await;
                StepOutcome::Failed
            }
        }
    }

    async fn record_failure(&self, report: &mut CollectionReport, component: &str, step: &str, error_message: &str) {
        warn!(component, step, "Collection step failed: {}", error_message);
        report.failed_steps.push(format!("{}:{}", component, step));
        self.metrics.record_step_failure(step);

        let entry = MonitoringLogEntry::new(LogLevel::Error, LOG_SOURCE, format!("Failed to collect {}", step))
            .with_component(component)
            .with_details(serde_json::json!({
                "step": step,
                "error": error_message,
            }));
        if let Err(e) = self.store.insert_log(&entry).await {
            error!("Failed to write collection failure to monitoring log: {}", e);
        }
    }

    async fn check_health(&self, report: &mut CollectionReport) {
        let started = Instant::now();
        let store_ping = self.store.ping().await.map_err(|e| e.to_string());
        self.record_health(report, METRIC_STORE_COMPONENT, ComponentType::Database, "metric_store", started, store_ping)
            .await;

        if let Some(source) = &self.sources.relational {
            let name = source.instance_name();
            let started = Instant::now();
            let ping = source.ping().await.map_err(|e| e.to_string());
            let component_type = component_type_for(name, Some(SourceKind::Postgresql));
            self.record_health(report, name, component_type, &format!("postgresql_{}", name), started, ping)
                .await;
        }

        for source in &self.sources.columnar {
            let name = columnar_component_name(source.instance_name());
            let started = Instant::now();
            let ping = source.ping().await.map_err(|e| e.to_string());
            let component_type = component_type_for(&name, Some(SourceKind::Clickhouse));
            let label = format!("clickhouse_{}", source.instance_name());
            self.record_health(report, &name, component_type, &label, started, ping).await;
        }

        if let Some(source) = &self.sources.cache {
            let started = Instant::now();
            let ping = source.ping().await.map_err(|e| e.to_string());
            let component_type = component_type_for(CACHE_COMPONENT, Some(SourceKind::Redis));
            let label = format!("redis_{}", source.instance_name());
            self.record_health(report, CACHE_COMPONENT, component_type, &label, started, ping).await;
        }
    }

    async fn record_health(
        &self,
        report: &mut CollectionReport,
        component_name: &str,
        component_type: ComponentType,
        log_component: &str,
        started: Instant,
        ping: std::result::Result<(), String>,
    ) {
        let checked_at = Utc::now();
        let record = match ping {
            Ok(()) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                SystemHealthRecord::healthy(component_name, component_type, elapsed_ms, checked_at)
            }
            Err(message) => {
                self.record_failure(report, log_component, "health_check", &message).await;
                SystemHealthRecord::unhealthy(component_name, component_type, message, checked_at)
            }
        };

        if record.status == HealthStatus::Unhealthy {
            report.unhealthy_components.push(component_name.to_string());
        }

        match self.store.upsert_health(&record).await {
            Ok(()) => report.components_checked += 1,
            Err(err) => self.record_failure(report, log_component, "health_record", &err.to_string()).await,
        }
    }
}

/// Relational steps in sweep order
#[derive(Debug, Clone, Copy)]
enum RelationalStep {
    Connections,
    DatabaseSize,
    TopObjects,
    PlatformAggregates,
    TenantStats,
}

impl RelationalStep {
    const ALL: [RelationalStep; 5] = [
        RelationalStep::Connections,
        RelationalStep::DatabaseSize,
        RelationalStep::TopObjects,
        RelationalStep::PlatformAggregates,
        RelationalStep::TenantStats,
    ];

    fn name(&self) -> &'static str {
        match self {
            RelationalStep::Connections => "connections",
            RelationalStep::DatabaseSize => "database_size",
            RelationalStep::TopObjects => "top_objects",
            RelationalStep::PlatformAggregates => "platform_aggregates",
            RelationalStep::TenantStats => "tenant_stats",
        }
    }

    async fn fetch(
        self,
        source: &dyn RelationalSource,
        limit: usize,
        now: DateTime<Utc>,
    ) -> SourceResult<Vec<MetricSample>> {
        let kind = SourceKind::Postgresql;
        let instance = source.instance_name();
        let samples = match self {
            RelationalStep::Connections => connection_samples(instance, source.pool_stats().await?, now),
            RelationalStep::DatabaseSize => vec![size_sample(kind, instance, source.size_on_disk_bytes().await?, now)],
            RelationalStep::TopObjects => object_samples(kind, instance, &source.top_objects_by_size(limit).await?, now),
            RelationalStep::PlatformAggregates => aggregate_samples(instance, &source.platform_aggregates().await?, now),
            RelationalStep::TenantStats => tenant_samples(instance, &source.tenant_stats().await?, now),
        };
        Ok(samples)
    }
}

fn connection_samples(instance: &str, pool: PoolStats, now: DateTime<Utc>) -> Vec<MetricSample> {
    vec![MetricSample::new(
        SourceKind::Postgresql,
        instance,
        "connection",
        "active_connections",
        pool.active as f64,
        "count",
        now,
    )
    .with_tag("idle_connections", pool.idle)
    .with_tag("max_connections", pool.max)]
}

fn size_sample(kind: SourceKind, instance: &str, bytes: u64, now: DateTime<Utc>) -> MetricSample {
    MetricSample::new(kind, instance, "storage", "database_size_mb", bytes_to_mb(bytes), "MB", now)
}

fn object_samples(kind: SourceKind, instance: &str, objects: &[ObjectSize], now: DateTime<Utc>) -> Vec<MetricSample> {
    objects
        .iter()
        .flat_map(|object| {
            [
                MetricSample::new(
                    kind,
                    instance,
                    "storage",
                    format!("table_size_{}", object.name),
                    bytes_to_mb(object.size_bytes),
                    "MB",
                    now,
                )
                .with_tag("table", &object.name),
                MetricSample::new(
                    kind,
                    instance,
                    "row_count",
                    format!("table_rows_{}", object.name),
                    object.row_count as f64,
                    "count",
                    now,
                )
                .with_tag("table", &object.name),
            ]
        })
        .collect()
}

fn aggregate_samples(instance: &str, aggregates: &PlatformAggregates, now: DateTime<Utc>) -> Vec<MetricSample> {
    let kind = SourceKind::Postgresql;
    vec![
        MetricSample::new(kind, instance, "organization_count", "total_organizations", aggregates.organizations as f64, "count", now),
        MetricSample::new(kind, instance, "user_count", "total_users", aggregates.users as f64, "count", now)
            .with_tag("active_users", aggregates.active_users),
        MetricSample::new(
            kind,
            instance,
            "subscription_count",
            "active_subscriptions",
            aggregates.active_subscriptions as f64,
            "count",
            now,
        )
        .with_tag("monthly_revenue", aggregates.monthly_revenue)
        .with_tag("total_subscriptions", aggregates.subscriptions_total),
        MetricSample::new(kind, instance, "revenue", "monthly_revenue", aggregates.monthly_revenue, "USD", now),
    ]
}

fn tenant_samples(instance: &str, tenants: &[TenantStats], now: DateTime<Utc>) -> Vec<MetricSample> {
    let kind = SourceKind::Postgresql;
    tenants
        .iter()
        .flat_map(|tenant| {
            [
                ("organization_users", "user_count", tenant.user_count as f64, "count"),
                ("organization_workspaces", "workspace_count", tenant.workspace_count as f64, "count"),
                ("organization_subscriptions", "active_subscriptions", tenant.active_subscriptions as f64, "count"),
                ("organization_usage", "monthly_usage", tenant.monthly_usage, "units"),
            ]
            .into_iter()
            .map(move |(metric_type, metric_name, value, unit)| {
                MetricSample::new(kind, instance, metric_type, metric_name, value, unit, now)
                    .for_organization(tenant.organization_id)
                    .with_tag("organization_name", &tenant.organization_name)
            })
        })
        .collect()
}

fn columnar_summary_samples(instance: &str, stats: ColumnarDatabaseStats, now: DateTime<Utc>) -> Vec<MetricSample> {
    let kind = SourceKind::Clickhouse;
    vec![
        size_sample(kind, instance, stats.total_bytes, now),
        MetricSample::new(kind, instance, "table_count", "total_tables", stats.table_count as f64, "count", now),
        MetricSample::new(kind, instance, "row_count", "total_rows", stats.row_count as f64, "count", now),
    ]
}

fn slow_query_samples(instance: &str, stats: SlowQueryStats, now: DateTime<Utc>) -> Vec<MetricSample> {
    let kind = SourceKind::Clickhouse;
    vec![
        MetricSample::new(kind, instance, "query_performance", "slow_queries_count_1h", stats.count as f64, "count", now),
        MetricSample::new(kind, instance, "query_performance", "avg_query_time_1h", stats.avg_duration_ms, "ms", now)
            .with_tag("max_query_time_ms", stats.max_duration_ms),
    ]
}

fn cache_samples(instance: &str, info: CacheInfo, now: DateTime<Utc>) -> Vec<MetricSample> {
    let kind = SourceKind::Redis;
    vec![
        MetricSample::new(kind, instance, "memory", "used_memory_bytes", info.used_memory as f64, "bytes", now),
        MetricSample::new(kind, instance, "connection", "connected_clients", info.connected_clients as f64, "count", now),
        MetricSample::new(kind, instance, "performance", "hit_rate_percent", info.hit_rate_percent(), "percent", now),
    ]
}
