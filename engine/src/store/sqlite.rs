use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use uuid::Uuid;

use super::{LogFilter, MetricStore, SampleQuery, SortOrder};
use crate::error::{StoreError, StoreResult};
use crate::models::{
    AlertRule, ComparisonOperator, ComponentType, HealthStatus, LogLevel, MetricSample, MonitoringLogEntry,
    RuleScope, Severity, SourceKind, SystemHealthRecord,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS resource_metrics (
    id TEXT PRIMARY KEY,
    organization_id TEXT,
    source_type TEXT NOT NULL,
    source_name TEXT NOT NULL,
    metric_type TEXT NOT NULL,
    metric_name TEXT NOT NULL,
    value REAL NOT NULL,
    unit TEXT NOT NULL,
    tags TEXT NOT NULL,
    collected_at INTEGER NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_resource_metrics_lookup
    ON resource_metrics (source_type, source_name, metric_name, collected_at);
CREATE INDEX IF NOT EXISTS idx_resource_metrics_created ON resource_metrics (created_at);

CREATE TABLE IF NOT EXISTS alert_rules (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT NOT NULL,
    rule_type TEXT NOT NULL,
    target_type TEXT NOT NULL,
    target_name TEXT NOT NULL,
    metric_name TEXT NOT NULL,
    operator TEXT NOT NULL,
    threshold REAL NOT NULL,
    duration_minutes INTEGER NOT NULL,
    severity TEXT NOT NULL,
    enabled INTEGER NOT NULL,
    notification_config TEXT NOT NULL,
    created_by TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS monitoring_logs (
    id TEXT PRIMARY KEY,
    level TEXT NOT NULL,
    source TEXT NOT NULL,
    component TEXT,
    organization_id TEXT,
    message TEXT NOT NULL,
    details TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_monitoring_logs_created ON monitoring_logs (created_at);

CREATE TABLE IF NOT EXISTS system_health (
    id TEXT PRIMARY KEY,
    component_name TEXT NOT NULL UNIQUE,
    component_type TEXT NOT NULL,
    status TEXT NOT NULL,
    response_time_ms INTEGER,
    error_message TEXT,
    last_checked_at INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
"#;

const SAMPLE_COLUMNS: &str = "id, organization_id, source_type, source_name, metric_type, metric_name, \
     value, unit, tags, collected_at, created_at";

const RULE_COLUMNS: &str = "id, name, description, rule_type, target_type, target_name, metric_name, \
     operator, threshold, duration_minutes, severity, enabled, notification_config, created_by, \
     created_at, updated_at";

const LOG_COLUMNS: &str = "id, level, source, component, organization_id, message, details, created_at";

const HEALTH_COLUMNS: &str = "id, component_name, component_type, status, response_time_ms, error_message, \
     last_checked_at, created_at, updated_at";

/// Metric store backed by a single SQLite database file
///
/// Timestamps are stored as UTC microseconds, tags and details as JSON text.
/// Every call runs on the blocking pool.
#[derive(Clone)]
pub struct SqliteMetricStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMetricStore {
    /// Open or create the database at `path` and apply the schema
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StoreError::Unavailable {
                reason: format!("cannot create {}: {}", parent.display(), e),
            })?;
        }
        let conn = Connection::open(path)?;
        Self::initialize(conn)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::initialize(Connection::open_in_memory()?)
    }

    fn initialize(conn: Connection) -> StoreResult<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|e| StoreError::Unavailable { reason: e.to_string() })?;
            f(&mut guard)
        })
        .await?
    }
}

#[async_trait]
impl MetricStore for SqliteMetricStore {
    async fn insert_samples(&self, samples: &[MetricSample]) -> StoreResult<()> {
        let samples = samples.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(&format!(
                    "INSERT INTO resource_metrics ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    SAMPLE_COLUMNS
                ))?;
                for sample in &samples {
                    stmt.execute(params![
                        sample.id.to_string(),
                        sample.organization_id.map(|id| id.to_string()),
                        sample.source_kind.as_str(),
                        sample.source_name,
                        sample.metric_type,
                        sample.metric_name,
                        sample.value,
                        sample.unit,
                        encode_json(&sample.tags)?,
                        sample.collected_at.timestamp_micros(),
                        sample.created_at.timestamp_micros(),
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn query_samples(&self, query: &SampleQuery) -> StoreResult<Vec<MetricSample>> {
        let query = query.clone();
        self.with_conn(move |conn| {
            let mut clauses = Vec::new();
            let mut values: Vec<Value> = Vec::new();
            let filter = &query.filter;

            if let Some(kind) = filter.source_kind {
                clauses.push("source_type = ?");
                values.push(Value::Text(kind.as_str().to_string()));
            }
            if let Some(name) = &filter.source_name {
                clauses.push("source_name = ?");
                values.push(Value::Text(name.clone()));
            }
            if let Some(metric_type) = &filter.metric_type {
                clauses.push("metric_type = ?");
                values.push(Value::Text(metric_type.clone()));
            }
            if let Some(name) = &filter.metric_name {
                clauses.push("metric_name = ?");
                values.push(Value::Text(name.clone()));
            }
            if let Some(org) = filter.organization_id {
                clauses.push("organization_id = ?");
                values.push(Value::Text(org.to_string()));
            }
            if let Some(from) = filter.from {
                clauses.push("collected_at >= ?");
                values.push(Value::Integer(from.timestamp_micros()));
            }
            if let Some(to) = filter.to {
                clauses.push("collected_at < ?");
                values.push(Value::Integer(to.timestamp_micros()));
            }

            let where_clause = if clauses.is_empty() {
                String::new()
            } else {
                format!("WHERE {}", clauses.join(" AND "))
            };
            let direction = match query.order {
                SortOrder::Ascending => "ASC",
                SortOrder::Descending => "DESC",
            };
            values.push(Value::Integer(query.limit.map_or(-1, |limit| limit as i64)));
            values.push(Value::Integer(query.offset as i64));

            let sql = format!(
                "SELECT {} FROM resource_metrics {} ORDER BY collected_at {} LIMIT ? OFFSET ?",
                SAMPLE_COLUMNS, where_clause, direction
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(values.iter()), SampleRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter().map(SampleRow::into_sample).collect()
        })
        .await
    }

    async fn insert_log(&self, entry: &MonitoringLogEntry) -> StoreResult<()> {
        let entry = entry.clone();
        self.with_conn(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO monitoring_logs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    LOG_COLUMNS
                ),
                params![
                    entry.id.to_string(),
                    entry.level.as_str(),
                    entry.source,
                    entry.component,
                    entry.organization_id.map(|id| id.to_string()),
                    entry.message,
                    encode_json(&entry.details)?,
                    entry.created_at.timestamp_micros(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn query_logs(&self, filter: &LogFilter) -> StoreResult<Vec<MonitoringLogEntry>> {
        let filter = filter.clone();
        self.with_conn(move |conn| {
            let mut clauses = Vec::new();
            let mut values: Vec<Value> = Vec::new();

            if let Some(level) = filter.level {
                clauses.push("level = ?");
                values.push(Value::Text(level.as_str().to_string()));
            }
            if let Some(source) = &filter.source {
                clauses.push("source = ?");
                values.push(Value::Text(source.clone()));
            }
            if let Some(component) = &filter.component {
                clauses.push("component = ?");
                values.push(Value::Text(component.clone()));
            }
            if let Some(since) = filter.since {
                clauses.push("created_at >= ?");
                values.push(Value::Integer(since.timestamp_micros()));
            }

            let where_clause = if clauses.is_empty() {
                String::new()
            } else {
                format!("WHERE {}", clauses.join(" AND "))
            };
            values.push(Value::Integer(filter.limit.map_or(-1, |limit| limit as i64)));

            let sql = format!(
                "SELECT {} FROM monitoring_logs {} ORDER BY created_at DESC LIMIT ?",
                LOG_COLUMNS, where_clause
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(values.iter()), LogRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter().map(LogRow::into_entry).collect()
        })
        .await
    }

    async fn list_rules(&self, enabled_only: bool) -> StoreResult<Vec<AlertRule>> {
        self.with_conn(move |conn| {
            let sql = if enabled_only {
                format!("SELECT {} FROM alert_rules WHERE enabled = 1 ORDER BY created_at", RULE_COLUMNS)
            } else {
                format!("SELECT {} FROM alert_rules ORDER BY created_at", RULE_COLUMNS)
            };
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], RuleRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter().map(RuleRow::into_rule).collect()
        })
        .await
    }

    async fn save_rule(&self, rule: &AlertRule) -> StoreResult<()> {
        let rule = rule.clone();
        self.with_conn(move |conn| {
            conn.execute(
                &format!(
                    "INSERT OR REPLACE INTO alert_rules ({}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                    RULE_COLUMNS
                ),
                params![
                    rule.id.to_string(),
                    rule.name,
                    rule.description,
                    rule.rule_type.as_str(),
                    rule.target_type.as_str(),
                    rule.target_name,
                    rule.metric_name,
                    rule.operator.as_str(),
                    rule.threshold,
                    rule.duration_minutes,
                    rule.severity.as_str(),
                    rule.enabled,
                    encode_json(&rule.notification_config)?,
                    rule.created_by.map(|id| id.to_string()),
                    rule.created_at.timestamp_micros(),
                    rule.updated_at.timestamp_micros(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn upsert_health(&self, record: &SystemHealthRecord) -> StoreResult<()> {
        let record = record.clone();
        self.with_conn(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO system_health ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                     ON CONFLICT(component_name) DO UPDATE SET
                        component_type = excluded.component_type,
                        status = excluded.status,
                        response_time_ms = excluded.response_time_ms,
                        error_message = excluded.error_message,
                        last_checked_at = excluded.last_checked_at,
                        updated_at = excluded.updated_at",
                    HEALTH_COLUMNS
                ),
                params![
                    record.id.to_string(),
                    record.component_name,
                    record.component_type.as_str(),
                    record.status.as_str(),
                    record.response_time_ms.map(|ms| ms as i64),
                    record.error_message,
                    record.last_checked_at.timestamp_micros(),
                    record.created_at.timestamp_micros(),
                    record.updated_at.timestamp_micros(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_health(&self) -> StoreResult<Vec<SystemHealthRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM system_health ORDER BY component_name",
                HEALTH_COLUMNS
            ))?;
            let rows = stmt
                .query_map([], HealthRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter().map(HealthRow::into_record).collect()
        })
        .await
    }

    async fn delete_samples_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        self.with_conn(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM resource_metrics WHERE created_at < ?1",
                params![cutoff.timestamp_micros()],
            )?;
            Ok(deleted as u64)
        })
        .await
    }

    async fn delete_logs_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        self.with_conn(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM monitoring_logs WHERE created_at < ?1",
                params![cutoff.timestamp_micros()],
            )?;
            Ok(deleted as u64)
        })
        .await
    }

    async fn ping(&self) -> StoreResult<()> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .optional()?;
            Ok(())
        })
        .await
    }
}

fn encode_json<T: serde::Serialize>(value: &T) -> StoreResult<String> {
    serde_json::to_string(value).map_err(|e| StoreError::Decode {
        table: "json".to_string(),
        reason: e.to_string(),
    })
}

fn decode_err(table: &str, reason: impl ToString) -> StoreError {
    StoreError::Decode {
        table: table.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_uuid(table: &str, value: &str) -> StoreResult<Uuid> {
    Uuid::parse_str(value).map_err(|e| decode_err(table, e))
}

fn parse_time(table: &str, micros: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros).ok_or_else(|| decode_err(table, format!("timestamp {} out of range", micros)))
}

fn parse_enum<T>(table: &str, value: &str, parse: fn(&str) -> Option<T>) -> StoreResult<T> {
    parse(value).ok_or_else(|| decode_err(table, format!("unexpected value '{}'", value)))
}

struct SampleRow {
    id: String,
    organization_id: Option<String>,
    source_type: String,
    source_name: String,
    metric_type: String,
    metric_name: String,
    value: f64,
    unit: String,
    tags: String,
    collected_at: i64,
    created_at: i64,
}

impl SampleRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            organization_id: row.get("organization_id")?,
            source_type: row.get("source_type")?,
            source_name: row.get("source_name")?,
            metric_type: row.get("metric_type")?,
            metric_name: row.get("metric_name")?,
            value: row.get("value")?,
            unit: row.get("unit")?,
            tags: row.get("tags")?,
            collected_at: row.get("collected_at")?,
            created_at: row.get("created_at")?,
        })
    }

    fn into_sample(self) -> StoreResult<MetricSample> {
        const TABLE: &str = "resource_metrics";
        Ok(MetricSample {
            id: parse_uuid(TABLE, &self.id)?,
            organization_id: self.organization_id.as_deref().map(|id| parse_uuid(TABLE, id)).transpose()?,
            source_kind: parse_enum(TABLE, &self.source_type, SourceKind::parse)?,
            source_name: self.source_name,
            metric_type: self.metric_type,
            metric_name: self.metric_name,
            value: self.value,
            unit: self.unit,
            tags: serde_json::from_str(&self.tags).map_err(|e| decode_err(TABLE, e))?,
            collected_at: parse_time(TABLE, self.collected_at)?,
            created_at: parse_time(TABLE, self.created_at)?,
        })
    }
}

struct RuleRow {
    id: String,
    name: String,
    description: String,
    rule_type: String,
    target_type: String,
    target_name: String,
    metric_name: String,
    operator: String,
    threshold: f64,
    duration_minutes: u32,
    severity: String,
    enabled: bool,
    notification_config: String,
    created_by: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl RuleRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            description: row.get("description")?,
            rule_type: row.get("rule_type")?,
            target_type: row.get("target_type")?,
            target_name: row.get("target_name")?,
            metric_name: row.get("metric_name")?,
            operator: row.get("operator")?,
            threshold: row.get("threshold")?,
            duration_minutes: row.get("duration_minutes")?,
            severity: row.get("severity")?,
            enabled: row.get("enabled")?,
            notification_config: row.get("notification_config")?,
            created_by: row.get("created_by")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn into_rule(self) -> StoreResult<AlertRule> {
        const TABLE: &str = "alert_rules";
        Ok(AlertRule {
            id: parse_uuid(TABLE, &self.id)?,
            name: self.name,
            description: self.description,
            rule_type: parse_enum(TABLE, &self.rule_type, RuleScope::parse)?,
            target_type: parse_enum(TABLE, &self.target_type, SourceKind::parse)?,
            target_name: self.target_name,
            metric_name: self.metric_name,
            operator: ComparisonOperator::from(self.operator),
            threshold: self.threshold,
            duration_minutes: self.duration_minutes,
            severity: parse_enum(TABLE, &self.severity, Severity::parse)?,
            enabled: self.enabled,
            notification_config: serde_json::from_str(&self.notification_config).map_err(|e| decode_err(TABLE, e))?,
            created_by: self.created_by.as_deref().map(|id| parse_uuid(TABLE, id)).transpose()?,
            created_at: parse_time(TABLE, self.created_at)?,
            updated_at: parse_time(TABLE, self.updated_at)?,
        })
    }
}

struct LogRow {
    id: String,
    level: String,
    source: String,
    component: Option<String>,
    organization_id: Option<String>,
    message: String,
    details: String,
    created_at: i64,
}

impl LogRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            level: row.get("level")?,
            source: row.get("source")?,
            component: row.get("component")?,
            organization_id: row.get("organization_id")?,
            message: row.get("message")?,
            details: row.get("details")?,
            created_at: row.get("created_at")?,
        })
    }

    fn into_entry(self) -> StoreResult<MonitoringLogEntry> {
        const TABLE: &str = "monitoring_logs";
        Ok(MonitoringLogEntry {
            id: parse_uuid(TABLE, &self.id)?,
            level: parse_enum(TABLE, &self.level, LogLevel::parse)?,
            source: self.source,
            component: self.component,
            organization_id: self.organization_id.as_deref().map(|id| parse_uuid(TABLE, id)).transpose()?,
            message: self.message,
            details: serde_json::from_str(&self.details).map_err(|e| decode_err(TABLE, e))?,
            created_at: parse_time(TABLE, self.created_at)?,
        })
    }
}

struct HealthRow {
    id: String,
    component_name: String,
    component_type: String,
    status: String,
    response_time_ms: Option<i64>,
    error_message: Option<String>,
    last_checked_at: i64,
    created_at: i64,
    updated_at: i64,
}

impl HealthRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            component_name: row.get("component_name")?,
            component_type: row.get("component_type")?,
            status: row.get("status")?,
            response_time_ms: row.get("response_time_ms")?,
            error_message: row.get("error_message")?,
            last_checked_at: row.get("last_checked_at")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn into_record(self) -> StoreResult<SystemHealthRecord> {
        const TABLE: &str = "system_health";
        Ok(SystemHealthRecord {
            id: parse_uuid(TABLE, &self.id)?,
            component_name: self.component_name,
            component_type: parse_enum(TABLE, &self.component_type, ComponentType::parse)?,
            status: parse_enum(TABLE, &self.status, HealthStatus::parse)?,
            response_time_ms: self.response_time_ms.map(|ms| ms.max(0) as u64),
            error_message: self.error_message,
            last_checked_at: parse_time(TABLE, self.last_checked_at)?,
            created_at: parse_time(TABLE, self.created_at)?,
            updated_at: parse_time(TABLE, self.updated_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SampleFilter;
    use chrono::Duration as ChronoDuration;
    use tempfile::TempDir;

    fn create_test_store() -> (SqliteMetricStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteMetricStore::open(temp_dir.path().join("monitor.db")).unwrap();
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_sample_round_trip_through_disk() {
        let (store, _temp_dir) = create_test_store();
        let org = Uuid::new_v4();
        let sample = MetricSample::new(
            SourceKind::Postgresql,
            "primary",
            "organization_users",
            "user_count",
            12.0,
            "count",
            Utc::now(),
        )
        .with_tag("organization_name", "Acme")
        .for_organization(org);

        store.insert_sample(&sample).await.unwrap();

        let query = SampleQuery {
            filter: SampleFilter {
                organization_id: Some(org),
                ..SampleFilter::default()
            },
            ..SampleQuery::default()
        };
        let loaded = store.query_samples(&query).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, sample.id);
        assert_eq!(loaded[0].tags, sample.tags);
        assert_eq!(loaded[0].collected_at.timestamp_micros(), sample.collected_at.timestamp_micros());
    }

    #[tokio::test]
    async fn test_latest_sample_any_instance() {
        let store = SqliteMetricStore::open_in_memory().unwrap();
        let now = Utc::now();
        let older = MetricSample::new(SourceKind::Clickhouse, "events", "storage", "database_size_mb", 1.0, "MB", now - ChronoDuration::minutes(5));
        let newer = MetricSample::new(SourceKind::Clickhouse, "analytics", "storage", "database_size_mb", 2.0, "MB", now);
        store.insert_samples(&[older, newer]).await.unwrap();

        let latest = store
            .latest_sample(SourceKind::Clickhouse, None, "database_size_mb")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.source_name, "analytics");

        let scoped = store
            .latest_sample(SourceKind::Clickhouse, Some("events"), "database_size_mb")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(scoped.value, 1.0);

        let missing = store
            .latest_sample(SourceKind::Redis, None, "database_size_mb")
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_rule_with_unknown_operator_round_trips() {
        let store = SqliteMetricStore::open_in_memory().unwrap();
        let mut rule = AlertRule::new("odd", SourceKind::Redis, "", "connected_clients", "!=", 3.0, Severity::Critical);
        rule.notification_config = serde_json::json!({"email": ["ops@example.com"]});
        store.save_rule(&rule).await.unwrap();

        let rules = store.list_rules(true).await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].operator, ComparisonOperator::Unknown("!=".to_string()));
        assert_eq!(rules[0].notification_config, rule.notification_config);

        rule.enabled = false;
        store.save_rule(&rule).await.unwrap();
        assert!(store.list_rules(true).await.unwrap().is_empty());
        assert_eq!(store.list_rules(false).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_health_upsert_on_conflict() {
        let store = SqliteMetricStore::open_in_memory().unwrap();
        let first = SystemHealthRecord::healthy("light_admin", ComponentType::Database, 4, Utc::now());
        store.upsert_health(&first).await.unwrap();
        let second = SystemHealthRecord::unhealthy("light_admin", ComponentType::Database, "timeout", Utc::now());
        store.upsert_health(&second).await.unwrap();

        let records = store.list_health().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, first.id);
        assert_eq!(records[0].status, HealthStatus::Unhealthy);
        assert_eq!(records[0].error_message.as_deref(), Some("timeout"));
        assert_eq!(records[0].response_time_ms, None);
    }

    #[tokio::test]
    async fn test_retention_deletes_are_strict() {
        let store = SqliteMetricStore::open_in_memory().unwrap();
        let cutoff = Utc::now() - ChronoDuration::days(30);

        let mut at_cutoff = MetricSample::new(SourceKind::Redis, "default", "memory", "used_memory_bytes", 1.0, "bytes", cutoff);
        at_cutoff.created_at = cutoff;
        let mut before = at_cutoff.clone();
        before.id = Uuid::new_v4();
        before.created_at = cutoff - ChronoDuration::microseconds(1);
        store.insert_samples(&[at_cutoff, before]).await.unwrap();

        let mut old_log = MonitoringLogEntry::new(LogLevel::Info, "test", "old");
        old_log.created_at = cutoff - ChronoDuration::days(1);
        store.insert_log(&old_log).await.unwrap();
        store.insert_log(&MonitoringLogEntry::new(LogLevel::Info, "test", "new")).await.unwrap();

        assert_eq!(store.delete_samples_older_than(cutoff).await.unwrap(), 1);
        assert_eq!(store.delete_logs_older_than(cutoff).await.unwrap(), 1);

        let remaining = store.query_logs(&LogFilter::default()).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].message, "new");
        store.ping().await.unwrap();
    }
}
