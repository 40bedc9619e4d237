//! Records persisted by the monitoring engine
//!
//! Samples, alert rules, log entries and health records are the only
//! shapes that cross the metric store boundary.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Backend kind a metric was collected from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Postgresql,
    Clickhouse,
    Redis,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Postgresql => "postgresql",
            SourceKind::Clickhouse => "clickhouse",
            SourceKind::Redis => "redis",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "postgresql" => Some(SourceKind::Postgresql),
            "clickhouse" => Some(SourceKind::Clickhouse),
            "redis" => Some(SourceKind::Redis),
            _ => None,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One normalized time-series observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub id: Uuid,

    /// Absent for system-wide metrics
    pub organization_id: Option<Uuid>,

    pub source_kind: SourceKind,

    pub source_name: String,

    /// Metric category such as `storage` or `connection`
    pub metric_type: String,

    pub metric_name: String,

    pub value: f64,

    pub unit: String,

    pub tags: BTreeMap<String, String>,

    pub collected_at: DateTime<Utc>,

    pub created_at: DateTime<Utc>,
}

/// Timestamps are kept at microsecond precision, the finest the stores persist
pub fn to_store_precision(at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(6)
}

impl MetricSample {
    /// Build a system-wide sample stamped with `collected_at`
    pub fn new(
        source_kind: SourceKind,
        source_name: impl Into<String>,
        metric_type: impl Into<String>,
        metric_name: impl Into<String>,
        value: f64,
        unit: impl Into<String>,
        collected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            organization_id: None,
            source_kind,
            source_name: source_name.into(),
            metric_type: metric_type.into(),
            metric_name: metric_name.into(),
            value,
            unit: unit.into(),
            tags: BTreeMap::new(),
            collected_at: to_store_precision(collected_at),
            created_at: to_store_precision(collected_at),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.tags.insert(key.into(), value.to_string());
        self
    }

    pub fn for_organization(mut self, organization_id: Uuid) -> Self {
        self.organization_id = Some(organization_id);
        self
    }
}

/// Scope an alert rule applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleScope {
    System,
    Database,
    Organization,
}

impl RuleScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleScope::System => "system",
            RuleScope::Database => "database",
            RuleScope::Organization => "organization",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "system" => Some(RuleScope::System),
            "database" => Some(RuleScope::Database),
            "organization" => Some(RuleScope::Organization),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "info" => Some(Severity::Info),
            "warning" => Some(Severity::Warning),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Comparison applied between the latest sample and a rule threshold
///
/// Unrecognized tokens are kept verbatim so a rule round-trips through the
/// store unchanged; they never trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ComparisonOperator {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Unknown(String),
}

impl ComparisonOperator {
    pub fn as_str(&self) -> &str {
        match self {
            ComparisonOperator::Gt => ">",
            ComparisonOperator::Ge => ">=",
            ComparisonOperator::Lt => "<",
            ComparisonOperator::Le => "<=",
            ComparisonOperator::Eq => "=",
            ComparisonOperator::Unknown(token) => token,
        }
    }

    /// Whether `actual` breaches `threshold` under this operator
    pub fn is_triggered(&self, actual: f64, threshold: f64) -> bool {
        match self {
            ComparisonOperator::Gt => actual > threshold,
            ComparisonOperator::Ge => actual >= threshold,
            ComparisonOperator::Lt => actual < threshold,
            ComparisonOperator::Le => actual <= threshold,
            ComparisonOperator::Eq => actual == threshold,
            ComparisonOperator::Unknown(_) => false,
        }
    }
}

impl From<&str> for ComparisonOperator {
    fn from(token: &str) -> Self {
        match token {
            ">" => ComparisonOperator::Gt,
            ">=" => ComparisonOperator::Ge,
            "<" => ComparisonOperator::Lt,
            "<=" => ComparisonOperator::Le,
            "=" => ComparisonOperator::Eq,
            other => ComparisonOperator::Unknown(other.to_string()),
        }
    }
}

impl From<String> for ComparisonOperator {
    fn from(token: String) -> Self {
        ComparisonOperator::from(token.as_str())
    }
}

impl From<ComparisonOperator> for String {
    fn from(op: ComparisonOperator) -> Self {
        op.as_str().to_string()
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Threshold rule evaluated against the latest matching sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: Uuid,

    pub name: String,

    pub description: String,

    pub rule_type: RuleScope,

    pub target_type: SourceKind,

    /// Empty matches any instance of `target_type`
    pub target_name: String,

    pub metric_name: String,

    pub operator: ComparisonOperator,

    pub threshold: f64,

    /// Stored but not consulted during evaluation
    pub duration_minutes: u32,

    pub severity: Severity,

    pub enabled: bool,

    pub notification_config: serde_json::Value,

    pub created_by: Option<Uuid>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl AlertRule {
    /// Enabled rule with empty description and notification settings
    pub fn new(
        name: impl Into<String>,
        target_type: SourceKind,
        target_name: impl Into<String>,
        metric_name: impl Into<String>,
        operator: impl Into<ComparisonOperator>,
        threshold: f64,
        severity: Severity,
    ) -> Self {
        let now = to_store_precision(Utc::now());
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: String::new(),
            rule_type: RuleScope::Database,
            target_type,
            target_name: target_name.into(),
            metric_name: metric_name.into(),
            operator: operator.into(),
            threshold,
            duration_minutes: 5,
            severity,
            enabled: true,
            notification_config: serde_json::Value::Object(Default::default()),
            created_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Component label used on log entries about this rule
    pub fn component_label(&self) -> String {
        format!("{}_{}", self.target_type, self.target_name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Critical => "critical",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "info" => Some(LogLevel::Info),
            "warning" => Some(LogLevel::Warning),
            "error" => Some(LogLevel::Error),
            "critical" => Some(LogLevel::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operational event written by the engine itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringLogEntry {
    pub id: Uuid,

    pub level: LogLevel,

    /// Engine part that wrote the entry (`scheduler`, `data_collector`, ...)
    pub source: String,

    pub component: Option<String>,

    pub organization_id: Option<Uuid>,

    pub message: String,

    pub details: serde_json::Value,

    pub created_at: DateTime<Utc>,
}

impl MonitoringLogEntry {
    pub fn new(level: LogLevel, source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            level,
            source: source.into(),
            component: None,
            organization_id: None,
            message: message.into(),
            details: serde_json::Value::Object(Default::default()),
            created_at: to_store_precision(Utc::now()),
        }
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentType {
    Database,
    Cache,
    Unknown,
}

impl ComponentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentType::Database => "database",
            ComponentType::Cache => "cache",
            ComponentType::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "database" => Some(ComponentType::Database),
            "cache" => Some(ComponentType::Cache),
            "unknown" => Some(ComponentType::Unknown),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "healthy" => Some(HealthStatus::Healthy),
            "unhealthy" => Some(HealthStatus::Unhealthy),
            _ => None,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latest liveness result for one component, keyed by name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemHealthRecord {
    pub id: Uuid,

    pub component_name: String,

    pub component_type: ComponentType,

    pub status: HealthStatus,

    pub response_time_ms: Option<u64>,

    pub error_message: Option<String>,

    pub last_checked_at: DateTime<Utc>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl SystemHealthRecord {
    pub fn healthy(
        component_name: impl Into<String>,
        component_type: ComponentType,
        response_time_ms: u64,
        checked_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            component_name: component_name.into(),
            component_type,
            status: HealthStatus::Healthy,
            response_time_ms: Some(response_time_ms),
            error_message: None,
            last_checked_at: to_store_precision(checked_at),
            created_at: to_store_precision(checked_at),
            updated_at: to_store_precision(checked_at),
        }
    }

    pub fn unhealthy(
        component_name: impl Into<String>,
        component_type: ComponentType,
        error_message: impl Into<String>,
        checked_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            component_name: component_name.into(),
            component_type,
            status: HealthStatus::Unhealthy,
            response_time_ms: None,
            error_message: Some(error_message.into()),
            last_checked_at: to_store_precision(checked_at),
            created_at: to_store_precision(checked_at),
            updated_at: to_store_precision(checked_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_table() {
        assert!(ComparisonOperator::Gt.is_triggered(81.0, 80.0));
        assert!(!ComparisonOperator::Gt.is_triggered(80.0, 80.0));
        assert!(ComparisonOperator::Ge.is_triggered(80.0, 80.0));
        assert!(ComparisonOperator::Lt.is_triggered(79.0, 80.0));
        assert!(!ComparisonOperator::Lt.is_triggered(80.0, 80.0));
        assert!(ComparisonOperator::Le.is_triggered(80.0, 80.0));
        assert!(ComparisonOperator::Eq.is_triggered(80.0, 80.0));
        assert!(!ComparisonOperator::Eq.is_triggered(80.5, 80.0));
    }

    #[test]
    fn test_unknown_operator_is_preserved() {
        let op = ComparisonOperator::from("!=");
        assert_eq!(op, ComparisonOperator::Unknown("!=".to_string()));
        assert_eq!(op.as_str(), "!=");
        assert!(!op.is_triggered(1.0, 2.0));
        assert!(!op.is_triggered(2.0, 2.0));

        let json = serde_json::to_string(&op).unwrap();
        assert_eq!(json, "\"!=\"");
        let back: ComparisonOperator = serde_json::from_str(&json).unwrap();
        assert_eq!(back, op);
    }

    #[test]
    fn test_enum_wire_names() {
        assert_eq!(serde_json::to_string(&SourceKind::Postgresql).unwrap(), "\"postgresql\"");
        assert_eq!(SourceKind::parse("clickhouse"), Some(SourceKind::Clickhouse));
        assert_eq!(SourceKind::parse("mysql"), None);
        assert_eq!(LogLevel::parse("warning"), Some(LogLevel::Warning));
        assert_eq!(HealthStatus::Unhealthy.to_string(), "unhealthy");
        assert_eq!(RuleScope::parse("organization"), Some(RuleScope::Organization));
    }

    #[test]
    fn test_sample_builders() {
        let org = Uuid::new_v4();
        let now = Utc::now();
        let sample = MetricSample::new(SourceKind::Postgresql, "primary", "connection", "active_connections", 5.0, "count", now)
            .with_tag("idle_connections", 2)
            .for_organization(org);

        assert_eq!(sample.organization_id, Some(org));
        assert_eq!(sample.tags.get("idle_connections").map(String::as_str), Some("2"));
        assert_eq!(sample.collected_at, now.trunc_subsecs(6));
    }

    #[test]
    fn test_timestamps_use_store_precision() {
        let at = DateTime::from_timestamp(1_700_000_000, 123_456_789).unwrap();
        let sample = MetricSample::new(SourceKind::Redis, "default", "memory", "used_memory_bytes", 1.0, "bytes", at);
        assert_eq!(sample.collected_at.timestamp_subsec_nanos(), 123_456_000);
        assert_eq!(sample.created_at, sample.collected_at);

        let record = SystemHealthRecord::healthy("redis", ComponentType::Cache, 1, at);
        assert_eq!(record.last_checked_at.timestamp_subsec_nanos(), 123_456_000);

        let entry = MonitoringLogEntry::new(LogLevel::Info, "test", "hello");
        assert_eq!(entry.created_at.timestamp_subsec_nanos() % 1_000, 0);
    }

    #[test]
    fn test_rule_component_label() {
        let rule = AlertRule::new("conn", SourceKind::Postgresql, "primary", "active_connections", ">", 4.0, Severity::Warning);
        assert_eq!(rule.component_label(), "postgresql_primary");
        assert_eq!(rule.operator, ComparisonOperator::Gt);
        assert!(rule.enabled);
    }

    #[test]
    fn test_health_record_shapes() {
        let now = Utc::now();
        let ok = SystemHealthRecord::healthy("redis", ComponentType::Cache, 3, now);
        assert_eq!(ok.status, HealthStatus::Healthy);
        assert_eq!(ok.response_time_ms, Some(3));
        assert!(ok.error_message.is_none());

        let bad = SystemHealthRecord::unhealthy("redis", ComponentType::Cache, "refused", now);
        assert_eq!(bad.status, HealthStatus::Unhealthy);
        assert!(bad.response_time_ms.is_none());
        assert_eq!(bad.error_message.as_deref(), Some("refused"));
    }
}
