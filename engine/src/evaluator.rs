//! Alert evaluation
//!
//! Every enabled rule is compared against the most recent matching sample.
//! A triggered rule produces exactly one `warning` entry from
//! `alert_system`; a rule with no matching sample produces one `error`
//! entry from `alert_checker`. There is no suppression between passes.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::AlertsConfig;
use crate::error::Result;
use crate::metrics::EngineMetrics;
use crate::models::{AlertRule, ComparisonOperator, LogLevel, MetricSample, MonitoringLogEntry, Severity};
use crate::store::MetricStore;

const ALERT_LOG_SOURCE: &str = "alert_system";
const CHECKER_LOG_SOURCE: &str = "alert_checker";

/// A rule that fired during an evaluation pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggeredAlert {
    pub rule_id: Uuid,
    pub rule_name: String,
    pub component: String,
    pub metric_name: String,
    pub operator: ComparisonOperator,
    pub threshold: f64,
    pub actual: f64,
    pub unit: String,
    pub severity: Severity,
    pub sample_collected_at: DateTime<Utc>,
}

impl TriggeredAlert {
    fn new(rule: &AlertRule, sample: &MetricSample) -> Self {
        Self {
            rule_id: rule.id,
            rule_name: rule.name.clone(),
            component: rule.component_label(),
            metric_name: rule.metric_name.clone(),
            operator: rule.operator.clone(),
            threshold: rule.threshold,
            actual: sample.value,
            unit: sample.unit.clone(),
            severity: rule.severity,
            sample_collected_at: sample.collected_at,
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "Alert rule '{}' triggered: {} {} {} (actual: {} {})",
            self.rule_name, self.metric_name, self.operator, self.threshold, self.actual, self.unit
        )
    }
}

/// Delivery hook for triggered alerts, such as email or webhooks
///
/// Failures are reported through tracing and never stop the pass.
#[async_trait]
pub trait AlertNotifier: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, alert: &TriggeredAlert) -> Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// True when alerting is switched off in configuration
    pub skipped: bool,
    pub rules_evaluated: usize,
    pub triggered: Vec<TriggeredAlert>,
    pub rules_without_data: Vec<Uuid>,
}

pub struct AlertEvaluator {
    store: Arc<dyn MetricStore>,
    settings: AlertsConfig,
    notifiers: Vec<Arc<dyn AlertNotifier>>,
    metrics: EngineMetrics,
}

impl AlertEvaluator {
    pub fn new(store: Arc<dyn MetricStore>, settings: AlertsConfig, metrics: EngineMetrics) -> Self {
        Self {
            store,
            settings,
            notifiers: Vec::new(),
            metrics,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn AlertNotifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    /// Evaluate every enabled rule once
    ///
    /// Only a failure to load the rules is returned; per-rule problems are
    /// written to the monitoring log.
    pub async fn evaluate_all(&self) -> Result<EvaluationReport> {
        let mut report = EvaluationReport::default();
        if !self.settings.enabled {
            debug!("Alerting disabled, skipping evaluation");
            report.skipped = true;
            return Ok(report);
        }

        let rules = self.store.list_rules(true).await?;
        debug!("Evaluating {} alert rules", rules.len());

        for rule in rules.iter().filter(|rule| rule.enabled) {
            report.rules_evaluated += 1;

            let sample = match self
                .store
                .latest_sample(rule.target_type, Some(rule.target_name.as_str()), &rule.metric_name)
                .await
            {
                Ok(Some(sample)) => sample,
                Ok(None) => {
                    self.record_missing_data(rule).await;
                    report.rules_without_data.push(rule.id);
                    continue;
                }
                Err(e) => {
                    warn!(rule = %rule.name, "Failed to query metric for rule: {}", e);
                    self.write_log(
                        MonitoringLogEntry::new(
                            LogLevel::Error,
                            CHECKER_LOG_SOURCE,
                            format!("Failed to query metric for rule {}", rule.name),
                        )
                        .with_component(rule.component_label())
                        .with_details(serde_json::json!({
                            "rule_id": rule.id,
                            "metric_name": rule.metric_name,
                            "error": e.to_string(),
                        })),
                    )
                    .await;
                    continue;
                }
            };

            if rule.operator.is_triggered(sample.value, rule.threshold) {
                let alert = TriggeredAlert::new(rule, &sample);
                self.record_trigger(rule, &alert).await;
                report.triggered.push(alert);
            }
        }

        if !report.triggered.is_empty() {
            info!("{} alert rules triggered", report.triggered.len());
        }
        Ok(report)
    }

    async fn record_missing_data(&self, rule: &AlertRule) {
        warn!(rule = %rule.name, metric = %rule.metric_name, "No metric found for alert rule");
        self.metrics.record_rule_without_data();

        let entry = MonitoringLogEntry::new(
            LogLevel::Error,
            CHECKER_LOG_SOURCE,
            format!("No metric found for rule {}", rule.name),
        )
        .with_component(rule.component_label())
        .with_details(serde_json::json!({
            "rule_id": rule.id,
            "metric_name": rule.metric_name,
        }));
        self.write_log(entry).await;
    }

    async fn record_trigger(&self, rule: &AlertRule, alert: &TriggeredAlert) {
        info!(
            rule = %alert.rule_name,
            severity = %alert.severity,
            "Alert triggered: {} {} {} (actual: {})",
            alert.metric_name, alert.operator, alert.threshold, alert.actual
        );
        self.metrics.record_alert_triggered(alert.severity.as_str());

        let entry = MonitoringLogEntry::new(LogLevel::Warning, ALERT_LOG_SOURCE, alert.summary())
            .with_component(alert.component.clone())
            .with_details(serde_json::json!({
                "rule_id": rule.id,
                "metric_name": alert.metric_name,
                "threshold": alert.threshold,
                "actual": alert.actual,
                "operator": alert.operator.as_str(),
                "severity": alert.severity.as_str(),
            }));
        self.write_log(entry).await;

        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify(alert).await {
                warn!(notifier = notifier.name(), rule = %alert.rule_name, "Alert notification failed: {}", e);
            }
        }
    }

    async fn write_log(&self, entry: MonitoringLogEntry) {
        if let Err(e) = self.store.insert_log(&entry).await {
            error!("Failed to write monitoring log entry: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MonitorError;
    use crate::models::SourceKind;
    use crate::store::{InMemoryMetricStore, LogFilter};
    use std::sync::Mutex;

    struct RecordingNotifier {
        seen: Mutex<Vec<TriggeredAlert>>,
        fail: bool,
    }

    #[async_trait]
    impl AlertNotifier for RecordingNotifier {
        fn name(&self) -> &str {
            "recording"
        }

        async fn notify(&self, alert: &TriggeredAlert) -> Result<()> {
            self.seen.lock().unwrap().push(alert.clone());
            if self.fail {
                return Err(MonitorError::Generic("webhook down".to_string()));
            }
            Ok(())
        }
    }

    fn create_test_evaluator(store: Arc<InMemoryMetricStore>) -> AlertEvaluator {
        AlertEvaluator::new(store, AlertsConfig::default(), EngineMetrics::new().unwrap())
    }

    async fn seed_sample(store: &InMemoryMetricStore, instance: &str, value: f64) {
        let sample = MetricSample::new(
            SourceKind::Postgresql,
            instance,
            "connection",
            "active_connections",
            value,
            "count",
            Utc::now(),
        );
        store.insert_sample(&sample).await.unwrap();
    }

    fn rule(operator: &str, threshold: f64) -> AlertRule {
        AlertRule::new("connections high", SourceKind::Postgresql, "primary", "active_connections", operator, threshold, Severity::Warning)
    }

    async fn alert_logs(store: &InMemoryMetricStore) -> Vec<MonitoringLogEntry> {
        store
            .query_logs(&LogFilter {
                source: Some("alert_system".to_string()),
                ..LogFilter::default()
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_greater_than_boundary() {
        let store = Arc::new(InMemoryMetricStore::new());
        store.save_rule(&rule(">", 80.0)).await.unwrap();
        let evaluator = create_test_evaluator(store.clone());

        seed_sample(&store, "primary", 80.0).await;
        let report = evaluator.evaluate_all().await.unwrap();
        assert!(report.triggered.is_empty());

        seed_sample(&store, "primary", 81.0).await;
        let report = evaluator.evaluate_all().await.unwrap();
        assert_eq!(report.triggered.len(), 1);
        assert_eq!(report.triggered[0].actual, 81.0);
    }

    #[tokio::test]
    async fn test_greater_or_equal_boundary() {
        let store = Arc::new(InMemoryMetricStore::new());
        store.save_rule(&rule(">=", 80.0)).await.unwrap();
        seed_sample(&store, "primary", 80.0).await;

        let report = create_test_evaluator(store.clone()).evaluate_all().await.unwrap();
        assert_eq!(report.triggered.len(), 1);
    }

    #[tokio::test]
    async fn test_trigger_writes_one_warning_entry() {
        let store = Arc::new(InMemoryMetricStore::new());
        let rule = rule(">", 4.0);
        store.save_rule(&rule).await.unwrap();
        seed_sample(&store, "primary", 5.0).await;

        create_test_evaluator(store.clone()).evaluate_all().await.unwrap();

        let logs = alert_logs(&store).await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].level, LogLevel::Warning);
        assert_eq!(logs[0].component.as_deref(), Some("postgresql_primary"));
        assert_eq!(logs[0].details["rule_id"], serde_json::json!(rule.id));
        assert_eq!(logs[0].details["operator"], ">");
        assert_eq!(logs[0].details["actual"], 5.0);
        assert_eq!(logs[0].details["threshold"], 4.0);
        assert_eq!(logs[0].details["severity"], "warning");
        assert_eq!(store.log_count().await, 1);
    }

    #[tokio::test]
    async fn test_retriggers_every_pass() {
        let store = Arc::new(InMemoryMetricStore::new());
        store.save_rule(&rule(">", 4.0)).await.unwrap();
        seed_sample(&store, "primary", 5.0).await;
        let evaluator = create_test_evaluator(store.clone());

        evaluator.evaluate_all().await.unwrap();
        evaluator.evaluate_all().await.unwrap();

        assert_eq!(alert_logs(&store).await.len(), 2);
    }

    #[tokio::test]
    async fn test_disabled_rule_never_fires() {
        let store = Arc::new(InMemoryMetricStore::new());
        let mut disabled = rule(">", 0.0);
        disabled.enabled = false;
        store.save_rule(&disabled).await.unwrap();
        seed_sample(&store, "primary", 1000.0).await;

        let report = create_test_evaluator(store.clone()).evaluate_all().await.unwrap();
        assert_eq!(report.rules_evaluated, 0);
        assert_eq!(store.log_count().await, 0);
    }

    #[tokio::test]
    async fn test_alerting_switched_off() {
        let store = Arc::new(InMemoryMetricStore::new());
        store.save_rule(&rule(">", 0.0)).await.unwrap();
        seed_sample(&store, "primary", 10.0).await;
        let settings = AlertsConfig {
            enabled: false,
            ..AlertsConfig::default()
        };

        let evaluator = AlertEvaluator::new(store.clone(), settings, EngineMetrics::new().unwrap());
        let report = evaluator.evaluate_all().await.unwrap();
        assert!(report.skipped);
        assert_eq!(store.log_count().await, 0);
    }

    #[tokio::test]
    async fn test_missing_sample_is_logged() {
        let store = Arc::new(InMemoryMetricStore::new());
        let rule = rule(">", 4.0);
        store.save_rule(&rule).await.unwrap();
        seed_sample(&store, "replica", 50.0).await;

        let report = create_test_evaluator(store.clone()).evaluate_all().await.unwrap();
        assert_eq!(report.rules_without_data, vec![rule.id]);
        assert!(report.triggered.is_empty());

        let logs = store
            .query_logs(&LogFilter {
                source: Some("alert_checker".to_string()),
                ..LogFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].level, LogLevel::Error);
    }

    #[tokio::test]
    async fn test_empty_target_matches_any_instance() {
        let store = Arc::new(InMemoryMetricStore::new());
        let mut any = rule(">", 4.0);
        any.target_name = String::new();
        store.save_rule(&any).await.unwrap();
        seed_sample(&store, "replica", 5.0).await;

        let report = create_test_evaluator(store.clone()).evaluate_all().await.unwrap();
        assert_eq!(report.triggered.len(), 1);
        assert_eq!(report.triggered[0].component, "postgresql_");
    }

    #[tokio::test]
    async fn test_unknown_operator_never_fires() {
        let store = Arc::new(InMemoryMetricStore::new());
        store.save_rule(&rule("!=", 4.0)).await.unwrap();
        seed_sample(&store, "primary", 5.0).await;

        let report = create_test_evaluator(store.clone()).evaluate_all().await.unwrap();
        assert_eq!(report.rules_evaluated, 1);
        assert!(report.triggered.is_empty());
        assert_eq!(store.log_count().await, 0);
    }

    #[tokio::test]
    async fn test_notifier_failure_is_not_fatal() {
        let store = Arc::new(InMemoryMetricStore::new());
        store.save_rule(&rule(">", 4.0)).await.unwrap();
        seed_sample(&store, "primary", 5.0).await;

        let notifier = Arc::new(RecordingNotifier {
            seen: Mutex::new(Vec::new()),
            fail: true,
        });
        let evaluator = create_test_evaluator(store.clone()).with_notifier(notifier.clone());

        let report = evaluator.evaluate_all().await.unwrap();
        assert_eq!(report.triggered.len(), 1);
        assert_eq!(notifier.seen.lock().unwrap().len(), 1);
        assert_eq!(alert_logs(&store).await.len(), 1);
    }
}
