//! Engine telemetry
//!
//! Counters and histograms describing the engine's own behaviour: task
//! runs, collection step failures, triggered alerts and retention deletes.
//! These live in a prometheus registry and never touch the metric store.

use std::time::{Duration, Instant};

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use serde::{Deserialize, Serialize};

use crate::error::{MetricsError, MetricsResult};

/// Prometheus backed engine counters
#[derive(Clone)]
pub struct EngineMetrics {
    registry: Registry,
    counters: EngineCounters,
    enabled: bool,
    start_time: Instant,
}

#[derive(Clone)]
struct EngineCounters {
    task_runs: IntCounterVec,
    task_failures: IntCounterVec,
    task_duration: HistogramVec,
    samples_written: IntCounter,
    step_failures: IntCounterVec,
    alerts_triggered: IntCounterVec,
    rules_without_data: IntCounter,
    rows_deleted: IntCounterVec,
}

/// Point-in-time snapshot of the engine counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    /// Completed collection sweeps
    pub collection_runs: u64,

    /// Completed alert evaluation passes
    pub evaluation_runs: u64,

    /// Completed retention sweeps
    pub cleanup_runs: u64,

    /// Ticks that returned an error, across all tasks
    pub task_failures: u64,

    /// Metric samples persisted by the collector
    pub samples_written: u64,

    /// Alerts triggered, across all severities
    pub alerts_triggered: u64,

    /// Rules skipped because no sample matched
    pub rules_without_data: u64,

    /// Service uptime in seconds
    pub uptime_seconds: u64,
}

impl EngineMetrics {
    /// Create a fresh registry with all engine counters registered
    pub fn new() -> MetricsResult<Self> {
        let registry = Registry::new_custom(Some("saas_monitor".to_string()), None)
            .map_err(|e| MetricsError::RegistrationFailed { name: e.to_string() })?;
        let counters = EngineCounters::new(&registry)?;

        Ok(Self {
            registry,
            counters,
            enabled: true,
            start_time: Instant::now(),
        })
    }

    /// Counters that stay registered but ignore every record call
    pub fn disabled() -> MetricsResult<Self> {
        let mut metrics = Self::new()?;
        metrics.enabled = false;
        Ok(metrics)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn record_task_run(&self, task: &str, duration: Duration, succeeded: bool) {
        if !self.enabled {
            return;
        }
        self.counters.task_runs.with_label_values(&[task]).inc();
        self.counters
            .task_duration
            .with_label_values(&[task])
            .observe(duration.as_secs_f64());
        if !succeeded {
            self.counters.task_failures.with_label_values(&[task]).inc();
        }
    }

    pub fn record_samples_written(&self, count: usize) {
        if self.enabled {
            self.counters.samples_written.inc_by(count as u64);
        }
    }

    pub fn record_step_failure(&self, step: &str) {
        if self.enabled {
            self.counters.step_failures.with_label_values(&[step]).inc();
        }
    }

    pub fn record_alert_triggered(&self, severity: &str) {
        if self.enabled {
            self.counters.alerts_triggered.with_label_values(&[severity]).inc();
        }
    }

    pub fn record_rule_without_data(&self) {
        if self.enabled {
            self.counters.rules_without_data.inc();
        }
    }

    pub fn record_rows_deleted(&self, table: &str, count: u64) {
        if self.enabled {
            self.counters.rows_deleted.with_label_values(&[table]).inc_by(count);
        }
    }

    /// Snapshot the counters
    pub fn stats(&self) -> EngineStats {
        let runs = |task: &str| self.counters.task_runs.with_label_values(&[task]).get();
        let failures = ["data_collection", "alert_checker", "data_cleanup"]
            .iter()
            .map(|task| self.counters.task_failures.with_label_values(&[task]).get())
            .sum();
        let alerts = ["info", "warning", "critical"]
            .iter()
            .map(|severity| self.counters.alerts_triggered.with_label_values(&[severity]).get())
            .sum();

        EngineStats {
            collection_runs: runs("data_collection"),
            evaluation_runs: runs("alert_checker"),
            cleanup_runs: runs("data_cleanup"),
            task_failures: failures,
            samples_written: self.counters.samples_written.get(),
            alerts_triggered: alerts,
            rules_without_data: self.counters.rules_without_data.get(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Export metrics in specified format
    pub fn export_metrics(&self, format: &str) -> MetricsResult<String> {
        match format {
            "prometheus" => {
                let encoder = TextEncoder::new();
                let metric_families = self.registry.gather();
                let mut buffer = Vec::new();
                encoder
                    .encode(&metric_families, &mut buffer)
                    .map_err(|e| MetricsError::ExportFailed { reason: e.to_string() })?;
                String::from_utf8(buffer).map_err(|e| MetricsError::ExportFailed { reason: e.to_string() })
            }
            "json" => {
                let combined = serde_json::json!({
                    "engine_stats": self.stats(),
                    "timestamp": chrono::Utc::now().timestamp()
                });

                serde_json::to_string_pretty(&combined)
                    .map_err(|e| MetricsError::ExportFailed { reason: e.to_string() })
            }
            _ => Err(MetricsError::ExportFailed {
                reason: format!("Unsupported format: {}", format),
            }),
        }
    }
}

impl EngineCounters {
    fn new(registry: &Registry) -> MetricsResult<Self> {
        let task_runs = register(
            registry,
            IntCounterVec::new(Opts::new("task_runs_total", "Scheduled task ticks"), &["task"]),
        )?;

        let task_failures = register(
            registry,
            IntCounterVec::new(Opts::new("task_failures_total", "Scheduled task ticks that failed"), &["task"]),
        )?;

        let task_duration = register(
            registry,
            HistogramVec::new(
                HistogramOpts::new("task_duration_seconds", "Scheduled task tick duration")
                    .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0]),
                &["task"],
            ),
        )?;

        let samples_written = register(
            registry,
            IntCounter::new("samples_written_total", "Metric samples persisted"),
        )?;

        let step_failures = register(
            registry,
            IntCounterVec::new(Opts::new("collection_step_failures_total", "Failed collection steps"), &["step"]),
        )?;

        let alerts_triggered = register(
            registry,
            IntCounterVec::new(Opts::new("alerts_triggered_total", "Triggered alert rules"), &["severity"]),
        )?;

        let rules_without_data = register(
            registry,
            IntCounter::new("rules_without_data_total", "Alert rules with no matching sample"),
        )?;

        let rows_deleted = register(
            registry,
            IntCounterVec::new(Opts::new("retention_rows_deleted_total", "Rows removed by retention"), &["table"]),
        )?;

        Ok(Self {
            task_runs,
            task_failures,
            task_duration,
            samples_written,
            step_failures,
            alerts_triggered,
            rules_without_data,
            rows_deleted,
        })
    }
}

fn register<M>(registry: &Registry, metric: prometheus::Result<M>) -> MetricsResult<M>
where
    M: prometheus::core::Collector + Clone + 'static,
{
    let metric = metric.map_err(|e| MetricsError::RegistrationFailed { name: e.to_string() })?;
    registry
        .register(Box::new(metric.clone()))
        .map_err(|e| MetricsError::RegistrationFailed { name: e.to_string() })?;
    Ok(metric)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = EngineMetrics::new().unwrap();
        let stats = metrics.stats();
        assert_eq!(stats.collection_runs, 0);
        assert_eq!(stats.samples_written, 0);
        assert!(metrics.is_enabled());
    }

    #[test]
    fn test_metrics_recording() {
        let metrics = EngineMetrics::new().unwrap();

        metrics.record_task_run("data_collection", Duration::from_millis(20), true);
        metrics.record_task_run("data_collection", Duration::from_millis(30), false);
        metrics.record_task_run("alert_checker", Duration::from_millis(5), true);
        metrics.record_samples_written(12);
        metrics.record_alert_triggered("warning");
        metrics.record_alert_triggered("critical");
        metrics.record_rule_without_data();
        metrics.record_rows_deleted("resource_metrics", 4);

        let stats = metrics.stats();
        assert_eq!(stats.collection_runs, 2);
        assert_eq!(stats.evaluation_runs, 1);
        assert_eq!(stats.task_failures, 1);
        assert_eq!(stats.samples_written, 12);
        assert_eq!(stats.alerts_triggered, 2);
        assert_eq!(stats.rules_without_data, 1);
    }

    #[test]
    fn test_disabled_metrics_ignore_records() {
        let metrics = EngineMetrics::disabled().unwrap();
        metrics.record_samples_written(5);
        metrics.record_task_run("data_cleanup", Duration::from_millis(1), true);

        let stats = metrics.stats();
        assert_eq!(stats.samples_written, 0);
        assert_eq!(stats.cleanup_runs, 0);
    }

    #[test]
    fn test_metrics_export() {
        let metrics = EngineMetrics::new().unwrap();
        metrics.record_step_failure("redis");

        let prometheus_output = metrics.export_metrics("prometheus").unwrap();
        assert!(prometheus_output.contains("saas_monitor_collection_step_failures_total"));

        let json_output = metrics.export_metrics("json").unwrap();
        assert!(json_output.contains("engine_stats"));

        assert!(metrics.export_metrics("xml").is_err());
    }
}
