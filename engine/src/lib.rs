//! SaaS monitor engine library
//!
//! Background monitoring for a multi-tenant platform: a scheduler that
//! drives periodic metric collection across the relational, columnar and
//! cache backends, threshold alert evaluation, and retention cleanup of the
//! metric store.

pub mod collector;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod metrics;
pub mod models;
pub mod retention;
pub mod scheduler;
pub mod sources;
pub mod store;

// Re-export commonly used types
pub use collector::{CollectionReport, DataCollector};
pub use config::MonitorConfig;
pub use error::{MonitorError, Result, SchedulerError};
pub use evaluator::{AlertEvaluator, AlertNotifier, EvaluationReport, TriggeredAlert};
pub use metrics::EngineMetrics;
pub use models::{AlertRule, ComparisonOperator, MetricSample, MonitoringLogEntry, SourceKind, SystemHealthRecord};
pub use retention::{CleanupReport, RetentionCleaner};
pub use scheduler::{TaskIntervals, TaskKind, TaskScheduler, TaskStatus};
pub use sources::{CacheSource, ColumnarSource, RelationalSource, SourceSet};
pub use store::{InMemoryMetricStore, MetricStore, SqliteMetricStore};
