//! Task scheduler
//!
//! Owns the three periodic jobs of the engine: metric collection, alert
//! evaluation and retention cleanup. Each job is one tokio task with its
//! own interval and cancellation token. The registry of running jobs and
//! the running flag sit behind a single mutex that is never held across an
//! await point.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::collector::DataCollector;
use crate::config::MonitorConfig;
use crate::error::{Result, SchedulerError, SchedulerResult};
use crate::evaluator::AlertEvaluator;
use crate::metrics::EngineMetrics;
use crate::models::{LogLevel, MonitoringLogEntry};
use crate::retention::RetentionCleaner;
use crate::sources::SourceSet;
use crate::store::MetricStore;

const LOG_SOURCE: &str = "scheduler";

/// The periodic jobs the scheduler knows how to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskKind {
    DataCollection,
    AlertChecker,
    DataCleanup,
}

impl TaskKind {
    pub const ALL: [TaskKind; 3] = [TaskKind::DataCollection, TaskKind::AlertChecker, TaskKind::DataCleanup];

    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::DataCollection => "data_collection",
            TaskKind::AlertChecker => "alert_checker",
            TaskKind::DataCleanup => "data_cleanup",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        TaskKind::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Tick period of every job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskIntervals {
    pub collection: Duration,
    pub alert_check: Duration,
    pub cleanup: Duration,
}

impl TaskIntervals {
    pub const ALERT_CHECK: Duration = Duration::from_secs(60);
    pub const CLEANUP: Duration = Duration::from_secs(24 * 60 * 60);

    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            collection: config.monitoring.collect_interval(),
            alert_check: Self::ALERT_CHECK,
            cleanup: Self::CLEANUP,
        }
    }

    pub fn for_task(&self, kind: TaskKind) -> Duration {
        match kind {
            TaskKind::DataCollection => self.collection,
            TaskKind::AlertChecker => self.alert_check,
            TaskKind::DataCleanup => self.cleanup,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Running,

    /// The loop ended without being cancelled
    Exited,
}

impl TaskStatus {
    fn observe(finished: bool, cancelled: bool) -> Self {
        if finished && !cancelled {
            TaskStatus::Exited
        } else {
            TaskStatus::Running
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Running => f.write_str("running"),
            TaskStatus::Exited => f.write_str("exited"),
        }
    }
}

struct TaskHandle {
    interval: Duration,
    token: CancellationToken,
    join: JoinHandle<()>,
}

#[derive(Default)]
struct SchedulerState {
    running: bool,
    tasks: HashMap<TaskKind, TaskHandle>,
}

/// Runs one tick of a job and records failures
struct TaskRunner {
    store: Arc<dyn MetricStore>,
    collector: DataCollector,
    evaluator: AlertEvaluator,
    cleaner: RetentionCleaner,
    metrics: EngineMetrics,
}

impl TaskRunner {
    async fn run(&self, kind: TaskKind) -> Result<()> {
        match kind {
            TaskKind::DataCollection => self.collector.collect_all().await.map(|_| ()),
            TaskKind::AlertChecker => self.evaluator.evaluate_all().await.map(|_| ()),
            TaskKind::DataCleanup => self.cleaner.cleanup().await.map(|_| ()),
        }
    }

    async fn tick(&self, kind: TaskKind) {
        let started = std::time::Instant::now();
        let result = self.run(kind).await;
        self.metrics.record_task_run(kind.name(), started.elapsed(), result.is_ok());

        if let Err(e) = result {
            let recoverable = e.is_recoverable();
            if recoverable {
                warn!(task = kind.name(), category = e.category(), "Monitoring task error, retrying next tick: {}", e);
            } else {
                error!(task = kind.name(), category = e.category(), "Monitoring task error: {}", e);
            }
            let entry = MonitoringLogEntry::new(LogLevel::Error, LOG_SOURCE, "Monitoring task error")
                .with_component(kind.name())
                .with_details(serde_json::json!({
                    "error": e.to_string(),
                    "recoverable": recoverable,
                    "timestamp": Utc::now().to_rfc3339(),
                }));
            if let Err(log_err) = self.store.insert_log(&entry).await {
                error!("Failed to write task error to monitoring log: {}", log_err);
            }
        }
    }
}

/// Starts, stops and restarts the engine's periodic jobs
///
/// `start` and `restart_task` spawn onto the current Tokio runtime and
/// must be called from within one.
pub struct TaskScheduler {
    runner: Arc<TaskRunner>,
    intervals: TaskIntervals,
    state: Mutex<SchedulerState>,
}

impl TaskScheduler {
    /// Build the collector, evaluator and cleaner from configuration
    pub fn new(store: Arc<dyn MetricStore>, sources: SourceSet, config: &MonitorConfig, metrics: EngineMetrics) -> Self {
        let collector = DataCollector::new(store.clone(), sources, config.collection.clone(), metrics.clone());
        let evaluator = AlertEvaluator::new(store.clone(), config.monitoring.alerts.clone(), metrics.clone());
        let cleaner = RetentionCleaner::new(store.clone(), config.monitoring.retention_days, metrics.clone());
        Self::from_components(store, collector, evaluator, cleaner, TaskIntervals::from_config(config), metrics)
    }

    /// Schedule pre-built components, e.g. an evaluator with notifiers attached
    pub fn from_components(
        store: Arc<dyn MetricStore>,
        collector: DataCollector,
        evaluator: AlertEvaluator,
        cleaner: RetentionCleaner,
        intervals: TaskIntervals,
        metrics: EngineMetrics,
    ) -> Self {
        Self {
            runner: Arc::new(TaskRunner {
                store,
                collector,
                evaluator,
                cleaner,
                metrics,
            }),
            intervals,
            state: Mutex::new(SchedulerState::default()),
        }
    }

    pub fn with_intervals(mut self, intervals: TaskIntervals) -> Self {
        self.intervals = intervals;
        self
    }

    pub fn intervals(&self) -> TaskIntervals {
        self.intervals
    }

    fn state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register and launch all jobs
    ///
    /// Fails without launching anything if a job has a zero interval.
    pub fn start(&self) -> SchedulerResult<()> {
        let mut state = self.state();
        if state.running {
            return Err(SchedulerError::AlreadyRunning);
        }
        if let Some(kind) = TaskKind::ALL.into_iter().find(|kind| self.intervals.for_task(*kind).is_zero()) {
            return Err(SchedulerError::InvalidInterval {
                name: kind.name().to_string(),
            });
        }

        info!("Starting task scheduler");
        for kind in TaskKind::ALL {
            let handle = self.spawn_task(kind, self.intervals.for_task(kind));
            state.tasks.insert(kind, handle);
        }
        state.running = true;
        info!("Task scheduler started");
        Ok(())
    }

    /// Signal every job to stop and clear the registry
    ///
    /// Returns without waiting for a tick that is already in progress.
    /// Calling this while stopped does nothing.
    pub fn stop(&self) {
        let handles = self.cancel_all();
        if !handles.is_empty() {
            info!("Task scheduler stopped");
        }
    }

    /// Stop and wait until every job loop has exited
    pub async fn shutdown(&self) {
        let handles = self.cancel_all();
        for (kind, handle) in handles {
            if let Err(e) = handle.join.await {
                error!(task = kind.name(), "Task ended abnormally: {}", e);
            }
        }
        info!("Task scheduler shut down");
    }

    fn cancel_all(&self) -> Vec<(TaskKind, TaskHandle)> {
        let mut state = self.state();
        if !state.running {
            return Vec::new();
        }

        info!("Stopping task scheduler");
        let handles: Vec<_> = state.tasks.drain().collect();
        for (_, handle) in &handles {
            handle.token.cancel();
        }
        state.running = false;
        handles
    }

    pub fn is_running(&self) -> bool {
        self.state().running
    }

    /// Status of every registered job, keyed by name
    pub fn task_status(&self) -> BTreeMap<String, TaskStatus> {
        self.state()
            .tasks
            .iter()
            .map(|(kind, handle)| {
                let status = TaskStatus::observe(handle.join.is_finished(), handle.token.is_cancelled());
                (kind.name().to_string(), status)
            })
            .collect()
    }

    /// Cancel one job and launch it again with a fresh token
    pub fn restart_task(&self, name: &str) -> SchedulerResult<()> {
        let mut state = self.state();
        if !state.running {
            return Err(SchedulerError::NotRunning);
        }
        let kind = TaskKind::from_name(name).ok_or_else(|| SchedulerError::UnknownTask { name: name.to_string() })?;

        let interval = match state.tasks.remove(&kind) {
            Some(old) => {
                old.token.cancel();
                old.interval
            }
            None => self.intervals.for_task(kind),
        };

        info!(task = kind.name(), "Restarting task");
        let handle = self.spawn_task(kind, interval);
        state.tasks.insert(kind, handle);
        Ok(())
    }

    fn spawn_task(&self, kind: TaskKind, period: Duration) -> TaskHandle {
        let token = CancellationToken::new();
        let task_token = token.clone();
        let runner = Arc::clone(&self.runner);

        let join = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = task_token.cancelled() => {
                        debug!(task = kind.name(), "Task received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        debug!(task = kind.name(), "Task tick");
                        runner.tick(kind).await;
                    }
                }
            }
        });

        info!("{} task started with interval: {:?}", kind, period);
        TaskHandle {
            interval: period,
            token,
            join,
        }
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        for handle in state.tasks.values() {
            handle.token.cancel();
        }
    }
}
