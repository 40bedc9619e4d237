//! SaaS monitor engine entry point
//!
//! Hosts the task scheduler over the SQLite metric store, or runs a single
//! collection, evaluation or cleanup pass from the command line.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use saas_monitor_engine::{
    config::MonitorConfig,
    metrics::EngineMetrics,
    sources::fixed::{FixedCacheSource, FixedColumnarSource, FixedRelationalSource},
    sources::{PlatformAggregates, SourceSet, TenantStats},
    store::{LogFilter, MetricStore, SqliteMetricStore},
    AlertEvaluator, DataCollector, RetentionCleaner, TaskScheduler,
};

/// SaaS monitor command line interface
#[derive(Parser)]
#[command(name = "saas-monitor")]
#[command(about = "Background monitoring engine for the SaaS platform")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long)]
    json_logs: bool,

    /// Subcommand
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler until SIGINT or SIGTERM
    Run {
        /// Collect from built-in sample sources instead of an empty source set
        #[arg(long)]
        demo_sources: bool,
    },

    /// Run one collection sweep
    Collect {
        /// Collect from built-in sample sources
        #[arg(long)]
        demo_sources: bool,
    },

    /// Run one alert evaluation pass
    Evaluate,

    /// Run one retention cleanup sweep
    Cleanup,

    /// Print component health records
    Health,

    /// Print recent monitoring log entries
    Logs {
        /// Number of entries to show
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,

        /// Only entries written by this engine part
        #[arg(long)]
        source: Option<String>,
    },

    /// Validate configuration
    Config {
        /// Show effective configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_configuration(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {:#}", e);
            process::exit(1);
        }
    };

    if let Err(e) = initialize_logging(&cli, &config) {
        eprintln!("Failed to initialize logging: {:#}", e);
        process::exit(1);
    }

    let result = match &cli.command {
        Some(Commands::Run { demo_sources }) => run_scheduler(config, *demo_sources).await,
        Some(Commands::Collect { demo_sources }) => collect_once(config, *demo_sources).await,
        Some(Commands::Evaluate) => evaluate_once(config).await,
        Some(Commands::Cleanup) => cleanup_once(config).await,
        Some(Commands::Health) => show_health(config).await,
        Some(Commands::Logs { limit, source }) => show_logs(config, *limit, source.clone()).await,
        Some(Commands::Config { show }) => handle_config(config, *show),
        None => run_scheduler(config, false).await,
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        process::exit(1);
    }
}

/// Initialize logging from CLI flags, falling back to configuration
fn initialize_logging(cli: &Cli, config: &MonitorConfig) -> anyhow::Result<()> {
    let requested = cli.log_level.as_deref().unwrap_or(&config.logging.level);
    let log_level = match requested.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("saas_monitor_engine={}", log_level).parse()?)
        .add_directive(format!("saas_monitor={}", log_level).parse()?)
        .add_directive("tokio=warn".parse()?)
        .add_directive("hyper=warn".parse()?);

    if cli.json_logs || config.logging.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false))
            .init();
    }

    Ok(())
}

/// Load configuration: explicit file, then default location, then env overrides
fn load_configuration(cli: &Cli) -> anyhow::Result<MonitorConfig> {
    let path = match &cli.config {
        Some(path) => Some(path.clone()),
        None => MonitorConfig::default_config_path().ok(),
    };

    if let Some(path) = &cli.config {
        if !path.exists() {
            anyhow::bail!("configuration file not found: {}", path.display());
        }
    }

    MonitorConfig::load_with_fallback(path).context("invalid configuration")
}

fn open_store(config: &MonitorConfig) -> anyhow::Result<Arc<SqliteMetricStore>> {
    let store = SqliteMetricStore::open(&config.store.path)
        .with_context(|| format!("cannot open metric store at {}", config.store.path.display()))?;
    Ok(Arc::new(store))
}

fn engine_metrics(config: &MonitorConfig) -> anyhow::Result<EngineMetrics> {
    let metrics = if config.telemetry.enabled {
        EngineMetrics::new()?
    } else {
        EngineMetrics::disabled()?
    };
    Ok(metrics)
}

/// Fixed sources describing a small platform, for dry runs
fn demo_sources() -> SourceSet {
    let relational = FixedRelationalSource::new("light_admin")
        .with_pool(5, 2, 10)
        .with_size_bytes(256 * 1024 * 1024)
        .with_object("public.auth_users", 48 * 1024 * 1024, 12_000)
        .with_object("public.subscription_users", 16 * 1024 * 1024, 3_400)
        .with_aggregates(PlatformAggregates {
            organizations: 42,
            users: 12_000,
            active_users: 3_100,
            subscriptions_total: 3_400,
            active_subscriptions: 2_900,
            monthly_revenue: 58_000.0,
        })
        .with_tenant(TenantStats {
            organization_id: Uuid::new_v4(),
            organization_name: "Demo Org".to_string(),
            user_count: 25,
            workspace_count: 3,
            active_subscriptions: 1,
            monthly_usage: 12.0,
        });
    let columnar = FixedColumnarSource::new("events")
        .with_stats(2 * 1024 * 1024 * 1024, 12, 48_000_000)
        .with_table("page_views", 1024 * 1024 * 1024, 30_000_000)
        .with_slow_queries(3, 1_450.0, 2_900.0);
    let cache = FixedCacheSource::new("default").with_counters(64 * 1024 * 1024, 18, 9_000, 1_000);

    SourceSet::new()
        .with_relational(Arc::new(relational))
        .with_columnar(Arc::new(columnar))
        .with_cache(Arc::new(cache))
}

fn source_set(demo: bool) -> SourceSet {
    if demo {
        info!("Using built-in demo sources");
        demo_sources()
    } else {
        SourceSet::new()
    }
}

/// Host the scheduler until a shutdown signal arrives
async fn run_scheduler(config: MonitorConfig, demo: bool) -> anyhow::Result<()> {
    let store = open_store(&config)?;
    let metrics = engine_metrics(&config)?;
    let scheduler = TaskScheduler::new(store, source_set(demo), &config, metrics.clone());

    scheduler.start()?;
    info!(
        "Monitoring engine running (collection every {} minutes, retention {} days)",
        config.monitoring.collect_interval_minutes, config.monitoring.retention_days
    );

    wait_for_shutdown().await?;

    info!("Initiating graceful shutdown");
    scheduler.shutdown().await;

    if metrics.is_enabled() {
        info!("Engine telemetry at shutdown:\n{}", metrics.export_metrics("json")?);
    }
    Ok(())
}

async fn wait_for_shutdown() -> anyhow::Result<()> {
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT");
        }
    }

    Ok(())
}

async fn collect_once(config: MonitorConfig, demo: bool) -> anyhow::Result<()> {
    let store = open_store(&config)?;
    let collector = DataCollector::new(store, source_set(demo), config.collection.clone(), engine_metrics(&config)?);

    let report = collector.collect_all().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn evaluate_once(config: MonitorConfig) -> anyhow::Result<()> {
    let store = open_store(&config)?;
    let evaluator = AlertEvaluator::new(store, config.monitoring.alerts.clone(), engine_metrics(&config)?);

    let report = evaluator.evaluate_all().await?;
    if report.skipped {
        println!("Alerting is disabled");
        return Ok(());
    }

    println!("Rules evaluated: {}", report.rules_evaluated);
    println!("Rules without data: {}", report.rules_without_data.len());
    for alert in &report.triggered {
        println!("[{}] {}", alert.severity, alert.summary());
    }
    Ok(())
}

async fn cleanup_once(config: MonitorConfig) -> anyhow::Result<()> {
    let store = open_store(&config)?;
    let cleaner = RetentionCleaner::new(store, config.monitoring.retention_days, engine_metrics(&config)?);

    let report = cleaner.cleanup().await?;
    println!("Cutoff: {}", report.cutoff.to_rfc3339());
    println!("Samples deleted: {}", report.samples_deleted);
    println!("Log entries deleted: {}", report.logs_deleted);
    Ok(())
}

async fn show_health(config: MonitorConfig) -> anyhow::Result<()> {
    let store = open_store(&config)?;
    let records = store.list_health().await?;

    if records.is_empty() {
        println!("No health records yet");
        return Ok(());
    }

    for record in records {
        let detail = match (&record.response_time_ms, &record.error_message) {
            (Some(ms), _) => format!("{} ms", ms),
            (None, Some(message)) => message.clone(),
            (None, None) => String::new(),
        };
        println!(
            "{:<24} {:<9} {:<10} {} ({})",
            record.component_name,
            record.component_type.as_str(),
            record.status,
            record.last_checked_at.to_rfc3339(),
            detail
        );
    }
    Ok(())
}

async fn show_logs(config: MonitorConfig, limit: usize, source: Option<String>) -> anyhow::Result<()> {
    let store = open_store(&config)?;
    let filter = LogFilter {
        source,
        limit: Some(limit),
        ..LogFilter::default()
    };

    for entry in store.query_logs(&filter).await? {
        println!(
            "{} {:<8} {:<15} {:<24} {} {}",
            entry.created_at.to_rfc3339(),
            entry.level,
            entry.source,
            entry.component.as_deref().unwrap_or("-"),
            entry.message,
            entry.details
        );
    }
    Ok(())
}

fn handle_config(config: MonitorConfig, show: bool) -> anyhow::Result<()> {
    config.validate()?;
    println!("Configuration is valid");

    if show {
        println!("{}", toml::to_string_pretty(&config)?);
    }
    Ok(())
}
