//! Storyline Worker Daemon
//!
//! Consumes queued run requests, executes stories through the Playwright
//! bridge, and promotes due scheduled jobs into runs.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use storyline_engine::{
    BridgeConfig, Browser, DiagnosticConfig, ExecutionOptions, FsScreenshotStore,
    HttpDiagnosticService, PlaywrightBridge, StoryRunner,
};
use storyline_worker::{
    RunOrchestrator, ScheduleTrigger, SqliteRunQueue, WorkerConfig, WorkerPool,
};

#[derive(Parser)]
#[command(name = "storylined")]
#[command(about = "Storyline daemon - test run execution and scheduling")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "~/.storyline/config.toml")]
    config: PathBuf,

    /// Store directory (overrides config)
    #[arg(short, long)]
    store: Option<PathBuf>,

    /// Worker concurrency (overrides config)
    #[arg(long)]
    concurrency: Option<usize>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    info!("Storyline daemon v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration with CLI overrides
    let config_path = expand_home(&cli.config);
    let mut config = WorkerConfig::load(&config_path)?;
    if let Some(store) = cli.store {
        config.store_path = store;
    }
    if let Some(concurrency) = cli.concurrency {
        config.concurrency = concurrency;
    }

    // Ensure store directory exists
    tokio::fs::create_dir_all(&config.store_path).await?;

    // Shared state database and queue
    let db = storyline_common::Database::open(config.db_path())?;
    let queue = Arc::new(SqliteRunQueue::new(db.clone()));

    // Browser handle: lazily started, explicitly shut down on exit.
    let browser = Arc::new(PlaywrightBridge::new(BridgeConfig {
        node_binary: config.bridge.node_binary.clone(),
        headless: config.bridge.headless,
        default_timeout_ms: config.bridge.default_timeout_ms,
    }));

    let mut runner = StoryRunner::new(browser.clone())
        .with_screenshots(Arc::new(FsScreenshotStore::new(config.screenshot_dir())))
        .with_options(ExecutionOptions {
            retry_count: config.execution.retry_count,
            screenshot_on_failure: config.execution.screenshot_on_failure,
            settle_timeout_ms: config.execution.settle_timeout_ms,
            ..Default::default()
        });

    // Diagnostics are optional: without an API key the engine degrades to
    // classification-only (no heal proposals, visual checks skipped).
    if config.diagnostics.enabled {
        match std::env::var(&config.diagnostics.api_key_env) {
            Ok(api_key) if !api_key.is_empty() => {
                let service = HttpDiagnosticService::new(DiagnosticConfig {
                    endpoint: config.diagnostics.endpoint.clone(),
                    api_key,
                    model: config.diagnostics.model.clone(),
                    max_tokens: config.diagnostics.max_tokens,
                    ..Default::default()
                })?;
                runner = runner.with_diagnostics(Arc::new(service));
            }
            _ => warn!(
                "Diagnostics enabled but {} is not set; heal proposals disabled",
                config.diagnostics.api_key_env
            ),
        }
    }

    let orchestrator = Arc::new(RunOrchestrator::new(db.clone(), runner));

    // Schedule trigger (background task)
    let trigger = ScheduleTrigger::new(
        db.clone(),
        queue.clone(),
        Duration::from_secs(config.trigger_interval_secs),
    );
    let trigger_handle = tokio::spawn(trigger.run());

    // Worker pool (background task)
    let pool = Arc::new(WorkerPool::new(
        db,
        queue,
        orchestrator,
        config.concurrency,
        Duration::from_secs(config.poll_interval_secs),
    ));
    let pool_handle = tokio::spawn(pool.run());

    info!(
        store = %config.store_path.display(),
        concurrency = config.concurrency,
        "Daemon started and waiting for runs"
    );

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = pool_handle => {
            if let Err(e) = result {
                tracing::error!("Worker pool error: {}", e);
            }
        }
        result = trigger_handle => {
            if let Err(e) = result {
                tracing::error!("Schedule trigger error: {}", e);
            }
        }
    }

    // Browser shutdown hook tied to process lifecycle.
    if let Err(e) = browser.shutdown().await {
        warn!("Browser shutdown failed: {}", e);
    }

    info!("Daemon shutdown complete");
    Ok(())
}

fn expand_home(path: &std::path::Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}
