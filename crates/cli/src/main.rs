//! Storyline CLI - Main Entry Point
//!
//! Operator surface over the shared state database: trigger and inspect
//! runs, import stories, manage schedules.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod output;

use commands::{env, run, schedule, story};
use storyline_common::Database;

/// Storyline CLI - Browser test-run platform
#[derive(Parser)]
#[command(name = "storyline")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Store directory
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Trigger and inspect runs
    #[command(subcommand)]
    Run(run::RunCommands),

    /// Import and list stories
    #[command(subcommand)]
    Story(story::StoryCommands),

    /// Manage scheduled runs
    #[command(subcommand)]
    Schedule(schedule::ScheduleCommands),

    /// Manage environments
    #[command(subcommand)]
    Env(env::EnvCommands),

    /// Show store status
    Status,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    let store = cli
        .store
        .unwrap_or_else(storyline_common::default_store_path);
    std::fs::create_dir_all(&store)?;
    let db = Database::open(store.join("state.db"))?;

    match cli.command {
        Commands::Run(cmd) => run::execute(cmd, db, cli.format).await?,
        Commands::Story(cmd) => story::execute(cmd, db, cli.format).await?,
        Commands::Schedule(cmd) => schedule::execute(cmd, db, cli.format).await?,
        Commands::Env(cmd) => env::execute(cmd, db, cli.format).await?,
        Commands::Status => {
            let depth = db.queue_depth()?;
            let runs = db.list_runs(5)?;
            println!("Store: {}", store.display());
            println!("Queue depth: {}", depth);
            if runs.is_empty() {
                println!("No runs yet.");
            } else {
                println!("Recent runs:");
                for run in runs {
                    println!(
                        "  {}  {}  {}/{} passed",
                        run.id, run.status, run.stories_passed, run.stories_total
                    );
                }
            }
        }
        Commands::Version => {
            println!("Storyline CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Browser test-run execution platform");
        }
    }

    Ok(())
}
