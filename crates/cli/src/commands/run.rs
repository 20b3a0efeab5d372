//! Run Commands

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use serde::Serialize;

use storyline_common::{Database, Run, RunRequest, StoryResult, TriggerSource};
use storyline_worker::{RunQueue, SqliteRunQueue};

use crate::output::{
    format_duration, format_ts, print_item, print_list, print_success, OutputFormat, TableDisplay,
};

#[derive(Subcommand)]
pub enum RunCommands {
    /// Trigger a new run
    Trigger {
        /// Organization ID
        #[arg(long)]
        org: String,

        /// App ID
        #[arg(long)]
        app: String,

        /// Environment ID
        #[arg(long)]
        env: String,

        /// Restrict the run to these journeys (repeatable)
        #[arg(long = "journey")]
        journeys: Vec<String>,

        /// Restrict the run to these stories (repeatable)
        #[arg(long = "story")]
        stories: Vec<String>,
    },

    /// List recent runs
    List {
        /// Maximum number of runs to show
        #[arg(long, default_value = "20")]
        limit: u32,
    },

    /// Show a run with its story results
    Show {
        /// Run ID
        id: String,
    },

    /// Cancel a pending or running run
    Cancel {
        /// Run ID
        id: String,
    },
}

pub async fn execute(cmd: RunCommands, db: Database, format: OutputFormat) -> Result<()> {
    match cmd {
        RunCommands::Trigger {
            org,
            app,
            env,
            journeys,
            stories,
        } => {
            let run = Run::new(org, app, env, TriggerSource::Manual);
            db.insert_run(&run)?;

            let queue = SqliteRunQueue::new(db);
            queue
                .enqueue(&RunRequest::for_run(&run, stories, journeys))
                .await?;

            print_success(&format!("Run {} queued", run.id));
        }
        RunCommands::List { limit } => {
            let runs: Vec<RunDisplay> = db
                .list_runs(limit)?
                .into_iter()
                .map(RunDisplay::from)
                .collect();
            print_list(&runs, format);
        }
        RunCommands::Show { id } => {
            let run = db
                .get_run(&id)?
                .ok_or_else(|| anyhow::anyhow!("Run not found: {}", id))?;
            print_item(&RunDisplay::from(run), format);

            let results: Vec<ResultDisplay> = db
                .list_story_results(&id)?
                .into_iter()
                .map(ResultDisplay::from)
                .collect();
            if !results.is_empty() {
                println!();
                print_list(&results, format);
            }
        }
        RunCommands::Cancel { id } => {
            db.cancel_run(&id)?;
            print_success(&format!("Run {} cancelled", id));
        }
    }

    Ok(())
}

/// Run display wrapper for serialization
#[derive(Serialize)]
pub struct RunDisplay {
    pub id: String,
    pub status: String,
    pub trigger: String,
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub duration: String,
    pub created: String,
}

impl From<Run> for RunDisplay {
    fn from(run: Run) -> Self {
        Self {
            id: run.id,
            status: run.status.to_string(),
            trigger: run.trigger.to_string(),
            total: run.stories_total,
            passed: run.stories_passed,
            failed: run.stories_failed,
            skipped: run.stories_skipped,
            duration: format_duration(run.duration_ms),
            created: format_ts(Some(run.created_at)),
        }
    }
}

impl TableDisplay for RunDisplay {
    fn headers() -> Vec<&'static str> {
        vec![
            "ID", "Status", "Trigger", "Total", "Passed", "Failed", "Skipped", "Duration",
            "Created",
        ]
    }

    fn row(&self) -> Vec<String> {
        let status = match self.status.as_str() {
            "completed" => self.status.green().to_string(),
            "failed" => self.status.red().to_string(),
            "running" => self.status.yellow().to_string(),
            _ => self.status.clone(),
        };
        vec![
            self.id.clone(),
            status,
            self.trigger.clone(),
            self.total.to_string(),
            self.passed.to_string(),
            self.failed.to_string(),
            self.skipped.to_string(),
            self.duration.clone(),
            self.created.clone(),
        ]
    }
}

/// Story result display wrapper
#[derive(Serialize)]
pub struct ResultDisplay {
    pub journey: String,
    pub story: String,
    pub result: String,
    pub retries: u32,
    pub duration: String,
    pub error: String,
    pub screenshot: String,
    pub heal: String,
}

impl From<StoryResult> for ResultDisplay {
    fn from(result: StoryResult) -> Self {
        let heal = match &result.heal_proposal {
            Some(p) => format!("{} ({:.0}%)", p.category, p.confidence * 100.0),
            None => "-".to_string(),
        };
        Self {
            journey: result.journey_name,
            story: result.story_name,
            result: if result.passed { "passed" } else { "failed" }.to_string(),
            retries: result.retries,
            duration: format_duration(Some(result.duration_ms)),
            error: result.error.unwrap_or_else(|| "-".to_string()),
            screenshot: result.screenshot.unwrap_or_else(|| "-".to_string()),
            heal,
        }
    }
}

impl TableDisplay for ResultDisplay {
    fn headers() -> Vec<&'static str> {
        vec![
            "Journey", "Story", "Result", "Retries", "Duration", "Error", "Screenshot", "Heal",
        ]
    }

    fn row(&self) -> Vec<String> {
        let result = if self.result == "passed" {
            self.result.green().to_string()
        } else {
            self.result.red().to_string()
        };
        vec![
            self.journey.clone(),
            self.story.clone(),
            result,
            self.retries.to_string(),
            self.duration.clone(),
            self.error.clone(),
            self.screenshot.clone(),
            self.heal.clone(),
        ]
    }
}
