//! Schedule Commands

use anyhow::Result;
use chrono::Utc;
use clap::Subcommand;
use serde::Serialize;

use storyline_common::{now_ms, Database, ScheduledJob};
use storyline_worker::cron;

use crate::output::{format_ts, print_list, print_success, OutputFormat, TableDisplay};

#[derive(Subcommand)]
pub enum ScheduleCommands {
    /// Add a new schedule
    Add {
        /// Schedule name
        #[arg(long)]
        name: String,

        /// Organization ID
        #[arg(long)]
        org: String,

        /// App ID
        #[arg(long)]
        app: String,

        /// Environment ID
        #[arg(long)]
        env: String,

        /// Cron expression (5-field, single values or `*`)
        #[arg(long)]
        cron: String,

        /// IANA timezone for the schedule
        #[arg(long, default_value = "UTC")]
        timezone: String,

        /// Restrict scheduled runs to these journeys (repeatable)
        #[arg(long = "journey")]
        journeys: Vec<String>,
    },

    /// List all schedules
    List,

    /// Remove a schedule by name
    Remove {
        /// Schedule name
        name: String,
    },

    /// Preview the next fire time of a cron expression
    Preview {
        /// Cron expression
        #[arg(long)]
        cron: String,

        /// IANA timezone
        #[arg(long, default_value = "UTC")]
        timezone: String,
    },
}

pub async fn execute(cmd: ScheduleCommands, db: Database, format: OutputFormat) -> Result<()> {
    match cmd {
        ScheduleCommands::Add {
            name,
            org,
            app,
            env,
            cron: expression,
            timezone,
            journeys,
        } => {
            cron::validate(&expression)
                .map_err(|e| anyhow::anyhow!("Invalid cron expression {:?}: {}", expression, e))?;

            let next = cron::next_fire(&expression, &timezone, Utc::now());
            let job = ScheduledJob {
                id: uuid_string(),
                organization_id: org,
                app_id: app,
                environment_id: env,
                name: name.clone(),
                cron_expression: expression,
                timezone,
                journey_ids: journeys,
                enabled: true,
                next_run_at: Some(next.timestamp_millis()),
                last_run_at: None,
                created_at: now_ms(),
            };
            db.insert_scheduled_job(&job)?;
            print_success(&format!("Schedule {:?} added; next run at {}", name, next));
        }
        ScheduleCommands::List => {
            let jobs: Vec<JobDisplay> = db
                .list_scheduled_jobs()?
                .into_iter()
                .map(JobDisplay::from)
                .collect();
            print_list(&jobs, format);
        }
        ScheduleCommands::Remove { name } => {
            db.remove_scheduled_job(&name)?;
            print_success(&format!("Schedule {:?} removed", name));
        }
        ScheduleCommands::Preview {
            cron: expression,
            timezone,
        } => {
            cron::validate(&expression)
                .map_err(|e| anyhow::anyhow!("Invalid cron expression {:?}: {}", expression, e))?;
            let next = cron::next_fire(&expression, &timezone, Utc::now());
            println!("Next fire: {}", next);
        }
    }

    Ok(())
}

fn uuid_string() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Scheduled job display wrapper
#[derive(Serialize)]
pub struct JobDisplay {
    pub name: String,
    pub cron: String,
    pub timezone: String,
    pub enabled: bool,
    pub next_run: String,
    pub last_run: String,
}

impl From<ScheduledJob> for JobDisplay {
    fn from(job: ScheduledJob) -> Self {
        Self {
            name: job.name,
            cron: job.cron_expression,
            timezone: job.timezone,
            enabled: job.enabled,
            next_run: format_ts(job.next_run_at),
            last_run: format_ts(job.last_run_at),
        }
    }
}

impl TableDisplay for JobDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Name", "Cron", "Timezone", "Enabled", "Next Run", "Last Run"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.cron.clone(),
            self.timezone.clone(),
            self.enabled.to_string(),
            self.next_run.clone(),
            self.last_run.clone(),
        ]
    }
}
