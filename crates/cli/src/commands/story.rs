//! Story Commands

use anyhow::Result;
use clap::Subcommand;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use storyline_common::{Database, Journey, Outcome, Step, Story};

use crate::output::{format_ts, print_list, print_success, OutputFormat, TableDisplay};

#[derive(Subcommand)]
pub enum StoryCommands {
    /// Import journeys and stories from a YAML file
    Import {
        /// YAML file describing journeys and stories
        file: PathBuf,

        /// App ID the journeys belong to
        #[arg(long)]
        app: String,
    },

    /// List stories for an app
    List {
        /// App ID
        #[arg(long)]
        app: String,
    },
}

pub async fn execute(cmd: StoryCommands, db: Database, format: OutputFormat) -> Result<()> {
    match cmd {
        StoryCommands::Import { file, app } => {
            let content = std::fs::read_to_string(&file)?;
            let import: ImportFile = serde_yaml::from_str(&content)?;

            let mut journeys = 0;
            let mut stories = 0;

            for (journey_position, entry) in import.journeys.into_iter().enumerate() {
                let journey = match db.get_journey_by_name(&app, &entry.name)? {
                    Some(existing) => existing,
                    None => {
                        let journey = Journey::new(
                            &app,
                            &entry.name,
                            entry.title.as_deref().unwrap_or(&entry.name),
                            journey_position as i64,
                        );
                        db.insert_journey(&journey)?;
                        journeys += 1;
                        journey
                    }
                };

                for (position, story) in entry.stories.into_iter().enumerate() {
                    let mut record = Story::new(
                        &journey.id,
                        &story.name,
                        story.title.as_deref().unwrap_or(&story.name),
                        story.steps,
                        story.outcome,
                        position as i64,
                    );
                    record.enabled = story.enabled;
                    db.insert_story(&record)?;
                    stories += 1;
                }
            }

            print_success(&format!(
                "Imported {} journey(s) and {} story(ies)",
                journeys, stories
            ));
        }
        StoryCommands::List { app } => {
            let mut rows = Vec::new();
            for journey in db.list_journeys(&app)? {
                for story in db.list_stories(&journey.id)? {
                    rows.push(StoryDisplay::new(&journey, story));
                }
            }
            print_list(&rows, format);
        }
    }

    Ok(())
}

/// YAML import format
#[derive(Deserialize)]
struct ImportFile {
    journeys: Vec<ImportJourney>,
}

#[derive(Deserialize)]
struct ImportJourney {
    name: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    stories: Vec<ImportStory>,
}

#[derive(Deserialize)]
struct ImportStory {
    name: String,
    #[serde(default)]
    title: Option<String>,
    steps: Vec<Step>,
    #[serde(default)]
    outcome: Outcome,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Story display wrapper
#[derive(Serialize)]
pub struct StoryDisplay {
    pub id: String,
    pub journey: String,
    pub name: String,
    pub title: String,
    pub steps: usize,
    pub enabled: bool,
    pub last_result: String,
    pub last_run: String,
}

impl StoryDisplay {
    fn new(journey: &Journey, story: Story) -> Self {
        Self {
            id: story.id,
            journey: journey.name.clone(),
            name: story.name,
            title: story.title,
            steps: story.steps.len(),
            enabled: story.enabled,
            last_result: story
                .last_result
                .map(|v| v.to_string())
                .unwrap_or_else(|| "-".to_string()),
            last_run: format_ts(story.last_run_at),
        }
    }
}

impl TableDisplay for StoryDisplay {
    fn headers() -> Vec<&'static str> {
        vec![
            "ID", "Journey", "Name", "Title", "Steps", "Enabled", "Last Result", "Last Run",
        ]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.journey.clone(),
            self.name.clone(),
            self.title.clone(),
            self.steps.to_string(),
            self.enabled.to_string(),
            self.last_result.clone(),
            self.last_run.clone(),
        ]
    }
}
