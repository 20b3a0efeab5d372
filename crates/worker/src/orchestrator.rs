//! Run orchestrator
//!
//! Drives one run end-to-end: resolves the story set, executes stories
//! sequentially through the engine, persists incremental progress after
//! every story, and finalizes run status and aggregate counts.

use std::collections::HashMap;
use tracing::{error, info, warn};

use storyline_common::{
    now_ms, Database, Error, Result, Run, RunProgress, RunRequest, RunStatus, Story, StoryResult,
    Verdict,
};
use storyline_engine::{StoryExecution, StoryRunner};

/// Orchestrates the sequential story loop for one run at a time.
pub struct RunOrchestrator {
    db: Database,
    runner: StoryRunner,
}

impl RunOrchestrator {
    pub fn new(db: Database, runner: StoryRunner) -> Self {
        Self { db, runner }
    }

    /// Execute one claimed run request.
    ///
    /// Errors returned from here mean the run never transitioned to running
    /// (resolution faults); the caller is responsible for marking the run
    /// failed. Everything after the `running` transition is absorbed at
    /// story granularity.
    pub async fn execute<F>(&self, request: &RunRequest, mut on_progress: F) -> Result<()>
    where
        F: FnMut(&RunProgress),
    {
        let run = self
            .db
            .get_run(&request.run_id)?
            .ok_or_else(|| Error::NotFound {
                kind: "run".to_string(),
                id: request.run_id.clone(),
            })?;

        let environment =
            self.db
                .get_environment(&request.environment_id)?
                .ok_or_else(|| Error::NotFound {
                    kind: "environment".to_string(),
                    id: request.environment_id.clone(),
                })?;

        let stories = self.resolve_stories(request)?;

        if stories.is_empty() {
            info!(run = %run.id, "No stories to run; completing empty run");
            self.db.complete_empty_run(&run.id, now_ms())?;
            return Ok(());
        }

        let total = stories.len() as u32;
        let started_at = now_ms();
        self.db.mark_run_running(&run.id, total, started_at)?;
        info!(run = %run.id, total, "Run started");

        let mut journey_names: HashMap<String, String> = HashMap::new();
        let mut passed = 0u32;
        let mut failed = 0u32;

        for (index, story) in stories.iter().enumerate() {
            // Required check between stories: a cancelled run stops before
            // the next story; a story already in flight ran to completion.
            if let Some(current) = self.db.get_run(&run.id)? {
                if current.status == RunStatus::Cancelled {
                    let skipped = total - index as u32;
                    warn!(run = %run.id, skipped, "Run cancelled; skipping remaining stories");
                    self.db.update_run_skipped(&run.id, skipped)?;
                    return Ok(());
                }
            }

            on_progress(&RunProgress {
                total,
                completed: index as u32,
                passed,
                failed,
                current: Some(story.title.clone()),
            });

            let journey_name = self.journey_name(&mut journey_names, &story.journey_id);

            let result = match self.runner.run(story, &environment.base_url).await {
                Ok(execution) => build_result(&run, story, &journey_name, execution),
                Err(e) => {
                    // Orchestration-level fault, not a story failure: record
                    // a synthetic failed result and keep the run going.
                    error!(run = %run.id, story = %story.name, "Story execution fault: {}", e);
                    synthetic_failure(&run, story, &journey_name, e.to_string())
                }
            };

            if result.passed {
                passed += 1;
            } else {
                failed += 1;
            }

            if let Err(e) = self.persist_story_outcome(&run, story, &result, index as u32, passed, failed) {
                error!(run = %run.id, story = %story.name, "Failed to persist story outcome: {}", e);
            }
        }

        let completed_at = now_ms();
        self.db
            .complete_run(&run.id, completed_at, completed_at - started_at)?;

        on_progress(&RunProgress {
            total,
            completed: total,
            passed,
            failed,
            current: None,
        });

        info!(run = %run.id, passed, failed, "Run completed");
        Ok(())
    }

    /// Resolve the story set: explicit story ids, else journey scope, else
    /// every enabled story under the app. Always enabled-only, always in
    /// position order.
    fn resolve_stories(&self, request: &RunRequest) -> Result<Vec<Story>> {
        if !request.story_ids.is_empty() {
            self.db.stories_by_ids(&request.story_ids)
        } else if !request.journey_ids.is_empty() {
            self.db.stories_by_journeys(&request.journey_ids)
        } else {
            self.db.stories_by_app(&request.app_id)
        }
    }

    fn journey_name(&self, cache: &mut HashMap<String, String>, journey_id: &str) -> String {
        if let Some(name) = cache.get(journey_id) {
            return name.clone();
        }
        let name = match self.db.get_journey(journey_id) {
            Ok(Some(journey)) => journey.name,
            _ => journey_id.to_string(),
        };
        cache.insert(journey_id.to_string(), name.clone());
        name
    }

    fn persist_story_outcome(
        &self,
        run: &Run,
        story: &Story,
        result: &StoryResult,
        position: u32,
        passed: u32,
        failed: u32,
    ) -> Result<()> {
        self.db.insert_story_result(result, position)?;
        let verdict = if result.passed {
            Verdict::Passed
        } else {
            Verdict::Failed
        };
        self.db.update_story_last_run(&story.id, now_ms(), verdict)?;
        // Counters are persisted immediately so partial progress is
        // externally observable mid-run.
        self.db.update_run_counters(&run.id, passed, failed)?;
        Ok(())
    }
}

fn build_result(
    run: &Run,
    story: &Story,
    journey_name: &str,
    execution: StoryExecution,
) -> StoryResult {
    StoryResult {
        id: uuid_string(),
        run_id: run.id.clone(),
        story_id: story.id.clone(),
        journey_name: journey_name.to_string(),
        story_name: story.name.clone(),
        passed: execution.passed,
        duration_ms: execution.duration_ms,
        steps: execution.steps,
        error: execution.error,
        screenshot: execution.screenshot,
        console_errors: execution.console_errors,
        heal_proposal: execution.heal_proposal,
        retries: execution.retries,
        created_at: now_ms(),
    }
}

fn synthetic_failure(
    run: &Run,
    story: &Story,
    journey_name: &str,
    error: String,
) -> StoryResult {
    StoryResult {
        id: uuid_string(),
        run_id: run.id.clone(),
        story_id: story.id.clone(),
        journey_name: journey_name.to_string(),
        story_name: story.name.clone(),
        passed: false,
        duration_ms: 0,
        steps: Vec::new(),
        error: Some(error),
        screenshot: None,
        console_errors: Vec::new(),
        heal_proposal: None,
        retries: 0,
        created_at: now_ms(),
    }
}

fn uuid_string() -> String {
    uuid::Uuid::new_v4().to_string()
}
