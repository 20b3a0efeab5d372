//! Run orchestrator behavior against an in-memory repository and a
//! scripted fake driver.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use storyline_common::{
    Database, Environment, Error, Journey, Outcome, Run, RunProgress, RunRequest, RunStatus, Step,
    Story, TriggerSource,
};
use storyline_engine::driver::{Browser, BrowserSession, Viewport};
use storyline_engine::error::{EngineError, EngineResult};
use storyline_engine::{ExecutionOptions, StoryRunner};
use storyline_worker::RunOrchestrator;

/// Fake browser whose clicks fail for a fixed set of selectors.
struct FakeBrowser {
    failing_selectors: HashSet<String>,
}

impl FakeBrowser {
    fn new<const N: usize>(failing: [&str; N]) -> Arc<Self> {
        Arc::new(Self {
            failing_selectors: failing.iter().map(|s| s.to_string()).collect(),
        })
    }
}

#[async_trait]
impl Browser for FakeBrowser {
    async fn new_session(&self, _viewport: Viewport) -> EngineResult<Box<dyn BrowserSession>> {
        Ok(Box::new(FakeSession {
            failing_selectors: self.failing_selectors.clone(),
        }))
    }

    async fn shutdown(&self) -> EngineResult<()> {
        Ok(())
    }
}

struct FakeSession {
    failing_selectors: HashSet<String>,
}

impl FakeSession {
    fn attempt(&self, selector: &str) -> EngineResult<()> {
        if self.failing_selectors.contains(selector) {
            Err(EngineError::Driver(format!(
                "Timeout 30000ms exceeded waiting for locator({:?})",
                selector
            )))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn navigate(&self, _url: &str) -> EngineResult<()> {
        Ok(())
    }

    async fn click(&self, selector: &str) -> EngineResult<()> {
        self.attempt(selector)
    }

    async fn fill(&self, selector: &str, _value: &str) -> EngineResult<()> {
        self.attempt(selector)
    }

    async fn select_option(&self, selector: &str, _value: &str) -> EngineResult<()> {
        self.attempt(selector)
    }

    async fn set_checked(&self, selector: &str, _checked: bool) -> EngineResult<()> {
        self.attempt(selector)
    }

    async fn hover(&self, selector: &str) -> EngineResult<()> {
        self.attempt(selector)
    }

    async fn focus(&self, selector: &str) -> EngineResult<()> {
        self.attempt(selector)
    }

    async fn press(&self, _key: &str) -> EngineResult<()> {
        Ok(())
    }

    async fn scroll_into_view(&self, _selector: Option<&str>) -> EngineResult<()> {
        Ok(())
    }

    async fn wait_millis(&self, _ms: u64) -> EngineResult<()> {
        Ok(())
    }

    async fn current_url(&self) -> EngineResult<String> {
        Ok("https://app.example/".to_string())
    }

    async fn is_visible(&self, _selector: &str) -> EngineResult<bool> {
        Ok(true)
    }

    async fn wait_for_network_idle(&self, _timeout_ms: u64) -> EngineResult<()> {
        Ok(())
    }

    async fn screenshot(&self) -> EngineResult<Vec<u8>> {
        Ok(vec![1, 2, 3])
    }

    async fn dom_snapshot(&self) -> EngineResult<String> {
        Ok(String::new())
    }

    async fn console_errors(&self) -> Vec<String> {
        Vec::new()
    }

    async fn close(&self) -> EngineResult<()> {
        Ok(())
    }
}

fn orchestrator(db: &Database, browser: Arc<dyn Browser>) -> RunOrchestrator {
    let runner = StoryRunner::new(browser).with_options(ExecutionOptions {
        retry_backoff: Duration::from_millis(1),
        screenshot_on_failure: false,
        ..Default::default()
    });
    RunOrchestrator::new(db.clone(), runner)
}

/// Seed an app with one journey and three single-click stories targeting
/// `#one`, `#two`, `#three`.
fn seed(db: &Database) -> (Environment, Vec<Story>) {
    let environment = Environment::new("app-1", "staging", "https://staging.example");
    db.insert_environment(&environment).unwrap();

    let journey = Journey::new("app-1", "checkout", "Checkout", 0);
    db.insert_journey(&journey).unwrap();

    let mut stories = Vec::new();
    for (i, selector) in ["#one", "#two", "#three"].iter().enumerate() {
        let story = Story::new(
            &journey.id,
            format!("story-{}", i + 1),
            format!("Story {}", i + 1),
            vec![Step {
                action: "click".to_string(),
                target: Some(selector.to_string()),
                value: None,
                description: None,
            }],
            Outcome::default(),
            i as i64,
        );
        db.insert_story(&story).unwrap();
        stories.push(story);
    }
    (environment, stories)
}

fn pending_run(db: &Database, environment: &Environment) -> Run {
    let run = Run::new("org-1", "app-1", &environment.id, TriggerSource::Manual);
    db.insert_run(&run).unwrap();
    run
}

#[tokio::test]
async fn three_stories_one_exhausts_retries() {
    let db = Database::open_memory().unwrap();
    let (environment, _stories) = seed(&db);
    let run = pending_run(&db, &environment);

    let orchestrator = orchestrator(&db, FakeBrowser::new(["#two"]));
    let request = RunRequest::for_run(&run, vec![], vec![]);

    let mut progress: Vec<RunProgress> = Vec::new();
    orchestrator
        .execute(&request, |p| progress.push(p.clone()))
        .await
        .unwrap();

    let stored = db.get_run(&run.id).unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Completed);
    assert_eq!(stored.stories_total, 3);
    assert_eq!(stored.stories_passed, 2);
    assert_eq!(stored.stories_failed, 1);
    assert_eq!(
        stored.stories_passed + stored.stories_failed,
        stored.stories_total
    );
    assert!(stored.completed_at.is_some());
    assert!(stored.duration_ms.is_some());

    // Exactly three results, in story order.
    let results = db.list_story_results(&run.id).unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].story_name, "story-1");
    assert!(results[0].passed);
    assert_eq!(results[1].story_name, "story-2");
    assert!(!results[1].passed);
    assert!(results[1].error.as_deref().unwrap().contains("#two"));
    // Every failed attempt counted: 1 first try + 3 retries.
    assert_eq!(results[1].retries, 4);
    assert_eq!(results[2].story_name, "story-3");
    assert!(results[2].passed);

    // Story bookkeeping updated.
    let story2 = db.get_story(&results[1].story_id).unwrap().unwrap();
    assert_eq!(
        story2.last_result,
        Some(storyline_common::Verdict::Failed)
    );
    assert!(story2.last_run_at.is_some());

    // Progress was reported before each story and once at the end.
    assert_eq!(progress.len(), 4);
    assert_eq!(progress[0].current.as_deref(), Some("Story 1"));
    assert_eq!(progress[3].completed, 3);
    assert_eq!(progress[3].passed, 2);
    assert_eq!(progress[3].failed, 1);
}

#[tokio::test]
async fn empty_story_set_completes_with_zero_counters() {
    let db = Database::open_memory().unwrap();
    let environment = Environment::new("app-1", "staging", "https://staging.example");
    db.insert_environment(&environment).unwrap();
    let run = pending_run(&db, &environment);

    let orchestrator = orchestrator(&db, FakeBrowser::new([]));
    let request = RunRequest::for_run(&run, vec![], vec![]);

    orchestrator.execute(&request, |_| {}).await.unwrap();

    let stored = db.get_run(&run.id).unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Completed);
    assert_eq!(stored.stories_total, 0);
    assert_eq!(stored.stories_passed, 0);
    assert_eq!(stored.stories_failed, 0);
    assert!(db.list_story_results(&run.id).unwrap().is_empty());
}

#[tokio::test]
async fn cancellation_stops_before_the_next_story() {
    let db = Database::open_memory().unwrap();
    let (environment, _stories) = seed(&db);
    let run = pending_run(&db, &environment);

    let orchestrator = orchestrator(&db, FakeBrowser::new([]));
    let request = RunRequest::for_run(&run, vec![], vec![]);

    // Cancel while the second story is about to execute: the in-flight story
    // runs to completion, the third is never attempted.
    let cancel_db = db.clone();
    let run_id = run.id.clone();
    orchestrator
        .execute(&request, move |progress| {
            if progress.completed == 1 {
                cancel_db.cancel_run(&run_id).unwrap();
            }
        })
        .await
        .unwrap();

    let stored = db.get_run(&run.id).unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Cancelled);
    assert_eq!(stored.stories_skipped, 1);

    let results = db.list_story_results(&run.id).unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.passed));

    // Persisted counters reflect the stories that did run.
    assert_eq!(stored.stories_passed, 2);
    assert_eq!(stored.stories_failed, 0);
}

#[tokio::test]
async fn missing_environment_is_a_resolution_fault() {
    let db = Database::open_memory().unwrap();
    let run = Run::new("org-1", "app-1", "env-missing", TriggerSource::Api);
    db.insert_run(&run).unwrap();

    let orchestrator = orchestrator(&db, FakeBrowser::new([]));
    let request = RunRequest::for_run(&run, vec![], vec![]);

    let err = orchestrator.execute(&request, |_| {}).await.unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));

    // The run never transitioned to running; the caller marks it failed.
    let stored = db.get_run(&run.id).unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Pending);
}

#[tokio::test]
async fn explicit_story_scope_overrides_journey_scope() {
    let db = Database::open_memory().unwrap();
    let (environment, stories) = seed(&db);
    let run = pending_run(&db, &environment);

    let orchestrator = orchestrator(&db, FakeBrowser::new([]));
    let request = RunRequest::for_run(
        &run,
        vec![stories[2].id.clone()],
        vec![stories[0].journey_id.clone()],
    );

    orchestrator.execute(&request, |_| {}).await.unwrap();

    let stored = db.get_run(&run.id).unwrap().unwrap();
    assert_eq!(stored.stories_total, 1);
    let results = db.list_story_results(&run.id).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].story_name, "story-3");
}
