//! Story runner behavior against a scripted fake driver.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use storyline_common::{Outcome, Step, Story, Verification, VerificationKind};
use storyline_engine::driver::{Browser, BrowserSession, Viewport};
use storyline_engine::error::{EngineError, EngineResult};
use storyline_engine::{ExecutionOptions, ScreenshotStore, StoryRunner};

/// Always-fail sentinel for `fail_clicks`.
const ALWAYS: u32 = u32::MAX;

#[derive(Default, Clone)]
struct ScriptedBehavior {
    /// Selector -> number of failing attempts before clicks succeed.
    fail_clicks: HashMap<String, u32>,
    /// Selectors reported visible.
    visible_selectors: HashSet<String>,
    /// URL reported by the session.
    url: String,
    /// Console errors emitted during the session.
    console_errors: Vec<String>,
    /// Fail the base-URL navigation.
    fail_navigate: bool,
}

#[derive(Default)]
struct SessionState {
    remaining_failures: Mutex<HashMap<String, u32>>,
    visibility_queries: AtomicU32,
    screenshots: AtomicU32,
    closed: AtomicBool,
}

struct FakeBrowser {
    behavior: ScriptedBehavior,
    sessions: Mutex<Vec<Arc<SessionState>>>,
}

impl FakeBrowser {
    fn new(behavior: ScriptedBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            sessions: Mutex::new(Vec::new()),
        })
    }

    fn session_states(&self) -> Vec<Arc<SessionState>> {
        self.sessions.lock().unwrap().clone()
    }
}

#[async_trait]
impl Browser for FakeBrowser {
    async fn new_session(&self, _viewport: Viewport) -> EngineResult<Box<dyn BrowserSession>> {
        let state = Arc::new(SessionState {
            remaining_failures: Mutex::new(self.behavior.fail_clicks.clone()),
            ..Default::default()
        });
        self.sessions.lock().unwrap().push(state.clone());
        Ok(Box::new(FakeSession {
            behavior: self.behavior.clone(),
            state,
        }))
    }

    async fn shutdown(&self) -> EngineResult<()> {
        Ok(())
    }
}

struct FakeSession {
    behavior: ScriptedBehavior,
    state: Arc<SessionState>,
}

impl FakeSession {
    fn attempt(&self, selector: &str) -> EngineResult<()> {
        let mut remaining = self.state.remaining_failures.lock().unwrap();
        match remaining.get_mut(selector) {
            Some(&mut ALWAYS) => Err(EngineError::Driver(format!(
                "Timeout 30000ms exceeded waiting for locator({:?})",
                selector
            ))),
            Some(count) if *count > 0 => {
                *count -= 1;
                Err(EngineError::Driver(format!(
                    "Timeout 30000ms exceeded waiting for locator({:?})",
                    selector
                )))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn navigate(&self, url: &str) -> EngineResult<()> {
        if self.behavior.fail_navigate {
            return Err(EngineError::Driver(format!(
                "net::ERR_CONNECTION_REFUSED at {}",
                url
            )));
        }
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
        Ok(self.behavior.url.clone())
    }

    async fn is_visible(&self, selector: &str) -> EngineResult<bool> {
        self.state.visibility_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.behavior.visible_selectors.contains(selector))
    }

    async fn wait_for_network_idle(&self, _timeout_ms: u64) -> EngineResult<()> {
        Ok(())
    }

    async fn screenshot(&self) -> EngineResult<Vec<u8>> {
        self.state.screenshots.fetch_add(1, Ordering::SeqCst);
        Ok(vec![0x89, 0x50, 0x4e, 0x47])
    }

    async fn dom_snapshot(&self) -> EngineResult<String> {
        Ok("<html></html>".to_string())
    }

    async fn console_errors(&self) -> Vec<String> {
        self.behavior.console_errors.clone()
    }

    async fn close(&self) -> EngineResult<()> {
        self.state.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct RecordingStore {
    stored: Mutex<Vec<String>>,
}

#[async_trait]
impl ScreenshotStore for RecordingStore {
    async fn store(&self, story_id: &str, _png: &[u8]) -> EngineResult<String> {
        let reference = format!("shots/{}.png", story_id);
        self.stored.lock().unwrap().push(reference.clone());
        Ok(reference)
    }
}

fn click_step(selector: &str) -> Step {
    Step {
        action: "click".to_string(),
        target: Some(selector.to_string()),
        value: None,
        description: None,
    }
}

fn story_with(steps: Vec<Step>, verifications: Vec<Verification>) -> Story {
    Story::new(
        "journey-1",
        "checkout",
        "Checkout",
        steps,
        Outcome {
            description: "order is placed".to_string(),
            verifications,
        },
        0,
    )
}

fn fast_options() -> ExecutionOptions {
    ExecutionOptions {
        retry_backoff: Duration::from_millis(1),
        ..Default::default()
    }
}

#[tokio::test]
async fn passing_story_records_steps_and_closes_session() {
    let browser = FakeBrowser::new(ScriptedBehavior {
        url: "https://app.example/dashboard".to_string(),
        ..Default::default()
    });
    let runner = StoryRunner::new(browser.clone()).with_options(fast_options());

    let story = story_with(
        vec![click_step("#login"), click_step("#submit")],
        vec![Verification {
            kind: VerificationKind::Url,
            target: None,
            expected: "/dashboard".to_string(),
        }],
    );

    let execution = runner.run(&story, "https://app.example").await.unwrap();

    assert!(execution.passed);
    assert_eq!(execution.steps.len(), 2);
    assert!(execution.steps.iter().all(|s| s.passed));
    assert_eq!(execution.retries, 0);
    assert!(execution.error.is_none());
    assert!(execution.screenshot.is_none());

    let sessions = browser.session_states();
    assert_eq!(sessions.len(), 1);
    assert!(sessions[0].closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn flaky_step_retries_until_it_passes() {
    let browser = FakeBrowser::new(ScriptedBehavior {
        fail_clicks: HashMap::from([("#flaky".to_string(), 2)]),
        ..Default::default()
    });
    let runner = StoryRunner::new(browser).with_options(fast_options());

    let story = story_with(vec![click_step("#flaky")], vec![]);
    let execution = runner.run(&story, "https://app.example").await.unwrap();

    assert!(execution.passed);
    assert_eq!(execution.retries, 2);
    assert_eq!(execution.steps.len(), 1);
    assert!(execution.steps[0].passed);
}

#[tokio::test]
async fn exhausted_first_step_never_reaches_verification() {
    let browser = FakeBrowser::new(ScriptedBehavior {
        fail_clicks: HashMap::from([("#first".to_string(), ALWAYS)]),
        visible_selectors: HashSet::from(["#banner".to_string()]),
        ..Default::default()
    });
    let runner = StoryRunner::new(browser.clone()).with_options(fast_options());

    let story = story_with(
        vec![click_step("#first"), click_step("#second")],
        vec![Verification {
            kind: VerificationKind::Element,
            target: Some("#banner".to_string()),
            expected: "#banner".to_string(),
        }],
    );

    let execution = runner.run(&story, "https://app.example").await.unwrap();

    assert!(!execution.passed);
    // Only the final attempt of the failing step is retained; later steps
    // were never attempted.
    assert_eq!(execution.steps.len(), 1);
    assert!(!execution.steps[0].passed);
    // Every failed attempt counts: retry_count retries plus the first try.
    assert_eq!(execution.retries, 4);
    assert!(execution.error.as_deref().unwrap().contains("waiting for"));

    // No verification side effects.
    let sessions = browser.session_states();
    assert_eq!(sessions[0].visibility_queries.load(Ordering::SeqCst), 0);
    assert!(sessions[0].closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn failing_verification_fails_story_with_error_and_screenshot() {
    let browser = FakeBrowser::new(ScriptedBehavior {
        url: "https://app.example/cart".to_string(),
        ..Default::default()
    });
    let store = Arc::new(RecordingStore::default());
    let runner = StoryRunner::new(browser.clone())
        .with_screenshots(store.clone())
        .with_options(fast_options());

    let story = story_with(
        vec![click_step("#checkout")],
        vec![Verification {
            kind: VerificationKind::Url,
            target: None,
            expected: "/confirmation".to_string(),
        }],
    );

    let execution = runner.run(&story, "https://app.example").await.unwrap();

    assert!(!execution.passed);
    assert!(execution.steps.iter().all(|s| s.passed));
    let error = execution.error.as_deref().unwrap();
    assert!(error.contains("/confirmation"), "error was: {}", error);

    // Exactly one screenshot for the story.
    assert_eq!(store.stored.lock().unwrap().len(), 1);
    assert_eq!(
        execution.screenshot.as_deref(),
        Some(format!("shots/{}.png", story.id).as_str())
    );
    let sessions = browser.session_states();
    assert_eq!(sessions[0].screenshots.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn base_navigation_failure_aborts_before_steps() {
    let browser = FakeBrowser::new(ScriptedBehavior {
        fail_navigate: true,
        ..Default::default()
    });
    let runner = StoryRunner::new(browser.clone()).with_options(fast_options());

    let story = story_with(vec![click_step("#never")], vec![]);
    let execution = runner.run(&story, "https://down.example").await.unwrap();

    assert!(!execution.passed);
    assert!(execution.steps.is_empty());
    assert!(execution
        .error
        .as_deref()
        .unwrap()
        .contains("ERR_CONNECTION_REFUSED"));
    assert!(browser.session_states()[0].closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn console_errors_are_attached_regardless_of_outcome() {
    let browser = FakeBrowser::new(ScriptedBehavior {
        console_errors: vec!["TypeError: undefined is not a function".to_string()],
        ..Default::default()
    });
    let runner = StoryRunner::new(browser).with_options(fast_options());

    let story = story_with(vec![click_step("#fine")], vec![]);
    let execution = runner.run(&story, "https://app.example").await.unwrap();

    assert!(execution.passed);
    assert_eq!(execution.console_errors.len(), 1);
}

#[tokio::test]
async fn content_verification_not_found_is_a_failure_not_an_exception() {
    let browser = FakeBrowser::new(ScriptedBehavior::default());
    let runner = StoryRunner::new(browser).with_options(fast_options());

    let story = story_with(
        vec![],
        vec![Verification {
            kind: VerificationKind::Content,
            target: None,
            expected: "Thank you for your order".to_string(),
        }],
    );

    let execution = runner.run(&story, "https://app.example").await.unwrap();
    assert!(!execution.passed);
    assert!(execution
        .error
        .as_deref()
        .unwrap()
        .contains("Thank you for your order"));
}
