//! Story runner
//!
//! Drives one story end-to-end against an isolated browser session:
//! navigate to the environment base URL, execute steps with per-step retry,
//! verify the declared outcome, collect failure diagnostics, and assemble
//! the execution record. The session is torn down on every exit path.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use storyline_common::{HealProposal, StepResult, Story};

use crate::action::{execute_step, step_fragment};
use crate::artifacts::ScreenshotStore;
use crate::driver::{Browser, BrowserSession, Viewport};
use crate::error::EngineResult;
use crate::heal::{diagnose_failure, DiagnosticService};
use crate::verify::verify_outcome;

/// Tuning knobs for story execution
#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    /// Retries per step after the first attempt (so retry_count + 1 attempts).
    pub retry_count: u32,
    /// Fixed backoff between attempts.
    pub retry_backoff: Duration,
    /// Capture one screenshot when the story fails.
    pub screenshot_on_failure: bool,
    /// Budget for the best-effort settle after each action.
    pub settle_timeout_ms: u64,
    /// Session viewport.
    pub viewport: Viewport,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            retry_count: 3,
            retry_backoff: Duration::from_secs(1),
            screenshot_on_failure: true,
            settle_timeout_ms: 5000,
            viewport: Viewport::default(),
        }
    }
}

/// Everything observed while executing one story
#[derive(Debug, Clone, Default)]
pub struct StoryExecution {
    pub passed: bool,
    pub duration_ms: i64,
    pub steps: Vec<StepResult>,
    pub error: Option<String>,
    pub screenshot: Option<String>,
    pub console_errors: Vec<String>,
    pub heal_proposal: Option<HealProposal>,
    pub retries: u32,
}

/// Executes stories one at a time against a shared browser handle.
pub struct StoryRunner {
    browser: Arc<dyn Browser>,
    screenshots: Option<Arc<dyn ScreenshotStore>>,
    diagnostics: Option<Arc<dyn DiagnosticService>>,
    options: ExecutionOptions,
}

impl StoryRunner {
    pub fn new(browser: Arc<dyn Browser>) -> Self {
        Self {
            browser,
            screenshots: None,
            diagnostics: None,
            options: ExecutionOptions::default(),
        }
    }

    pub fn with_screenshots(mut self, store: Arc<dyn ScreenshotStore>) -> Self {
        self.screenshots = Some(store);
        self
    }

    pub fn with_diagnostics(mut self, service: Arc<dyn DiagnosticService>) -> Self {
        self.diagnostics = Some(service);
        self
    }

    pub fn with_options(mut self, options: ExecutionOptions) -> Self {
        self.options = options;
        self
    }

    /// Run one story. `Ok` carries the pass/fail execution record; `Err` is
    /// reserved for engine-level faults (the session could not be created),
    /// which the orchestrator records as a synthetic failure.
    pub async fn run(&self, story: &Story, base_url: &str) -> EngineResult<StoryExecution> {
        let session = self.browser.new_session(self.options.viewport).await?;
        let start = Instant::now();

        let mut execution = self.drive(session.as_ref(), story, base_url).await;
        execution.duration_ms = start.elapsed().as_millis() as i64;
        execution.console_errors = session.console_errors().await;

        // The session must never leak, whatever state the story ended in.
        if let Err(e) = session.close().await {
            warn!(story = %story.name, "Failed to close browser session: {}", e);
        }

        Ok(execution)
    }

    async fn drive(
        &self,
        session: &dyn BrowserSession,
        story: &Story,
        base_url: &str,
    ) -> StoryExecution {
        let mut execution = StoryExecution::default();

        // Navigating: a failure here aborts the story before any step runs.
        if let Err(e) = session.navigate(base_url).await {
            let error = e.to_string();
            debug!(story = %story.name, "Base navigation failed: {}", error);
            return self
                .fail(
                    session,
                    story,
                    execution,
                    format!("page.goto({:?})", base_url),
                    error,
                )
                .await;
        }

        // Stepping: up to retry_count + 1 attempts per step, fixed backoff.
        for (index, step) in story.steps.iter().enumerate() {
            let mut attempt = 0;
            let result = loop {
                let result = execute_step(session, step, index, self.options.settle_timeout_ms)
                    .await;
                if result.passed {
                    break result;
                }
                execution.retries += 1;
                if attempt >= self.options.retry_count {
                    break result;
                }
                attempt += 1;
                tokio::time::sleep(self.options.retry_backoff).await;
            };

            let failed = !result.passed;
            let error = result.error.clone();
            execution.steps.push(result);

            if failed {
                let error = error.unwrap_or_else(|| "step failed".to_string());
                debug!(
                    story = %story.name,
                    step = index,
                    "Step failed after {} attempts: {}",
                    self.options.retry_count + 1,
                    error
                );
                // Later steps are never attempted.
                return self
                    .fail(session, story, execution, step_fragment(step), error)
                    .await;
            }
        }

        // Verifying: entered only when every step passed.
        if let Some(error) = verify_outcome(session, &story.outcome, self.diagnostics.as_deref())
            .await
        {
            debug!(story = %story.name, "Outcome verification failed: {}", error);
            let fragment = format!("verify: {}", story.outcome.description);
            return self.fail(session, story, execution, fragment, error).await;
        }

        execution.passed = true;
        execution
    }

    /// Shared Done(fail) path: capture the screenshot (at most once per
    /// story), run diagnostics, finalize the record.
    async fn fail(
        &self,
        session: &dyn BrowserSession,
        story: &Story,
        mut execution: StoryExecution,
        fragment: String,
        error: String,
    ) -> StoryExecution {
        let mut screenshot_bytes = None;

        if self.options.screenshot_on_failure && execution.screenshot.is_none() {
            match session.screenshot().await {
                Ok(png) => {
                    if let Some(store) = &self.screenshots {
                        match store.store(&story.id, &png).await {
                            Ok(reference) => execution.screenshot = Some(reference),
                            Err(e) => warn!(story = %story.name, "Screenshot upload failed: {}", e),
                        }
                    }
                    screenshot_bytes = Some(png);
                }
                Err(e) => warn!(story = %story.name, "Screenshot capture failed: {}", e),
            }
        }

        let dom = session.dom_snapshot().await.ok();
        execution.heal_proposal = diagnose_failure(
            self.diagnostics.as_deref(),
            &fragment,
            &error,
            dom.as_deref(),
            screenshot_bytes.as_deref(),
        )
        .await;

        execution.passed = false;
        execution.error = Some(error);
        execution
    }
}
