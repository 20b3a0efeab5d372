//! Core types for Storyline

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current time as unix epoch milliseconds.
///
/// All persisted timestamps use millisecond precision so run durations can be
/// derived from the same clock that stamps the records.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Lifecycle status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Terminal statuses are never left once entered.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

impl Default for RunStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Pending => write!(f, "pending"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "cancelled" => Ok(RunStatus::Cancelled),
            other => Err(format!("unknown run status: {}", other)),
        }
    }
}

/// What caused a run to be created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Manual,
    Api,
    Scheduled,
    Ci,
}

impl std::fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerSource::Manual => write!(f, "manual"),
            TriggerSource::Api => write!(f, "api"),
            TriggerSource::Scheduled => write!(f, "scheduled"),
            TriggerSource::Ci => write!(f, "ci"),
        }
    }
}

impl std::str::FromStr for TriggerSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "manual" => Ok(TriggerSource::Manual),
            "api" => Ok(TriggerSource::Api),
            "scheduled" => Ok(TriggerSource::Scheduled),
            "ci" => Ok(TriggerSource::Ci),
            other => Err(format!("unknown trigger source: {}", other)),
        }
    }
}

/// One execution of a selected set of stories against one environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub organization_id: String,
    pub app_id: String,
    pub environment_id: String,
    pub trigger: TriggerSource,
    pub status: RunStatus,
    pub stories_total: u32,
    pub stories_passed: u32,
    pub stories_failed: u32,
    pub stories_skipped: u32,
    pub duration_ms: Option<i64>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

impl Run {
    pub fn new(
        organization_id: impl Into<String>,
        app_id: impl Into<String>,
        environment_id: impl Into<String>,
        trigger: TriggerSource,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            organization_id: organization_id.into(),
            app_id: app_id.into(),
            environment_id: environment_id.into(),
            trigger,
            status: RunStatus::Pending,
            stories_total: 0,
            stories_passed: 0,
            stories_failed: 0,
            stories_skipped: 0,
            duration_ms: None,
            created_at: now_ms(),
            started_at: None,
            completed_at: None,
        }
    }
}

/// A deployment target the engine drives stories against
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    pub id: String,
    pub app_id: String,
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub is_default: bool,
    pub created_at: i64,
}

impl Environment {
    pub fn new(
        app_id: impl Into<String>,
        name: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            app_id: app_id.into(),
            name: name.into(),
            base_url: base_url.into(),
            is_default: false,
            created_at: now_ms(),
        }
    }
}

/// A named group of stories, ordered within an app
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Journey {
    pub id: String,
    pub app_id: String,
    pub name: String,
    pub title: String,
    pub position: i64,
    pub created_at: i64,
}

impl Journey {
    pub fn new(
        app_id: impl Into<String>,
        name: impl Into<String>,
        title: impl Into<String>,
        position: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            app_id: app_id.into(),
            name: name.into(),
            title: title.into(),
            position,
            created_at: now_ms(),
        }
    }
}

/// One atomic browser interaction as authored.
///
/// The `action` verb is free text from the authoring surface; the engine
/// resolves it into a typed action before execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub action: String,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Kind of post-condition check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationKind {
    Url,
    Element,
    Content,
    Visual,
}

/// A single declared success condition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verification {
    pub kind: VerificationKind,
    #[serde(default)]
    pub target: Option<String>,
    pub expected: String,
}

/// The declared success outcome of a story
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Outcome {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub verifications: Vec<Verification>,
}

/// A precondition the author expects to hold before the story runs.
/// Informational to the engine; not enforced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Precondition {
    pub description: String,
    #[serde(default)]
    pub kind: Option<PreconditionKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreconditionKind {
    Auth,
    Data,
    State,
}

/// Pass/fail verdict recorded on a story after a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Passed,
    Failed,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Passed => write!(f, "passed"),
            Verdict::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for Verdict {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "passed" => Ok(Verdict::Passed),
            "failed" => Ok(Verdict::Failed),
            other => Err(format!("unknown verdict: {}", other)),
        }
    }
}

/// An ordered sequence of browser interaction steps plus a declared outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Story {
    pub id: String,
    pub journey_id: String,
    pub name: String,
    pub title: String,
    #[serde(default)]
    pub preconditions: Vec<Precondition>,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub outcome: Outcome,
    pub position: i64,
    pub enabled: bool,
    #[serde(default)]
    pub last_run_at: Option<i64>,
    #[serde(default)]
    pub last_result: Option<Verdict>,
    pub created_at: i64,
}

impl Story {
    pub fn new(
        journey_id: impl Into<String>,
        name: impl Into<String>,
        title: impl Into<String>,
        steps: Vec<Step>,
        outcome: Outcome,
        position: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            journey_id: journey_id.into(),
            name: name.into(),
            title: title.into(),
            preconditions: Vec::new(),
            steps,
            outcome,
            position,
            enabled: true,
            last_run_at: None,
            last_result: None,
            created_at: now_ms(),
        }
    }
}

/// Result of the final attempt at one step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub index: usize,
    pub action: String,
    pub passed: bool,
    pub duration_ms: i64,
    #[serde(default)]
    pub error: Option<String>,
}

/// Failure category assigned by the diagnostics classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealCategory {
    Selector,
    Flow,
    Content,
}

impl std::fmt::Display for HealCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealCategory::Selector => write!(f, "selector"),
            HealCategory::Flow => write!(f, "flow"),
            HealCategory::Content => write!(f, "content"),
        }
    }
}

/// An AI-generated suggested fix for a failing step.
///
/// Advisory output only: a proposal never mutates a story definition, it is
/// persisted on the story result for review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealProposal {
    pub category: HealCategory,
    pub original: String,
    pub proposed: String,
    pub confidence: f64,
    pub reasoning: String,
}

/// One record per story per run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryResult {
    pub id: String,
    pub run_id: String,
    pub story_id: String,
    pub journey_name: String,
    pub story_name: String,
    pub passed: bool,
    pub duration_ms: i64,
    pub steps: Vec<StepResult>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub screenshot: Option<String>,
    #[serde(default)]
    pub console_errors: Vec<String>,
    #[serde(default)]
    pub heal_proposal: Option<HealProposal>,
    pub retries: u32,
    pub created_at: i64,
}

/// A recurring run definition driven by a cron expression and timezone
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: String,
    pub organization_id: String,
    pub app_id: String,
    pub environment_id: String,
    pub name: String,
    pub cron_expression: String,
    pub timezone: String,
    #[serde(default)]
    pub journey_ids: Vec<String>,
    pub enabled: bool,
    #[serde(default)]
    pub next_run_at: Option<i64>,
    #[serde(default)]
    pub last_run_at: Option<i64>,
    pub created_at: i64,
}

/// Queue payload handed to a worker for one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub run_id: String,
    pub organization_id: String,
    pub app_id: String,
    pub environment_id: String,
    #[serde(default)]
    pub story_ids: Vec<String>,
    #[serde(default)]
    pub journey_ids: Vec<String>,
}

impl RunRequest {
    /// Build the queue payload for an existing run record.
    pub fn for_run(run: &Run, story_ids: Vec<String>, journey_ids: Vec<String>) -> Self {
        Self {
            run_id: run.id.clone(),
            organization_id: run.organization_id.clone(),
            app_id: run.app_id.clone(),
            environment_id: run.environment_id.clone(),
            story_ids,
            journey_ids,
        }
    }
}

/// Mid-run progress signal emitted after each story
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunProgress {
    pub total: u32,
    pub completed: u32,
    pub passed: u32,
    pub failed: u32,
    #[serde(default)]
    pub current: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_status_round_trips_through_display() {
        for status in [
            RunStatus::Pending,
            RunStatus::Running,
            RunStatus::Completed,
            RunStatus::Failed,
            RunStatus::Cancelled,
        ] {
            let parsed: RunStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn terminal_statuses() {
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
    }

    #[test]
    fn new_run_starts_pending_with_zero_counters() {
        let run = Run::new("org-1", "app-1", "env-1", TriggerSource::Manual);
        assert_eq!(run.status, RunStatus::Pending);
        assert_eq!(run.stories_total, 0);
        assert_eq!(run.stories_passed, 0);
        assert_eq!(run.stories_failed, 0);
        assert!(run.started_at.is_none());
    }

    #[test]
    fn step_deserializes_with_sparse_fields() {
        let step: Step = serde_json::from_str(r#"{"action": "Click the buy button"}"#).unwrap();
        assert_eq!(step.action, "Click the buy button");
        assert!(step.target.is_none());
        assert!(step.value.is_none());
    }
}
