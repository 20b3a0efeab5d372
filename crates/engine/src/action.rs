//! Step action resolution and execution
//!
//! Authored steps carry a free-text verb ("Click the buy button"). The verb
//! is resolved once into a typed action, then dispatched exhaustively against
//! the driver. An unrecognized verb with a target locator still resolves to a
//! click (the one deliberate fallback); without a target it fails the step.

use std::time::Instant;
use tracing::trace;

use storyline_common::{Step, StepResult};

use crate::driver::BrowserSession;
use crate::error::{EngineError, EngineResult};

/// Default duration for `wait` steps with an absent or unparseable value.
pub const DEFAULT_WAIT_MS: u64 = 1000;

/// A resolved, typed step action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAction {
    Navigate { url: String },
    Click { selector: String },
    Fill { selector: String, value: String },
    Select { selector: String, value: String },
    Check { selector: String },
    Uncheck { selector: String },
    Wait { ms: u64 },
    Scroll { selector: Option<String> },
    Hover { selector: String },
    Press { key: String },
    Focus { selector: String },
}

impl StepAction {
    /// Resolve a raw step into a typed action.
    ///
    /// Matching is case-insensitive substring search over a fixed verb
    /// vocabulary, in vocabulary order ("uncheck" is tested before "check"
    /// so the two stay distinguishable).
    pub fn resolve(step: &Step) -> Result<StepAction, String> {
        let verb = step.action.to_lowercase();
        let target = step.target.as_deref();
        let value = step.value.as_deref();

        let require_target = |what: &str| {
            target
                .map(str::to_string)
                .ok_or_else(|| format!("{} step has no target locator: {:?}", what, step.action))
        };

        if verb.contains("navigate") || verb.contains("go to") {
            let url = value
                .or(target)
                .ok_or_else(|| format!("navigate step has no URL: {:?}", step.action))?;
            return Ok(StepAction::Navigate {
                url: url.to_string(),
            });
        }
        if verb.contains("click") || verb.contains("tap") {
            return Ok(StepAction::Click {
                selector: require_target("click")?,
            });
        }
        if verb.contains("type") || verb.contains("enter") || verb.contains("fill") {
            return Ok(StepAction::Fill {
                selector: require_target("fill")?,
                value: value.unwrap_or_default().to_string(),
            });
        }
        if verb.contains("select") || verb.contains("choose") {
            return Ok(StepAction::Select {
                selector: require_target("select")?,
                value: value.unwrap_or_default().to_string(),
            });
        }
        if verb.contains("uncheck") {
            return Ok(StepAction::Uncheck {
                selector: require_target("uncheck")?,
            });
        }
        if verb.contains("check") {
            return Ok(StepAction::Check {
                selector: require_target("check")?,
            });
        }
        if verb.contains("wait") {
            let ms = value
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(DEFAULT_WAIT_MS);
            return Ok(StepAction::Wait { ms });
        }
        if verb.contains("scroll") {
            return Ok(StepAction::Scroll {
                selector: target.map(str::to_string),
            });
        }
        if verb.contains("hover") {
            return Ok(StepAction::Hover {
                selector: require_target("hover")?,
            });
        }
        if verb.contains("press") {
            return Ok(StepAction::Press {
                key: value.unwrap_or("Enter").to_string(),
            });
        }
        if verb.contains("focus") {
            return Ok(StepAction::Focus {
                selector: require_target("focus")?,
            });
        }

        // Unrecognized verb: a present target still means "interact with this
        // element", which in practice is a click.
        if let Some(selector) = target {
            return Ok(StepAction::Click {
                selector: selector.to_string(),
            });
        }

        Err(format!("unrecognized action verb: {:?}", step.action))
    }

    /// Render the action as the driver call it performs, for diagnostics.
    pub fn fragment(&self) -> String {
        match self {
            StepAction::Navigate { url } => format!("page.goto({:?})", url),
            StepAction::Click { selector } => format!("page.click({:?})", selector),
            StepAction::Fill { selector, value } => {
                format!("page.fill({:?}, {:?})", selector, value)
            }
            StepAction::Select { selector, value } => {
                format!("page.selectOption({:?}, {:?})", selector, value)
            }
            StepAction::Check { selector } => format!("page.check({:?})", selector),
            StepAction::Uncheck { selector } => format!("page.uncheck({:?})", selector),
            StepAction::Wait { ms } => format!("page.waitForTimeout({})", ms),
            StepAction::Scroll { selector: Some(s) } => {
                format!("page.locator({:?}).scrollIntoViewIfNeeded()", s)
            }
            StepAction::Scroll { selector: None } => "window.scrollBy(0, 300)".to_string(),
            StepAction::Hover { selector } => format!("page.hover({:?})", selector),
            StepAction::Press { key } => format!("page.keyboard.press({:?})", key),
            StepAction::Focus { selector } => format!("page.focus({:?})", selector),
        }
    }
}

/// Render a raw step for diagnostics, falling back to the authored verb when
/// the step does not resolve.
pub fn step_fragment(step: &Step) -> String {
    match StepAction::resolve(step) {
        Ok(action) => action.fragment(),
        Err(_) => step.action.clone(),
    }
}

/// Execute one step against a live session and return its result.
///
/// Exactly one browser-level effect is performed. Any driver error becomes
/// the step's error; duration is measured either way. After any action that
/// is not itself a wait, a bounded best-effort settle runs and its failure is
/// swallowed: advisory settling, not a correctness check.
pub async fn execute_step(
    session: &dyn BrowserSession,
    step: &Step,
    index: usize,
    settle_timeout_ms: u64,
) -> StepResult {
    let start = Instant::now();

    let resolved = StepAction::resolve(step);
    let outcome = match &resolved {
        Ok(action) => apply(session, action).await,
        Err(reason) => Err(EngineError::UnsupportedStep(reason.clone())),
    };

    if outcome.is_ok() && !matches!(resolved, Ok(StepAction::Wait { .. })) {
        if let Err(e) = session.wait_for_network_idle(settle_timeout_ms).await {
            trace!(step = index, "post-action settle skipped: {}", e);
        }
    }

    let duration_ms = start.elapsed().as_millis() as i64;
    match outcome {
        Ok(()) => StepResult {
            index,
            action: step.action.clone(),
            passed: true,
            duration_ms,
            error: None,
        },
        Err(e) => StepResult {
            index,
            action: step.action.clone(),
            passed: false,
            duration_ms,
            error: Some(e.to_string()),
        },
    }
}

async fn apply(session: &dyn BrowserSession, action: &StepAction) -> EngineResult<()> {
    match action {
        StepAction::Navigate { url } => session.navigate(url).await,
        StepAction::Click { selector } => session.click(selector).await,
        StepAction::Fill { selector, value } => session.fill(selector, value).await,
        StepAction::Select { selector, value } => session.select_option(selector, value).await,
        StepAction::Check { selector } => session.set_checked(selector, true).await,
        StepAction::Uncheck { selector } => session.set_checked(selector, false).await,
        StepAction::Wait { ms } => session.wait_millis(*ms).await,
        StepAction::Scroll { selector } => session.scroll_into_view(selector.as_deref()).await,
        StepAction::Hover { selector } => session.hover(selector).await,
        StepAction::Press { key } => session.press(key).await,
        StepAction::Focus { selector } => session.focus(selector).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(action: &str, target: Option<&str>, value: Option<&str>) -> Step {
        Step {
            action: action.to_string(),
            target: target.map(str::to_string),
            value: value.map(str::to_string),
            description: None,
        }
    }

    #[test]
    fn resolves_verbs_case_insensitively() {
        let action = StepAction::resolve(&step("Click the buy button", Some("#buy"), None));
        assert_eq!(
            action.unwrap(),
            StepAction::Click {
                selector: "#buy".to_string()
            }
        );

        let action = StepAction::resolve(&step("Go to the login page", None, Some("/login")));
        assert_eq!(
            action.unwrap(),
            StepAction::Navigate {
                url: "/login".to_string()
            }
        );
    }

    #[test]
    fn navigate_prefers_value_over_target() {
        let action =
            StepAction::resolve(&step("navigate", Some("#ignored"), Some("https://a.example")));
        assert_eq!(
            action.unwrap(),
            StepAction::Navigate {
                url: "https://a.example".to_string()
            }
        );
    }

    #[test]
    fn uncheck_is_not_shadowed_by_check() {
        let action = StepAction::resolve(&step("Uncheck newsletter opt-in", Some("#news"), None));
        assert_eq!(
            action.unwrap(),
            StepAction::Uncheck {
                selector: "#news".to_string()
            }
        );
    }

    #[test]
    fn wait_parses_value_with_default() {
        assert_eq!(
            StepAction::resolve(&step("wait", None, Some("2500"))).unwrap(),
            StepAction::Wait { ms: 2500 }
        );
        assert_eq!(
            StepAction::resolve(&step("wait for the page", None, Some("soon"))).unwrap(),
            StepAction::Wait {
                ms: DEFAULT_WAIT_MS
            }
        );
        assert_eq!(
            StepAction::resolve(&step("wait", None, None)).unwrap(),
            StepAction::Wait {
                ms: DEFAULT_WAIT_MS
            }
        );
    }

    #[test]
    fn unknown_verb_with_target_falls_back_to_click() {
        let action = StepAction::resolve(&step("activate the widget", Some("#widget"), None));
        assert_eq!(
            action.unwrap(),
            StepAction::Click {
                selector: "#widget".to_string()
            }
        );
    }

    #[test]
    fn unknown_verb_without_target_is_rejected() {
        let err = StepAction::resolve(&step("do something magical", None, None)).unwrap_err();
        assert!(err.contains("unrecognized action verb"));
    }

    #[test]
    fn press_defaults_to_enter() {
        assert_eq!(
            StepAction::resolve(&step("press", None, None)).unwrap(),
            StepAction::Press {
                key: "Enter".to_string()
            }
        );
        assert_eq!(
            StepAction::resolve(&step("press", None, Some("Tab"))).unwrap(),
            StepAction::Press {
                key: "Tab".to_string()
            }
        );
    }

    #[test]
    fn fragment_renders_driver_call() {
        let action = StepAction::resolve(&step("fill in the email", Some("#email"), Some("a@b.c")));
        assert_eq!(
            action.unwrap().fragment(),
            r##"page.fill("#email", "a@b.c")"##
        );
    }
}
