//! Outcome verification
//!
//! Evaluates a story's declared success conditions against final browser
//! state. Only runs after every step passed; fail-fast on the first failing
//! verification.

use tracing::warn;

use storyline_common::{Outcome, VerificationKind};

use crate::driver::BrowserSession;
use crate::heal::DiagnosticService;

/// Evaluate the outcome's verifications in order.
///
/// Returns `None` when all verifications hold, or the explanatory error of
/// the first failing one. Visual verifications are delegated to the
/// diagnostic service's screenshot inspection when one is wired in;
/// otherwise they are skipped with a warning (an explicit gap, not a silent
/// pass of an undeclared check).
pub async fn verify_outcome(
    session: &dyn BrowserSession,
    outcome: &Outcome,
    inspector: Option<&dyn DiagnosticService>,
) -> Option<String> {
    for verification in &outcome.verifications {
        let failure = match verification.kind {
            VerificationKind::Url => {
                match session.current_url().await {
                    Ok(url) if url.contains(&verification.expected) => None,
                    Ok(url) => Some(format!(
                        "Expected URL to contain {:?}, got {:?}",
                        verification.expected, url
                    )),
                    Err(e) => Some(e.to_string()),
                }
            }
            VerificationKind::Element => {
                let selector = verification
                    .target
                    .as_deref()
                    .unwrap_or(&verification.expected);
                match session.is_visible(selector).await {
                    Ok(true) => None,
                    Ok(false) => Some(format!("Element {:?} not visible", selector)),
                    Err(e) => Some(e.to_string()),
                }
            }
            VerificationKind::Content => {
                // Lookup failures count as "not found", not as exceptions.
                let selector = format!("text={}", verification.expected);
                match session.is_visible(&selector).await {
                    Ok(true) => None,
                    _ => Some(format!(
                        "Expected content {:?} not found",
                        verification.expected
                    )),
                }
            }
            VerificationKind::Visual => {
                inspect_visual(session, inspector, &verification.expected).await
            }
        };

        if failure.is_some() {
            return failure;
        }
    }

    None
}

async fn inspect_visual(
    session: &dyn BrowserSession,
    inspector: Option<&dyn DiagnosticService>,
    expectation: &str,
) -> Option<String> {
    let Some(inspector) = inspector else {
        warn!("Visual verification skipped: no diagnostic service configured");
        return None;
    };

    let screenshot = match session.screenshot().await {
        Ok(png) => png,
        Err(e) => {
            warn!("Visual verification skipped: screenshot failed: {}", e);
            return None;
        }
    };

    match inspector.inspect_screenshot(&screenshot, expectation, &[]).await {
        Ok(inspection) if inspection.passed => None,
        Ok(inspection) => Some(format!(
            "Visual check failed: {}",
            if inspection.observation.is_empty() {
                "expectation not met".to_string()
            } else {
                inspection.observation
            }
        )),
        Err(e) => {
            // Diagnostic faults never fail the story.
            warn!("Visual verification skipped: {}", e);
            None
        }
    }
}
