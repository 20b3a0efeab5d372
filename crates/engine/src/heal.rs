//! Failure diagnostics and heal proposals
//!
//! Classifies step failures with keyword heuristics and, when an AI
//! diagnostic service is configured, requests a structured fix proposal.
//! Diagnostics never retry anything and never escalate: any fault here
//! degrades to "no proposal".

use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use tracing::{debug, warn};

use storyline_common::{HealCategory, HealProposal};

use crate::error::{EngineError, EngineResult};

/// Minimum confidence for a proposal to be eligible for automatic
/// application. Anything below is advisory and requires human review.
pub const AUTO_APPLY_CONFIDENCE: f64 = 0.8;

/// Whether a proposal may be applied without human review.
pub fn auto_apply_eligible(proposal: &HealProposal) -> bool {
    proposal.confidence >= AUTO_APPLY_CONFIDENCE
}

/// Classify an error message into a heal category.
pub fn categorize_failure(error: &str) -> Option<HealCategory> {
    let lower = error.to_lowercase();

    if lower.contains("locator")
        || lower.contains("selector")
        || lower.contains("element")
        || lower.contains("strict mode")
        || lower.contains("waiting for")
    {
        return Some(HealCategory::Selector);
    }

    if lower.contains("navigation")
        || lower.contains("page closed")
        || lower.contains("target closed")
        || lower.contains("context")
    {
        return Some(HealCategory::Flow);
    }

    if lower.contains("assertion")
        || lower.contains("expect")
        || lower.contains("match")
        || lower.contains("equal")
    {
        return Some(HealCategory::Content);
    }

    None
}

/// Context handed to the diagnostic service for a failed step
#[derive(Debug)]
pub struct FailureContext<'a> {
    /// Rendered driver call that failed
    pub fragment: &'a str,
    /// Error text of the final attempt
    pub error: &'a str,
    /// Serialized DOM at failure time, when available
    pub dom_snapshot: Option<&'a str>,
    /// PNG screenshot at failure time, when available
    pub screenshot: Option<&'a [u8]>,
}

/// Verdict from the screenshot inspection capability
#[derive(Debug, Clone, Deserialize)]
pub struct Inspection {
    pub passed: bool,
    #[serde(default)]
    pub confidence: InspectionConfidence,
    #[serde(default)]
    pub observation: String,
    #[serde(default)]
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InspectionConfidence {
    High,
    Medium,
    #[default]
    Low,
}

/// AI diagnostic capability: classify-and-propose plus screenshot inspection.
#[async_trait]
pub trait DiagnosticService: Send + Sync {
    /// Given failure context, return a structured fix proposal, or None when
    /// the model output is unusable.
    async fn propose_heal(&self, ctx: &FailureContext<'_>) -> EngineResult<Option<HealProposal>>;

    /// Judge whether a screenshot satisfies an expected-state description.
    async fn inspect_screenshot(
        &self,
        screenshot: &[u8],
        expectation: &str,
        console_errors: &[String],
    ) -> EngineResult<Inspection>;
}

/// Run the full diagnostics pipeline for one failure.
///
/// Classification gates the model call: unclassifiable errors produce no
/// proposal. Service faults are logged at debug and swallowed.
pub async fn diagnose_failure(
    service: Option<&dyn DiagnosticService>,
    fragment: &str,
    error: &str,
    dom_snapshot: Option<&str>,
    screenshot: Option<&[u8]>,
) -> Option<HealProposal> {
    let category = categorize_failure(error)?;
    let service = service?;

    let ctx = FailureContext {
        fragment,
        error,
        dom_snapshot,
        screenshot,
    };

    match service.propose_heal(&ctx).await {
        Ok(Some(proposal)) => {
            debug!(
                category = %category,
                confidence = proposal.confidence,
                auto_eligible = auto_apply_eligible(&proposal),
                "Heal proposal received"
            );
            Some(proposal)
        }
        Ok(None) => None,
        Err(e) => {
            debug!("Heal proposal unavailable: {}", e);
            None
        }
    }
}

// ============================================================================
// HTTP diagnostic service
// ============================================================================

const HEALING_PROMPT: &str = "You are an expert at diagnosing and fixing failing browser tests.\n\
\n\
Given:\n\
1. The failing driver call\n\
2. The error message\n\
3. The current page HTML (partial)\n\
4. A screenshot of the current state (if provided)\n\
\n\
Analyze the failure and propose a fix. Common issues:\n\
- Selector changed (element structure modified)\n\
- Timing issue (element not ready)\n\
- Content changed (text different)\n\
- Flow changed (navigation different)\n\
\n\
Respond in JSON format:\n\
{\n\
  \"category\": \"selector|flow|content\",\n\
  \"original\": \"the original call that failed\",\n\
  \"proposed\": \"the proposed fix\",\n\
  \"confidence\": 0.0-1.0,\n\
  \"reasoning\": \"explanation of the fix\"\n\
}";

const INSPECTION_PROMPT: &str = "You are a visual QA inspector analyzing a screenshot of a web \
application.\n\
\n\
Given an expected state description, analyze the screenshot and determine if the expectation is \
met.\n\
\n\
Respond in JSON format:\n\
{\n\
  \"passed\": boolean,\n\
  \"confidence\": \"high|medium|low\",\n\
  \"observation\": \"what you actually see\",\n\
  \"issues\": [\"issue1\", \"issue2\"] (if any)\n\
}\n\
\n\
Be precise and objective. If you cannot determine the state with high confidence, indicate so.";

/// How much of the DOM snapshot is forwarded to the model.
const DOM_SNAPSHOT_LIMIT: usize = 5000;

/// Configuration for the HTTP diagnostic service
#[derive(Debug, Clone)]
pub struct DiagnosticConfig {
    /// Messages endpoint URL
    pub endpoint: String,
    /// API key sent in the x-api-key header
    pub api_key: String,
    /// Model name
    pub model: String,
    /// Maximum tokens in the response
    pub max_tokens: u32,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for DiagnosticConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.anthropic.com/v1/messages".to_string(),
            api_key: String::new(),
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 2048,
            timeout_secs: 60,
        }
    }
}

/// Production diagnostic service speaking an Anthropic-style messages API.
pub struct HttpDiagnosticService {
    client: reqwest::Client,
    config: DiagnosticConfig,
}

impl HttpDiagnosticService {
    pub fn new(config: DiagnosticConfig) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    async fn complete(
        &self,
        system: &str,
        content: serde_json::Value,
        max_tokens: u32,
    ) -> EngineResult<String> {
        let body = serde_json::json!({
            "model": self.config.model,
            "max_tokens": max_tokens,
            "system": system,
            "messages": [{ "role": "user", "content": content }],
        });

        let response = self
            .client
            .post(&self.config.endpoint)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(EngineError::Diagnostic(format!(
                "diagnostic endpoint returned {}",
                response.status()
            )));
        }

        let message: MessagesResponse = response.json().await?;
        Ok(message
            .content
            .into_iter()
            .find(|block| block.kind == "text")
            .map(|block| block.text)
            .unwrap_or_default())
    }
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

/// Wire shape of a proposal, tolerant of the original field naming.
#[derive(Deserialize)]
struct WireProposal {
    #[serde(alias = "type")]
    category: HealCategory,
    original: String,
    proposed: String,
    confidence: f64,
    #[serde(default)]
    reasoning: String,
}

fn image_block(png: &[u8]) -> serde_json::Value {
    serde_json::json!({
        "type": "image",
        "source": {
            "type": "base64",
            "media_type": "image/png",
            "data": base64::engine::general_purpose::STANDARD.encode(png),
        },
    })
}

/// Truncate to at most `max` bytes without splitting a character.
fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Pull the JSON payload out of a model reply that may wrap it in a fenced
/// code block.
fn extract_fenced_json(text: &str) -> &str {
    for fence in ["```json", "```"] {
        if let Some(start) = text.find(fence) {
            let rest = &text[start + fence.len()..];
            if let Some(end) = rest.find("```") {
                return rest[..end].trim();
            }
        }
    }
    text.trim()
}

#[async_trait]
impl DiagnosticService for HttpDiagnosticService {
    async fn propose_heal(&self, ctx: &FailureContext<'_>) -> EngineResult<Option<HealProposal>> {
        let dom = truncate_utf8(ctx.dom_snapshot.unwrap_or_default(), DOM_SNAPSHOT_LIMIT);

        let text = format!(
            "Failing driver call:\n```\n{}\n```\n\nError message:\n{}\n\nPage HTML (truncated):\n```html\n{}\n```",
            ctx.fragment, ctx.error, dom
        );

        let content = match ctx.screenshot {
            Some(png) => serde_json::json!([image_block(png), { "type": "text", "text": text }]),
            None => serde_json::json!([{ "type": "text", "text": text }]),
        };

        let reply = self
            .complete(HEALING_PROMPT, content, self.config.max_tokens)
            .await?;

        match serde_json::from_str::<WireProposal>(extract_fenced_json(&reply)) {
            Ok(wire) => Ok(Some(HealProposal {
                category: wire.category,
                original: wire.original,
                proposed: wire.proposed,
                confidence: wire.confidence,
                reasoning: wire.reasoning,
            })),
            Err(e) => {
                warn!("Unparseable heal proposal: {}", e);
                Ok(None)
            }
        }
    }

    async fn inspect_screenshot(
        &self,
        screenshot: &[u8],
        expectation: &str,
        console_errors: &[String],
    ) -> EngineResult<Inspection> {
        let mut text = format!("Expected state: {:?}", expectation);
        if !console_errors.is_empty() {
            text.push_str("\n\nConsole errors detected:\n");
            text.push_str(&console_errors.join("\n"));
        }

        let content =
            serde_json::json!([image_block(screenshot), { "type": "text", "text": text }]);

        let reply = self.complete(INSPECTION_PROMPT, content, 1024).await?;

        serde_json::from_str(extract_fenced_json(&reply)).map_err(|e| {
            EngineError::Diagnostic(format!("unparseable inspection result: {}", e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_selector_errors() {
        assert_eq!(
            categorize_failure("Timeout 30000ms exceeded waiting for locator('#buy')"),
            Some(HealCategory::Selector)
        );
        assert_eq!(
            categorize_failure("strict mode violation: resolved to 3 elements"),
            Some(HealCategory::Selector)
        );
    }

    #[test]
    fn classifies_flow_errors() {
        assert_eq!(
            categorize_failure("Navigation failed because page closed"),
            Some(HealCategory::Flow)
        );
    }

    #[test]
    fn classifies_content_errors() {
        assert_eq!(
            categorize_failure("Expected URL to contain \"/dashboard\""),
            Some(HealCategory::Content)
        );
    }

    #[test]
    fn unknown_errors_are_unclassified() {
        assert_eq!(categorize_failure("disk quota exceeded"), None);
    }

    #[test]
    fn confidence_gate() {
        let mut proposal = HealProposal {
            category: HealCategory::Selector,
            original: "page.click(\"#old\")".to_string(),
            proposed: "page.click(\"#new\")".to_string(),
            confidence: 0.95,
            reasoning: "id renamed".to_string(),
        };
        assert!(auto_apply_eligible(&proposal));

        proposal.confidence = 0.4;
        assert!(!auto_apply_eligible(&proposal));

        proposal.confidence = AUTO_APPLY_CONFIDENCE;
        assert!(auto_apply_eligible(&proposal));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let s = "héllo wörld";
        let t = truncate_utf8(s, 2);
        assert!(t.len() <= 2);
        assert!(s.starts_with(t));
        assert_eq!(truncate_utf8("short", 100), "short");
    }

    #[test]
    fn extracts_fenced_json() {
        let fenced = "Here you go:\n```json\n{\"passed\": true}\n```\nDone.";
        assert_eq!(extract_fenced_json(fenced), "{\"passed\": true}");

        let bare = "  {\"passed\": false}  ";
        assert_eq!(extract_fenced_json(bare), "{\"passed\": false}");

        let anon = "```\n{\"a\": 1}\n```";
        assert_eq!(extract_fenced_json(anon), "{\"a\": 1}");
    }

    #[test]
    fn wire_proposal_accepts_type_alias() {
        let json = r#"{"type": "selector", "original": "a", "proposed": "b", "confidence": 0.9, "reasoning": "r"}"#;
        let wire: WireProposal = serde_json::from_str(json).unwrap();
        assert_eq!(wire.category, HealCategory::Selector);
    }
}
