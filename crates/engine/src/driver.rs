//! Browser driver capability interface
//!
//! The engine never talks to a browser vendor API directly; it drives these
//! traits. The production implementation is the Playwright bridge, tests use
//! scripted fakes.

use async_trait::async_trait;

use crate::error::EngineResult;

/// Browser viewport dimensions
#[derive(Debug, Clone, Copy)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// Session factory owning the underlying browser process.
///
/// The handle is created once per worker process, starts lazily on the first
/// session request, and is shut down explicitly when the process exits.
#[async_trait]
pub trait Browser: Send + Sync {
    /// Open a fresh isolated session (its own context, cookies, storage).
    async fn new_session(&self, viewport: Viewport) -> EngineResult<Box<dyn BrowserSession>>;

    /// Tear down the browser process. Idempotent.
    async fn shutdown(&self) -> EngineResult<()>;
}

/// One isolated browser session, exclusive to a single story execution.
///
/// Every method is a required operation whose failure surfaces as a step or
/// verification failure, except `wait_for_network_idle` which callers may
/// treat as best-effort settling.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn navigate(&self, url: &str) -> EngineResult<()>;

    async fn click(&self, selector: &str) -> EngineResult<()>;

    async fn fill(&self, selector: &str, value: &str) -> EngineResult<()>;

    async fn select_option(&self, selector: &str, value: &str) -> EngineResult<()>;

    async fn set_checked(&self, selector: &str, checked: bool) -> EngineResult<()>;

    async fn hover(&self, selector: &str) -> EngineResult<()>;

    async fn focus(&self, selector: &str) -> EngineResult<()>;

    async fn press(&self, key: &str) -> EngineResult<()>;

    /// Scroll an element into view, or the page by a fixed amount when no
    /// selector is given.
    async fn scroll_into_view(&self, selector: Option<&str>) -> EngineResult<()>;

    /// Explicit fixed wait requested by a story step.
    async fn wait_millis(&self, ms: u64) -> EngineResult<()>;

    async fn current_url(&self) -> EngineResult<String>;

    /// Visibility query for the first element matching the selector.
    async fn is_visible(&self, selector: &str) -> EngineResult<bool>;

    /// Wait for network activity to settle, bounded by `timeout_ms`.
    async fn wait_for_network_idle(&self, timeout_ms: u64) -> EngineResult<()>;

    /// PNG screenshot of the current page.
    async fn screenshot(&self) -> EngineResult<Vec<u8>>;

    /// Serialized DOM of the current page (for diagnostics).
    async fn dom_snapshot(&self) -> EngineResult<String>;

    /// Console errors collected since the session opened.
    async fn console_errors(&self) -> Vec<String>;

    /// Close the session. Must be called on every exit path.
    async fn close(&self) -> EngineResult<()>;
}
