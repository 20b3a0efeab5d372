//! Storyline Execution Engine
//!
//! Turns one story plus a target environment into a deterministic, retried,
//! observable execution:
//! - resolves free-text step verbs into typed actions and drives them
//!   through the browser capability interface
//! - verifies the story's declared outcome against final browser state
//! - classifies failures and requests AI heal proposals
//! - captures failure screenshots and console errors
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StoryRunner (engine)                    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  run(story, base_url)                                       │
//! │    ├── Browser::new_session() -> BrowserSession             │
//! │    ├── Navigating: session.navigate(base_url)               │
//! │    ├── Stepping:   execute_step() x (retry_count + 1)       │
//! │    ├── Verifying:  verify_outcome()                         │
//! │    ├── Done(fail): screenshot + diagnose_failure()          │
//! │    └── always:     session.close()                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Browser / BrowserSession (capability interface)            │
//! │    └── PlaywrightBridge: Node sidecar, NDJSON over stdio    │
//! │  DiagnosticService (capability interface)                   │
//! │    └── HttpDiagnosticService: messages API client           │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod action;
pub mod artifacts;
pub mod bridge;
pub mod driver;
pub mod error;
pub mod heal;
pub mod story;
pub mod verify;

pub use action::StepAction;
pub use artifacts::{FsScreenshotStore, ScreenshotStore};
pub use bridge::{BridgeConfig, PlaywrightBridge};
pub use driver::{Browser, BrowserSession, Viewport};
pub use error::{EngineError, EngineResult};
pub use heal::{DiagnosticConfig, DiagnosticService, HttpDiagnosticService};
pub use story::{ExecutionOptions, StoryExecution, StoryRunner};
