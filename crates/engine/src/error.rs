//! Error types for the execution engine

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Node.js not found. The Playwright bridge requires node with playwright installed: {0}")]
    NodeNotFound(String),

    #[error("Bridge error: {0}")]
    Bridge(String),

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Unsupported step: {0}")]
    UnsupportedStep(String),

    #[error("Screenshot error: {0}")]
    Screenshot(String),

    #[error("Diagnostic error: {0}")]
    Diagnostic(String),

    #[error("Timeout waiting for: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
