//! Error types for the generation engines.
//!
//! These never reach a caller: adapters absorb them into the fallback path
//! and only use them to decide on state transitions and logging.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("No engine configured for backend {0}")]
    EngineNotConfigured(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Load failed: {0}")]
    LoadFailed(String),

    #[error("Incompatible model format: {0}")]
    IncompatibleFormat(String),

    #[error("Inference failed: {0}")]
    InferenceFailed(String),

    #[error("Engine communication error: {0}")]
    Communication(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Backend {0} is degraded")]
    Degraded(String),
}

impl Error {
    /// Whether this error is the expected answer of a degraded adapter rather
    /// than a fresh generation failure.
    pub fn is_degraded(&self) -> bool {
        matches!(self, Error::Degraded(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Communication(format!("request timed out: {}", e))
        } else {
            Error::Communication(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
