//! Error types for the orchestration engine.

use thiserror::Error;

/// Errors surfaced by engine entry points and internal components.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid event envelope: {0}")]
    Validation(String),

    #[error("unrecognized schedule text: {0}")]
    ScheduleParse(String),

    #[error("reminder delivery service unavailable: {0}")]
    DownstreamUnavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl EngineError {
    /// Whether the error is warning-level: the triggering operation still
    /// committed its primary effect (e.g. a med record stored with an
    /// empty occurrence list).
    pub fn is_warning(&self) -> bool {
        matches!(self, EngineError::ScheduleParse(_))
    }
}
