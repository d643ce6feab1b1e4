use uuid::Uuid;

/// Turn API failures.  `code()` yields the stable wire identifiers the
/// harness and dashboards match on.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("session {0} not found")]
    SessionNotFound(Uuid),
    #[error("invalid mode: {0:?}")]
    InvalidMode(String),
    #[error("turn failed: {0}")]
    TurnFailed(String),
    #[error("llm backend unavailable")]
    LlmUnavailable,
    #[error("knowledge retrieval unavailable")]
    RetrievalUnavailable,
}

impl RuntimeError {
    pub fn code(&self) -> &'static str {
        match self {
            RuntimeError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            RuntimeError::InvalidMode(_) => "INVALID_MODE",
            RuntimeError::TurnFailed(_) => "TURN_FAILED",
            RuntimeError::LlmUnavailable => "LLM_UNAVAILABLE",
            RuntimeError::RetrievalUnavailable => "RETRIEVAL_UNAVAILABLE",
        }
    }
}
