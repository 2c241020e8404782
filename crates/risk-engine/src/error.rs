// crates/risk-engine/src/error.rs
// Standardized error types for the risk engine, shaped around the error
// taxonomy in the specification: transient I/O is retryable and bubbles up,
// schema violations and missing prerequisites are recovered locally and
// never bubble, verification failures surface as counts rather than errors.

use thiserror::Error;

/// Main error type for the risk engine library.
#[derive(Error, Debug)]
pub enum RiskError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("repository not found: {0}")]
    RepositoryNotSet(String),

    /// Transient I/O: DB, graph, or LLM timeouts and network failures.
    /// Retryable; the caller should not mark the commit atomized.
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("task cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown error: {0}")]
    Other(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Convenience type alias for Result using RiskError.
pub type Result<T> = std::result::Result<T, RiskError>;

impl RiskError {
    /// Convert to a user-facing string for the orchestrator's report boundary.
    pub fn to_user_string(&self) -> String {
        self.to_string()
    }

    /// Whether this error belongs to the *transient I/O* category of the
    /// error taxonomy (retryable, commit not marked atomized).
    pub fn is_transient(&self) -> bool {
        matches!(self, RiskError::Db(_) | RiskError::Http(_) | RiskError::Io(_))
    }
}

impl From<String> for RiskError {
    fn from(s: String) -> Self {
        RiskError::Other(s)
    }
}

impl From<tokio::task::JoinError> for RiskError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            RiskError::Cancelled
        } else {
            RiskError::Other(err.to_string())
        }
    }
}

impl From<RiskError> for String {
    fn from(err: RiskError) -> Self {
        err.to_string()
    }
}
