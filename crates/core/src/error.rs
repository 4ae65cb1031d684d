//! Error types for the Dossier answering engine.
//!
//! This module defines a unified error enum that covers all error categories
//! in the application: configuration, I/O, retrieval, generation, storage,
//! and cancellation.

use thiserror::Error;

/// Unified error type for the Dossier answering engine.
///
/// All fallible functions in the workspace return `Result<T, AppError>`.
/// We never panic — errors must be represented and propagated.
///
/// Two pipeline-internal failure classes deliberately have no variant here:
/// rerank failures (always recovered via similarity-order fallback) and
/// citation validation failures (always recovered by forcing a revision).
/// Neither ever reaches a caller.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O and filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Embedding or chunk store errors that exhausted their retry budget.
    /// Surfaced to callers as "transient service failure, try again".
    #[error("Retrieval error: {0}")]
    Retrieval(String),

    /// Answer generator errors that exhausted their retry budget
    #[error("Generation error: {0}")]
    Generation(String),

    /// Chunk store and answer archive errors
    #[error("Store error: {0}")]
    Store(String),

    /// The query was cancelled before reaching a terminal state
    #[error("Query cancelled: {0}")]
    Cancelled(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        AppError::Store(err.to_string())
    }
}

impl AppError {
    /// Whether the caller can reasonably retry the whole query.
    ///
    /// Distinguishes transient provider failures from configuration and
    /// programming errors.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::Retrieval(_) | AppError::Generation(_))
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(AppError::Retrieval("store down".into()).is_transient());
        assert!(AppError::Generation("llm down".into()).is_transient());
        assert!(!AppError::Config("bad yaml".into()).is_transient());
        assert!(!AppError::Cancelled("deadline".into()).is_transient());
    }

    #[test]
    fn test_display_includes_category() {
        let err = AppError::Retrieval("vector store unavailable".into());
        assert!(err.to_string().contains("Retrieval error"));
    }
}
