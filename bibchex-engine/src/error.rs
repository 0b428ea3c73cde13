//! Error types for bibchex-engine
//!
//! Two families with opposite propagation rules:
//! - [`RetrievalError`] is recovered locally. It is attached to the retrieval
//!   result that produced it and aggregated into the report; it never aborts a run.
//! - [`CheckError`] aborts the consistency check phase. A configuration error is
//!   operator error, a plugin failure is a bug, neither is transient.

use serde::Serialize;
use thiserror::Error;

/// Failure of a single source query
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "cause", rename_all = "snake_case")]
pub enum RetrievalError {
    /// Connection or transport failure
    #[error("Connection problem: {0}")]
    Network(String),

    /// Provider answered with an error status or error payload
    #[error("Provider error: {0}")]
    Provider(String),

    /// Response could not be interpreted
    #[error("Unparseable response: {0}")]
    Parse(String),

    /// Throttled on every attempt of the retry budget
    #[error("Too many retries")]
    TooManyRetries,

    /// An entry-scoped option needed by the query is invalid
    #[error("Invalid option: {0}")]
    Option(String),

    /// The retrieval task itself died (panic inside an adapter)
    #[error("Retrieval task failed: {0}")]
    TaskFailed(String),
}

impl RetrievalError {
    pub fn network(err: impl std::fmt::Display) -> Self {
        RetrievalError::Network(err.to_string())
    }

    pub fn parse(err: impl std::fmt::Display) -> Self {
        RetrievalError::Parse(err.to_string())
    }
}

/// Fatal failure of the consistency check phase
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CheckError {
    /// Invalid check configuration (wrong type, unsupported value)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Unexpected failure escaping a plugin's check or completion step
    #[error("Check '{plugin}' failed: {message}")]
    PluginFailure { plugin: String, message: String },
}

impl CheckError {
    pub fn config(message: impl Into<String>) -> Self {
        CheckError::Configuration(message.into())
    }

    pub fn plugin(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        CheckError::PluginFailure {
            plugin: plugin.into(),
            message: message.into(),
        }
    }
}

/// Failure of a whole checking run
#[derive(Debug, Error)]
pub enum RunError {
    /// Two entries share a key
    #[error("Duplicate entry key: {0}")]
    DuplicateEntry(String),

    /// Sources or worker pool could not be set up
    #[error("Setup failed: {0}")]
    Setup(String),

    /// Invalid retrieval or rate limit settings
    #[error(transparent)]
    Config(#[from] bibchex_common::Error),

    #[error(transparent)]
    Check(#[from] CheckError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_too_many_retries_message() {
        assert_eq!(RetrievalError::TooManyRetries.to_string(), "Too many retries");
    }

    #[test]
    fn test_retrieval_error_serialization() {
        let json = serde_json::to_string(&RetrievalError::Provider("status 500".into())).unwrap();
        assert_eq!(json, r#"{"kind":"provider","cause":"status 500"}"#);
    }

    #[test]
    fn test_plugin_failure_display() {
        let err = CheckError::plugin("dead_url", "client not configured");
        assert_eq!(err.to_string(), "Check 'dead_url' failed: client not configured");
    }
}
