//! Error types for LeadScout.
//!
//! Library crates use [`LeadScoutError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level error type for all LeadScout operations.
#[derive(Debug, thiserror::Error)]
pub enum LeadScoutError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// External call failed: connection, timeout, or non-2xx status.
    #[error("network error: {0}")]
    Network(String),

    /// Missing or rejected credential.
    #[error("authentication error: {0}")]
    Auth(String),

    /// The provider answered but returned nothing usable.
    #[error("empty result: {0}")]
    EmptyResult(String),

    /// The provider's response did not have the expected shape.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Invalid URL, malformed override, or a step called out of order.
    #[error("invalid input: {message}")]
    UserInput { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, LeadScoutError>;

/// Coarse error classification, reported by the run report and the web layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ExternalCall,
    Auth,
    EmptyResult,
    MalformedResponse,
    UserInput,
    Config,
    Io,
}

impl LeadScoutError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a user-input error from any displayable message.
    pub fn user_input(msg: impl Into<String>) -> Self {
        Self::UserInput {
            message: msg.into(),
        }
    }

    /// Create a malformed-response error.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedResponse(msg.into())
    }

    /// Create an empty-result error.
    pub fn empty(msg: impl Into<String>) -> Self {
        Self::EmptyResult(msg.into())
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config { .. } => ErrorKind::Config,
            Self::Network(_) => ErrorKind::ExternalCall,
            Self::Auth(_) => ErrorKind::Auth,
            Self::EmptyResult(_) => ErrorKind::EmptyResult,
            Self::MalformedResponse(_) => ErrorKind::MalformedResponse,
            Self::UserInput { .. } => ErrorKind::UserInput,
            Self::Io { .. } => ErrorKind::Io,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = LeadScoutError::config("missing section");
        assert_eq!(err.to_string(), "config error: missing section");

        let err = LeadScoutError::user_input("invalid URL 'nope'");
        assert!(err.to_string().contains("invalid URL"));
    }

    #[test]
    fn kinds_serialize_snake_case() {
        let err = LeadScoutError::Network("timeout".into());
        assert_eq!(err.kind(), ErrorKind::ExternalCall);
        let json = serde_json::to_string(&err.kind()).unwrap();
        assert_eq!(json, r#""external_call""#);

        let err = LeadScoutError::malformed("no JSON object");
        assert_eq!(
            serde_json::to_string(&err.kind()).unwrap(),
            r#""malformed_response""#
        );
    }
}
