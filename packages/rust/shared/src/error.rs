//! Error types for Code Check.
//!
//! Library crates use [`CodeCheckError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all Code Check operations.
#[derive(Debug, thiserror::Error)]
pub enum CodeCheckError {
    /// Configuration loading or validation error (missing credentials, bad values).
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error talking to the search or extraction provider.
    #[error("network error: {0}")]
    Network(String),

    /// A provider payload could not be decoded.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Extraction output does not conform to the requested section shape.
    #[error("shape error: {message}")]
    Shape { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Request validation error (bad address, bad pagination, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A job (or other record) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Missing or invalid pre-shared credential.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The job state machine refused a transition.
    #[error("invalid transition for job {job_id}: {message}")]
    InvalidTransition { job_id: String, message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, CodeCheckError>;

impl CodeCheckError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a shape error from any displayable message.
    pub fn shape(msg: impl Into<String>) -> Self {
        Self::Shape {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a transition error for the given job.
    pub fn transition(job_id: impl ToString, msg: impl Into<String>) -> Self {
        Self::InvalidTransition {
            job_id: job_id.to_string(),
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = CodeCheckError::config("PERPLEXITY_API_KEY environment variable not set");
        assert_eq!(
            err.to_string(),
            "config error: PERPLEXITY_API_KEY environment variable not set"
        );

        let err = CodeCheckError::shape("missing field `value`");
        assert!(err.to_string().contains("missing field"));

        let err = CodeCheckError::transition("abc", "job is not pending");
        assert_eq!(
            err.to_string(),
            "invalid transition for job abc: job is not pending"
        );
    }
}
