//! Error types for finsource.
//!
//! Library crates use [`FinSourceError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Model calls have their own taxonomy, [`ModelError`], because the
//! refinement loop treats its variants differently: transport failures are
//! retried and eventually fatal to one company, schema failures are a
//! signal that feeds the next iteration.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type for all finsource operations.
#[derive(Debug, thiserror::Error)]
pub enum FinSourceError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error outside of model calls (scraping, probing).
    #[error("network error: {0}")]
    Network(String),

    /// HTML, JSON, or input file parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Model collaborator error.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (empty company name, bad option value, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, FinSourceError>;

impl FinSourceError {
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

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
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

/// Failure of a single model completion call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    /// Network, auth, quota, or non-success HTTP status.
    #[error("transport error: {0}")]
    Transport(String),

    /// The call did not complete within the per-call timeout.
    #[error("model call timed out after {0:?}")]
    Timeout(Duration),

    /// The model replied, but not with the requested structure.
    #[error("schema error: {0}")]
    Schema(String),
}

impl ModelError {
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    /// Timeouts count as transport failures for retry and termination.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }
}
