//! Error types for password store operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using [`PassError`].
pub type Result<T> = std::result::Result<T, PassError>;

/// Errors that can occur while driving the password store.
///
/// Configuration errors (`NoRecipients`, `CannotWrite`, `NoSecretKey`) are
/// also raised as critical events on the store's event stream. Subprocess
/// failures never show up here; they are reported through the consolidated
/// transaction result.
#[derive(Debug, Error)]
pub enum PassError {
    /// The `.gpg-id` governing a path is missing, unreadable or empty.
    #[error("no recipients configured for {}", .0.display())]
    NoRecipients(PathBuf),

    /// A recipients file could not be written.
    #[error("cannot write {}: {source}", path.display())]
    CannotWrite {
        /// File that could not be written
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// None of the selected recipients has a usable private key.
    #[error("no selected recipient has a secret key available: {}", .0.display())]
    NoSecretKey(PathBuf),

    /// Required executable is not installed.
    #[error("program not found: {0}")]
    ProgramNotFound(String),

    /// Command execution failed.
    #[error("command execution failed: {0}")]
    CommandFailed(String),

    /// Entry name is not a valid store-relative name.
    #[error("invalid entry name: {0}")]
    InvalidName(String),

    /// The executor worker has shut down.
    #[error("executor is no longer running")]
    ExecutorClosed,

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error (catch-all).
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PassError {
    /// Returns true for errors caused by store configuration rather than by
    /// a subprocess or the filesystem.
    ///
    /// ```
    /// use passmux::PassError;
    /// use std::path::PathBuf;
    ///
    /// assert!(PassError::NoRecipients(PathBuf::from(".gpg-id")).is_configuration());
    /// assert!(!PassError::ExecutorClosed.is_configuration());
    /// ```
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::NoRecipients(_) | Self::CannotWrite { .. } | Self::NoSecretKey(_)
        )
    }
}
