//! Error types for the Turnback library
//!
//! This module defines all error types that can occur while capturing,
//! indexing, restoring, or pruning checkpoints.
//!
//! ## Failure classes
//!
//! Errors fall into a small taxonomy that decides how callers react:
//!
//! - **Capture** failures are non-fatal. The conversational turn proceeds
//!   without a checkpoint.
//! - **Pointer** failures are non-fatal for retention but fatal when resolving
//!   a restore target.
//! - **Restore** failures are fatal to the fork or jump that requested them.
//!   The navigation must be cancelled so files and conversation never diverge.
//! - **Config** failures surface to whoever loaded the configuration.

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the Turnback library
pub type Result<T> = std::result::Result<T, TurnbackError>;

/// Main error type for all Turnback operations
#[derive(Debug, Error)]
pub enum TurnbackError {
    /// I/O errors while spawning git or managing the private index
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshotting the worktree failed
    #[error("Capture failed: {0}")]
    Capture(String),

    /// Creating, listing, resolving or deleting a pointer failed
    #[error("Pointer error: {0}")]
    Pointer(String),

    /// Checking a snapshot out into the worktree failed
    #[error("Restore failed: {0}")]
    Restore(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Snapshot object is missing from the object store
    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    /// No checkpoint can be resolved for an entry
    #[error("No checkpoint available for entry {0}")]
    NoCheckpoint(String),

    /// No before-restore backup exists for the session
    #[error("No backup available for session {0}")]
    NoBackup(String),

    /// The worktree is not inside a git repository
    #[error("Not a git repository: {0:?}")]
    NotARepository(PathBuf),

    /// A git subcommand exited with a non-zero status
    #[error("git {command} exited with {code:?}: {stderr}")]
    Git {
        /// Subcommand and arguments, space separated
        command: String,
        /// Exit code, if the process was not killed by a signal
        code: Option<i32>,
        /// Trimmed standard error
        stderr: String,
    },

    /// A host event payload failed validation
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// Another capture or restore is already in flight for this session
    #[error("A checkpoint operation is already in progress")]
    Busy,

    /// No session has been started on the engine
    #[error("No active session")]
    NoSession,

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TurnbackError {
    /// Create a capture error with a custom message
    pub fn capture(msg: impl Into<String>) -> Self {
        TurnbackError::Capture(msg.into())
    }

    /// Create a pointer error with a custom message
    pub fn pointer(msg: impl Into<String>) -> Self {
        TurnbackError::Pointer(msg.into())
    }

    /// Create a restore error with a custom message
    pub fn restore(msg: impl Into<String>) -> Self {
        TurnbackError::Restore(msg.into())
    }

    /// Create a configuration error with a custom message
    pub fn config(msg: impl Into<String>) -> Self {
        TurnbackError::Config(msg.into())
    }

    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        TurnbackError::Internal(msg.into())
    }

    /// Rewrap this error as a capture failure, keeping its message
    pub fn into_capture(self) -> Self {
        match self {
            TurnbackError::Capture(_) => self,
            other => TurnbackError::Capture(other.to_string()),
        }
    }

    /// Rewrap this error as a pointer failure, keeping its message
    pub fn into_pointer(self) -> Self {
        match self {
            TurnbackError::Pointer(_) => self,
            other => TurnbackError::Pointer(other.to_string()),
        }
    }

    /// Rewrap this error as a restore failure, keeping its message
    pub fn into_restore(self) -> Self {
        match self {
            TurnbackError::Restore(_) | TurnbackError::SnapshotNotFound(_) => self,
            other => TurnbackError::Restore(other.to_string()),
        }
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            TurnbackError::NoCheckpoint(entry) => {
                format!("No checkpoint or backup available for entry '{}'.", entry)
            }
            TurnbackError::NoBackup(_) => {
                "No checkpoint/backup available to undo.".to_string()
            }
            TurnbackError::NotARepository(path) => {
                format!("{:?} is not inside a git repository. File checkpoints are disabled.", path)
            }
            TurnbackError::Restore(msg) | TurnbackError::SnapshotNotFound(msg) => {
                format!(
                    "Could not restore files ({}). Navigation was cancelled; \
                     the previous state is kept as a before-restore backup.",
                    msg
                )
            }
            TurnbackError::Busy => {
                "Another checkpoint operation is still running. Try again in a moment.".to_string()
            }
            _ => self.to_string(),
        }
    }
}
