//! Core data types used throughout the Turnback library
//!
//! ## Overview
//!
//! The types in this module represent:
//! - **Identity**: [`SnapshotId`] - content hash of an immutable worktree snapshot
//! - **Configuration**: [`EngineConfig`] - retention cap, namespace, UI and restore behavior
//! - **Operations**: [`RestoreTarget`], [`RestoreResult`], [`PruneReport`] - inputs and results
//! - **UI vocabulary**: [`NotifyLevel`], [`ForkChoice`], [`JumpChoice`]
//!
//! ## Examples
//!
//! ```rust
//! use turnback::types::EngineConfig;
//!
//! let config = EngineConfig {
//!     max_checkpoints_per_session: 20,
//!     silent: true,
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use crate::error::{Result, TurnbackError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the per-worktree configuration file
pub const CONFIG_FILE_NAME: &str = ".turnback.json";

/// Environment variable pointing at an explicit configuration file
pub const CONFIG_ENV_VAR: &str = "TURNBACK_CONFIG";

/// Default pointer namespace, outside `refs/heads` and `refs/tags`
pub const DEFAULT_NAMESPACE: &str = "refs/turnback";

/// Default number of ordinary checkpoints kept per session
pub const DEFAULT_MAX_CHECKPOINTS: usize = 100;

/// Content hash of a snapshot object in the repository
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(String);

impl SnapshotId {
    /// Wrap a full object id as printed by git
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Full object id
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated id for display
    pub fn short(&self) -> &str {
        &self.0[..8.min(self.0.len())]
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SnapshotId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Engine configuration
///
/// Read from `.turnback.json` in the worktree or from the file named by
/// `TURNBACK_CONFIG`. Unknown keys are rejected so typos surface early.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Maximum ordinary checkpoints kept per session
    pub max_checkpoints_per_session: usize,
    /// Root of the pointer namespace
    pub namespace: String,
    /// Suppress the checkpoint-count status line
    pub silent: bool,
    /// Delete files that exist now but not in the restore target
    pub remove_added_files: bool,
    /// Adopt session-less legacy pointers on session start
    pub migrate_legacy: bool,
    /// Git executable
    pub git_binary: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_checkpoints_per_session: DEFAULT_MAX_CHECKPOINTS,
            namespace: DEFAULT_NAMESPACE.to_string(),
            silent: false,
            remove_added_files: true,
            migrate_legacy: true,
            git_binary: PathBuf::from("git"),
        }
    }
}

impl EngineConfig {
    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| {
            TurnbackError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: EngineConfig = serde_json::from_str(&raw).map_err(|e| {
            TurnbackError::config(format!("cannot parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Find the configuration for a worktree
    ///
    /// `TURNBACK_CONFIG` wins over `<worktree>/.turnback.json`. Without either,
    /// defaults are returned.
    pub fn discover(worktree: &Path) -> Result<Self> {
        if let Some(explicit) = std::env::var_os(CONFIG_ENV_VAR) {
            return Self::load(Path::new(&explicit));
        }
        let local = worktree.join(CONFIG_FILE_NAME);
        if local.is_file() {
            return Self::load(&local);
        }
        Ok(Self::default())
    }

    /// Check invariants that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.max_checkpoints_per_session == 0 {
            return Err(TurnbackError::config(
                "max_checkpoints_per_session must be at least 1",
            ));
        }
        let namespace = self.namespace.trim_end_matches('/');
        if !namespace.starts_with("refs/") || namespace.len() <= "refs/".len() {
            return Err(TurnbackError::config(format!(
                "namespace must live under refs/, got '{}'",
                self.namespace
            )));
        }
        if namespace.starts_with("refs/heads/") || namespace.starts_with("refs/tags/") {
            return Err(TurnbackError::config(
                "namespace must not overlap branches or tags",
            ));
        }
        if namespace.contains("..") || namespace.contains("//") || namespace.ends_with(".lock") {
            return Err(TurnbackError::config(format!(
                "namespace '{}' is not a valid ref prefix",
                self.namespace
            )));
        }
        Ok(())
    }

    /// Namespace without a trailing slash
    pub fn namespace(&self) -> &str {
        self.namespace.trim_end_matches('/')
    }
}

/// Where a restore target came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreSource {
    /// Exact checkpoint bound to the requested entry
    Checkpoint,
    /// Fallback to the session's resume checkpoint
    SessionStart,
    /// The before-restore backup (undo)
    Backup,
}

impl RestoreSource {
    /// Human phrasing used in notifications
    pub fn describe(&self) -> &'static str {
        match self {
            RestoreSource::Checkpoint => "from checkpoint",
            RestoreSource::SessionStart => "to session start",
            RestoreSource::Backup => "to the state before the last restore",
        }
    }
}

/// A resolved snapshot to restore
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreTarget {
    /// Full pointer name the snapshot was resolved from
    pub pointer: String,
    /// Snapshot the pointer refers to
    pub snapshot: SnapshotId,
    /// Whether this is an exact hit or a fallback
    pub source: RestoreSource,
}

/// Outcome of a successful restore or undo
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreResult {
    /// Snapshot now checked out
    pub snapshot: SnapshotId,
    /// What kind of target was restored
    pub source: RestoreSource,
    /// Backup pointer taken before the restore, if any
    pub backup_pointer: Option<String>,
    /// Worktree paths deleted because the target did not contain them
    pub removed_paths: Vec<String>,
    /// Wall time spent
    pub duration_ms: u64,
}

impl RestoreResult {
    /// One-line summary for notifications
    pub fn summary(&self) -> String {
        let mut msg = format!("Files restored {} ({})", self.source.describe(), self.snapshot.short());
        if !self.removed_paths.is_empty() {
            msg.push_str(&format!(", {} added file(s) removed", self.removed_paths.len()));
        }
        msg
    }
}

/// Result of a retention pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Pointers deleted
    pub deleted: Vec<String>,
    /// Index entries dropped with them
    pub index_entries_removed: usize,
    /// Deletions that failed and were skipped
    pub failures: usize,
}

/// Severity of a UI notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyLevel {
    /// Informational
    Info,
    /// Something was skipped
    Warning,
    /// An operation failed
    Error,
}

/// Options offered when the user forks the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkChoice {
    /// Restore files and fork the conversation
    RestoreAll,
    /// Fork the conversation, keep files
    ConversationOnly,
    /// Restore files, keep the conversation where it is
    FilesOnly,
}

impl ForkChoice {
    /// Menu label
    pub fn label(&self, source: Option<RestoreSource>) -> String {
        match (self, source) {
            (ForkChoice::RestoreAll, Some(RestoreSource::SessionStart)) => {
                "Restore all (files to session start + conversation)".to_string()
            }
            (ForkChoice::RestoreAll, _) => "Restore all (files + conversation)".to_string(),
            (ForkChoice::ConversationOnly, None) => {
                "Conversation only (no checkpoint available)".to_string()
            }
            (ForkChoice::ConversationOnly, _) => "Conversation only (keep current files)".to_string(),
            (ForkChoice::FilesOnly, Some(RestoreSource::SessionStart)) => {
                "Files only (restore to session start, keep conversation)".to_string()
            }
            (ForkChoice::FilesOnly, _) => "Files only (restore files, keep conversation)".to_string(),
        }
    }
}

/// Options offered when the user jumps within the conversation tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpChoice {
    /// Navigate, leave files alone
    KeepFiles,
    /// Navigate and restore files
    RestoreFiles,
    /// Undo the last restore, stay where we are
    UndoLastRestore,
    /// Abort navigation
    Cancel,
}

impl JumpChoice {
    /// Menu label
    pub fn label(&self, source: Option<RestoreSource>) -> String {
        match (self, source) {
            (JumpChoice::KeepFiles, _) => "Keep current files".to_string(),
            (JumpChoice::RestoreFiles, Some(RestoreSource::SessionStart)) => {
                "Restore files to session start".to_string()
            }
            (JumpChoice::RestoreFiles, _) => "Restore files to that point".to_string(),
            (JumpChoice::UndoLastRestore, _) => "Undo last file restore".to_string(),
            (JumpChoice::Cancel, _) => "Cancel".to_string(),
        }
    }
}
