//! Per-session runtime state
//!
//! Everything Turnback remembers about a live conversation session sits in a
//! [`SessionRuntime`] value owned by the engine. There is no process-wide
//! state: a new runtime is built on every session start or switch, and
//! dropping it forgets nothing that is not already persisted as a pointer.
//!
//! ## Session start
//!
//! 1. Adopt legacy (session-less) checkpoint pointers, if enabled
//! 2. Rebuild the checkpoint index from the pointer namespace
//! 3. Capture a resume checkpoint and drop the session's older ones
//!
//! Steps 1 and 3 are best-effort; a failure only means less history is
//! available for restores.

use crate::capture::CaptureCoordinator;
use crate::checkpoint::{kind_prefix, NameFormat, PointerKind, PointerName};
use crate::error::{Result, TurnbackError};
use crate::git::GitRunner;
use crate::index::CheckpointIndex;
use crate::retention::RetentionPolicy;
use crate::storage::SnapshotStore;
use crate::utils;
use tracing::{debug, info, warn};

/// How a runtime obtains its resume checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeMode {
    /// Capture the worktree now (host-driven session start)
    Capture,
    /// Reuse the newest existing resume pointer (inspection tools)
    Reuse,
}

/// State for one live session
#[derive(Debug)]
pub struct SessionRuntime {
    session_id: String,
    index: CheckpointIndex,
    capture: CaptureCoordinator,
    resume_pointer: Option<String>,
    force_conversation_only: Option<String>,
    in_flight: bool,
}

impl SessionRuntime {
    /// Start a session against `store`
    ///
    /// # Errors
    ///
    /// - [`TurnbackError::Config`] if `session_id` is blank
    /// - [`TurnbackError::Pointer`] if the namespace cannot be listed
    pub fn start<G: GitRunner>(
        store: &SnapshotStore<G>,
        session_id: &str,
        migrate_legacy: bool,
        resume: ResumeMode,
    ) -> Result<Self> {
        if session_id.trim().is_empty() {
            return Err(TurnbackError::config("session id must not be empty"));
        }

        if migrate_legacy {
            match migrate_legacy_pointers(store, session_id) {
                Ok(0) => {}
                Ok(n) => info!("Adopted {} legacy checkpoint(s) into session {}", n, session_id),
                Err(e) => warn!("Legacy checkpoint migration skipped: {}", e),
            }
        }

        let index = CheckpointIndex::rebuild(store, session_id)?;

        let resume_pointer = match resume {
            ResumeMode::Capture => match capture_resume(store, session_id) {
                Ok(pointer) => Some(pointer),
                Err(e) => {
                    warn!("Resume checkpoint skipped: {}", e);
                    newest_resume(store, session_id)
                }
            },
            ResumeMode::Reuse => newest_resume(store, session_id),
        };

        info!(
            "Session {} ready: {} checkpoint(s), resume {}",
            session_id,
            index.len(),
            if resume_pointer.is_some() { "available" } else { "missing" }
        );

        Ok(Self {
            session_id: session_id.to_string(),
            index,
            capture: CaptureCoordinator::new(),
            resume_pointer,
            force_conversation_only: None,
            in_flight: false,
        })
    }

    /// Session identifier
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Checkpoint index
    pub fn index(&self) -> &CheckpointIndex {
        &self.index
    }

    /// Mutable checkpoint index
    pub fn index_mut(&mut self) -> &mut CheckpointIndex {
        &mut self.index
    }

    /// Capture coordinator
    pub fn capture(&self) -> &CaptureCoordinator {
        &self.capture
    }

    /// Split borrow of the capture coordinator and index
    pub fn capture_parts(&mut self) -> (&mut CaptureCoordinator, &mut CheckpointIndex) {
        (&mut self.capture, &mut self.index)
    }

    /// Resume checkpoint pointer, if one exists
    pub fn resume_pointer(&self) -> Option<&str> {
        self.resume_pointer.as_deref()
    }

    /// Ask for the next fork to leave files alone
    pub fn request_conversation_only_fork(&mut self, source: impl Into<String>) {
        self.force_conversation_only = Some(source.into());
    }

    /// Consume a pending conversation-only request
    pub fn take_conversation_only_request(&mut self) -> Option<String> {
        self.force_conversation_only.take()
    }

    /// Mark a capture or restore as started
    ///
    /// # Errors
    ///
    /// [`TurnbackError::Busy`] if one is already running.
    pub fn begin_operation(&mut self) -> Result<()> {
        if self.in_flight {
            return Err(TurnbackError::Busy);
        }
        self.in_flight = true;
        Ok(())
    }

    /// Mark the running capture or restore as finished
    pub fn end_operation(&mut self) {
        self.in_flight = false;
    }
}

fn capture_resume<G: GitRunner>(store: &SnapshotStore<G>, session_id: &str) -> Result<String> {
    let snapshot = store.capture()?;
    let pointer = PointerName::resume(session_id, utils::now_ms()).encode(store.namespace());
    store.set_pointer(&pointer, &snapshot)?;
    RetentionPolicy::prune_kind_except(store, session_id, PointerKind::Resume, &pointer);
    debug!("Resume checkpoint {} at {}", snapshot.short(), pointer);
    Ok(pointer)
}

fn newest_resume<G: GitRunner>(store: &SnapshotStore<G>, session_id: &str) -> Option<String> {
    let prefix = kind_prefix(store.namespace(), session_id, PointerKind::Resume);
    match store.list_pointers(&prefix) {
        Ok(refs) => refs
            .into_iter()
            .find(|r| r.pointer.is_owned_by(session_id))
            .map(|r| r.name),
        Err(e) => {
            warn!("Cannot list resume pointers: {}", e);
            None
        }
    }
}

/// Move legacy checkpoint pointers into `session_id`'s namespace
///
/// Each legacy checkpoint is rewritten under the current scheme with the same
/// timestamp, entry and snapshot, then the legacy ref is deleted. Legacy
/// backups and resume pointers carry nothing restorable for a new session
/// and are deleted outright. Returns the number of checkpoints adopted.
pub fn migrate_legacy_pointers<G: GitRunner>(store: &SnapshotStore<G>, session_id: &str) -> Result<usize> {
    let mut adopted = 0;
    for legacy in store
        .list_all()?
        .into_iter()
        .filter(|r| r.pointer.format == NameFormat::Legacy)
    {
        if legacy.pointer.kind == PointerKind::Checkpoint {
            let Some(entry_id) = legacy.pointer.entry_id.as_deref() else {
                continue;
            };
            let renamed = PointerName::checkpoint(session_id, legacy.pointer.timestamp_ms, entry_id)
                .encode(store.namespace());
            store.set_pointer(&renamed, &legacy.snapshot)?;
            adopted += 1;
        }
        store.delete_pointer(&legacy.name)?;
        debug!("Migrated legacy pointer {}", legacy.name);
    }
    Ok(adopted)
}
