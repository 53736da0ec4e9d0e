//! Restoring files on fork and jump
//!
//! [`RestoreCoordinator`] answers three questions for the UI layer (is a
//! snapshot resolvable, is an undo available, what did a restore change) and
//! implements the restore primitives behind them.
//!
//! ## Restore protocol
//!
//! ```text
//! capture current worktree  -> new before-restore backup pointer
//! delete older backups      (exactly one survives)
//! remove added files        (optional, they live on in the backup)
//! checkout target           (private index, HEAD untouched)
//! ```
//!
//! Undo runs the same protocol against the backup, writing the replaced
//! state to a single recovery pointer instead of a new backup.
//!
//! The backup is always written before the worktree is touched, so a failed
//! checkout leaves a manual recovery path. Any failure here is returned as a
//! restore-class error and the fork or jump that asked for it is cancelled
//! before the host moves its conversation.

use crate::checkpoint::{kind_prefix, CheckpointRef, PointerKind, PointerName};
use crate::error::{Result, TurnbackError};
use crate::git::GitRunner;
use crate::host::{HookOutcome, Prompter};
use crate::retention::RetentionPolicy;
use crate::session::SessionRuntime;
use crate::storage::SnapshotStore;
use crate::types::{
    ForkChoice, JumpChoice, NotifyLevel, RestoreResult, RestoreSource, RestoreTarget, SnapshotId,
};
use crate::utils;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

const FORK_TITLE: &str = "Fork: restore files too?";
const JUMP_TITLE: &str = "Jump: what about files?";

/// Executes restores, undos, and the fork/jump menus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreCoordinator {
    remove_added_files: bool,
}

impl Default for RestoreCoordinator {
    fn default() -> Self {
        Self::new(true)
    }
}

impl RestoreCoordinator {
    /// Create a coordinator
    ///
    /// With `remove_added_files`, a restore also deletes files that exist in
    /// the worktree but not in the target snapshot.
    pub fn new(remove_added_files: bool) -> Self {
        Self { remove_added_files }
    }

    /// Find the snapshot to restore for `entry_id`
    ///
    /// An exact index hit wins; otherwise the session's resume checkpoint is
    /// offered as [`RestoreSource::SessionStart`]. `Ok(None)` means neither
    /// exists.
    ///
    /// # Errors
    ///
    /// [`TurnbackError::Pointer`] if a pointer exists but cannot be resolved.
    pub fn resolve_target<G: GitRunner>(
        store: &SnapshotStore<G>,
        session: &SessionRuntime,
        entry_id: &str,
    ) -> Result<Option<RestoreTarget>> {
        if let Some(pointer) = session.index().get(entry_id) {
            let snapshot = store.resolve_pointer(pointer)?;
            return Ok(Some(RestoreTarget {
                pointer: pointer.to_string(),
                snapshot,
                source: RestoreSource::Checkpoint,
            }));
        }

        if let Some(pointer) = session.resume_pointer() {
            debug!("No checkpoint for {}, falling back to resume checkpoint", entry_id);
            let snapshot = store.resolve_pointer(pointer)?;
            return Ok(Some(RestoreTarget {
                pointer: pointer.to_string(),
                snapshot,
                source: RestoreSource::SessionStart,
            }));
        }

        Ok(None)
    }

    /// The session's live before-restore backup
    pub fn latest_backup<G: GitRunner>(
        store: &SnapshotStore<G>,
        session_id: &str,
    ) -> Result<Option<CheckpointRef>> {
        let prefix = kind_prefix(store.namespace(), session_id, PointerKind::BeforeRestore);
        Ok(store
            .list_pointers(&prefix)?
            .into_iter()
            .find(|r| r.pointer.is_owned_by(session_id)))
    }

    /// Whether [`RestoreCoordinator::undo`] has something to restore
    pub fn undo_available<G: GitRunner>(store: &SnapshotStore<G>, session_id: &str) -> bool {
        match Self::latest_backup(store, session_id) {
            Ok(backup) => backup.is_some(),
            Err(e) => {
                warn!("Cannot look up backup pointer: {}", e);
                false
            }
        }
    }

    /// Back up the worktree, then check `target` out over it
    ///
    /// # Errors
    ///
    /// Every failure is restore-class ([`TurnbackError::Restore`] or
    /// [`TurnbackError::SnapshotNotFound`]). If the failure happens after the
    /// backup was written, the backup pointer is kept.
    #[instrument(skip(self, store, target), fields(snapshot = %target.snapshot.short()))]
    pub fn perform_restore<G: GitRunner>(
        &self,
        store: &SnapshotStore<G>,
        session_id: &str,
        target: &RestoreTarget,
    ) -> Result<RestoreResult> {
        self.restore_with_backup(store, session_id, target, PointerKind::BeforeRestore)
    }

    /// Restore the session's before-restore backup
    ///
    /// The state being replaced is kept under a single recovery pointer, and
    /// the backup pointer is consumed: only one undo level exists, and a
    /// second undo reports [`TurnbackError::NoBackup`].
    #[instrument(skip(self, store))]
    pub fn undo<G: GitRunner>(&self, store: &SnapshotStore<G>, session_id: &str) -> Result<RestoreResult> {
        let backup = Self::latest_backup(store, session_id)
            .map_err(TurnbackError::into_restore)?
            .ok_or_else(|| TurnbackError::NoBackup(session_id.to_string()))?;

        let target = RestoreTarget {
            pointer: backup.name.clone(),
            snapshot: backup.snapshot.clone(),
            source: RestoreSource::Backup,
        };
        let result = self.restore_with_backup(store, session_id, &target, PointerKind::Recovery)?;

        if let Err(e) = store.delete_pointer(&backup.name) {
            warn!("Undo applied but backup {} could not be consumed: {}", backup.name, e);
        }
        Ok(result)
    }

    /// The session's recovery pointer, holding the state the last undo replaced
    pub fn latest_recovery<G: GitRunner>(
        store: &SnapshotStore<G>,
        session_id: &str,
    ) -> Result<Option<CheckpointRef>> {
        let prefix = kind_prefix(store.namespace(), session_id, PointerKind::Recovery);
        Ok(store
            .list_pointers(&prefix)?
            .into_iter()
            .find(|r| r.pointer.is_owned_by(session_id)))
    }

    fn restore_with_backup<G: GitRunner>(
        &self,
        store: &SnapshotStore<G>,
        session_id: &str,
        target: &RestoreTarget,
        backup_kind: PointerKind,
    ) -> Result<RestoreResult> {
        let start = Instant::now();

        let backup = store.capture().map_err(|e| {
            TurnbackError::restore(format!("cannot back up current files: {}", e))
        })?;
        let backup_pointer = match backup_kind {
            PointerKind::Recovery => PointerName::recovery(session_id, utils::now_ms()),
            _ => PointerName::before_restore(session_id, utils::now_ms()),
        }
        .encode(store.namespace());
        store
            .set_pointer(&backup_pointer, &backup)
            .map_err(TurnbackError::into_restore)?;
        RetentionPolicy::prune_kind_except(store, session_id, backup_kind, &backup_pointer);
        debug!("Backup {} at {}", backup.short(), backup_pointer);

        let removed_paths = self.apply(store, &target.snapshot, &backup)?;

        let result = RestoreResult {
            snapshot: target.snapshot.clone(),
            source: target.source,
            backup_pointer: Some(backup_pointer),
            removed_paths,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        info!("{} in {}ms", result.summary(), result.duration_ms);
        Ok(result)
    }

    /// Resolve `entry_id` and restore it, for non-interactive callers
    ///
    /// # Errors
    ///
    /// [`TurnbackError::NoCheckpoint`] when neither a checkpoint nor a resume
    /// checkpoint exists, otherwise as [`RestoreCoordinator::perform_restore`].
    pub fn restore_entry<G: GitRunner>(
        &self,
        store: &SnapshotStore<G>,
        session: &SessionRuntime,
        entry_id: &str,
    ) -> Result<RestoreResult> {
        let target = Self::resolve_target(store, session, entry_id)?
            .ok_or_else(|| TurnbackError::NoCheckpoint(entry_id.to_string()))?;
        self.perform_restore(store, session.session_id(), &target)
    }

    fn apply<G: GitRunner>(
        &self,
        store: &SnapshotStore<G>,
        target: &SnapshotId,
        current: &SnapshotId,
    ) -> Result<Vec<String>> {
        // Added paths go first so a file replaced by a directory (or the
        // reverse) is out of the way before checkout writes the target
        let removed = if self.remove_added_files {
            let added = store
                .added_paths(target, current)
                .map_err(TurnbackError::into_restore)?;
            store.remove_worktree_paths(&added)?
        } else {
            Vec::new()
        };
        store.checkout(target, &["."])?;
        Ok(removed)
    }

    /// Fork protocol: offer the options, run the chosen primitive
    ///
    /// Dismissing the menu cancels the fork. Without a UI the fork proceeds
    /// and files are left alone.
    pub fn on_before_fork<G: GitRunner>(
        &self,
        store: &SnapshotStore<G>,
        session: &SessionRuntime,
        entry_id: &str,
        ui: &dyn Prompter,
    ) -> HookOutcome {
        let target = match Self::resolve_target(store, session, entry_id) {
            Ok(target) => target,
            Err(e) => {
                warn!("Cannot resolve checkpoint for {}: {}", entry_id, e);
                ui.notify(&e.user_message(), NotifyLevel::Error);
                return HookOutcome::Cancel;
            }
        };

        if !ui.has_ui() {
            return HookOutcome::Continue;
        }

        let source = target.as_ref().map(|t| t.source);
        let choices: &[ForkChoice] = if target.is_some() {
            &[ForkChoice::RestoreAll, ForkChoice::ConversationOnly, ForkChoice::FilesOnly]
        } else {
            &[ForkChoice::ConversationOnly]
        };
        let labels: Vec<String> = choices.iter().map(|c| c.label(source)).collect();

        let Some(choice) = ui.choose(FORK_TITLE, &labels).and_then(|i| choices.get(i).copied()) else {
            debug!("Fork menu dismissed");
            return HookOutcome::Cancel;
        };

        match (choice, target) {
            (ForkChoice::ConversationOnly, _) => HookOutcome::Continue,
            (choice, Some(target)) => match self.perform_restore(store, session.session_id(), &target) {
                Ok(result) => {
                    ui.notify(&result.summary(), NotifyLevel::Info);
                    if choice == ForkChoice::FilesOnly {
                        HookOutcome::SkipConversationRestore
                    } else {
                        HookOutcome::Continue
                    }
                }
                Err(e) => {
                    warn!("Fork restore failed: {}", e);
                    ui.notify(&e.user_message(), NotifyLevel::Error);
                    HookOutcome::Cancel
                }
            },
            (_, None) => HookOutcome::Continue,
        }
    }

    /// Jump protocol: offer the options, run the chosen primitive
    ///
    /// Undo restores the backup and then cancels the jump, so the
    /// conversation stays where the files now match.
    pub fn on_before_jump<G: GitRunner>(
        &self,
        store: &SnapshotStore<G>,
        session: &SessionRuntime,
        target_entry_id: &str,
        ui: &dyn Prompter,
    ) -> HookOutcome {
        let target = match Self::resolve_target(store, session, target_entry_id) {
            Ok(target) => target,
            Err(e) => {
                warn!("Cannot resolve checkpoint for {}: {}", target_entry_id, e);
                ui.notify(&e.user_message(), NotifyLevel::Error);
                return HookOutcome::Cancel;
            }
        };

        if !ui.has_ui() {
            return HookOutcome::Continue;
        }

        let source = target.as_ref().map(|t| t.source);
        let mut choices = vec![JumpChoice::KeepFiles];
        if target.is_some() {
            choices.push(JumpChoice::RestoreFiles);
        }
        if Self::undo_available(store, session.session_id()) {
            choices.push(JumpChoice::UndoLastRestore);
        }
        choices.push(JumpChoice::Cancel);
        let labels: Vec<String> = choices.iter().map(|c| c.label(source)).collect();

        let Some(choice) = ui.choose(JUMP_TITLE, &labels).and_then(|i| choices.get(i).copied()) else {
            debug!("Jump menu dismissed");
            return HookOutcome::Cancel;
        };

        match choice {
            JumpChoice::KeepFiles => HookOutcome::Continue,
            JumpChoice::Cancel => HookOutcome::Cancel,
            JumpChoice::RestoreFiles => {
                let Some(target) = target else {
                    return HookOutcome::Continue;
                };
                match self.perform_restore(store, session.session_id(), &target) {
                    Ok(result) => {
                        ui.notify(&result.summary(), NotifyLevel::Info);
                        HookOutcome::Continue
                    }
                    Err(e) => {
                        warn!("Jump restore failed: {}", e);
                        ui.notify(&e.user_message(), NotifyLevel::Error);
                        HookOutcome::Cancel
                    }
                }
            }
            JumpChoice::UndoLastRestore => {
                match self.undo(store, session.session_id()) {
                    Ok(result) => ui.notify(&result.summary(), NotifyLevel::Info),
                    Err(e) => ui.notify(&e.user_message(), NotifyLevel::Error),
                }
                HookOutcome::Cancel
            }
        }
    }
}
