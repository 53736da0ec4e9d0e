//! Turn-driven checkpoint capture
//!
//! A checkpoint is bound to the user entry that started a turn, but that
//! entry's id only exists after the host has appended it. Capture is
//! therefore split in two:
//!
//! ```text
//! Idle --turn start (sub-turn 0)--> Pending --turn end (sub-turn 0)--> Idle
//!                                      |
//!                                      +-- pointer written, index updated,
//!                                          retention applied
//! ```
//!
//! Both halves are best-effort. A failed capture leaves the coordinator idle
//! and the turn proceeds without a checkpoint; a missing pending snapshot or
//! user entry at turn end is skipped silently.

use crate::checkpoint::PointerName;
use crate::error::Result;
use crate::git::GitRunner;
use crate::host::ConversationEntry;
use crate::index::CheckpointIndex;
use crate::retention::RetentionPolicy;
use crate::storage::SnapshotStore;
use crate::types::{PruneReport, SnapshotId};
use crate::utils;
use tracing::{debug, info, instrument};

/// Snapshot taken at turn start, waiting for its entry id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCapture {
    /// Captured worktree
    pub snapshot: SnapshotId,
    /// Capture time in milliseconds since the Unix epoch
    pub captured_at_ms: u64,
}

/// Capture state for the current user message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CaptureState {
    /// Nothing captured
    #[default]
    Idle,
    /// Snapshot taken, not yet bound to an entry
    Pending(PendingCapture),
}

/// A checkpoint that was bound at turn end
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundCheckpoint {
    /// Entry the snapshot is bound to
    pub entry_id: String,
    /// Pointer written for it
    pub pointer: String,
    /// Snapshot the pointer refers to
    pub snapshot: SnapshotId,
    /// What retention removed afterwards
    pub pruned: PruneReport,
}

/// Decides when to capture and how to bind the result
#[derive(Debug, Clone, Default)]
pub struct CaptureCoordinator {
    state: CaptureState,
}

impl CaptureCoordinator {
    /// Create an idle coordinator
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    pub fn state(&self) -> &CaptureState {
        &self.state
    }

    /// Pending snapshot, if any
    pub fn pending(&self) -> Option<&PendingCapture> {
        match &self.state {
            CaptureState::Pending(pending) => Some(pending),
            CaptureState::Idle => None,
        }
    }

    /// Drop any pending snapshot
    pub fn reset(&mut self) {
        self.state = CaptureState::Idle;
    }

    /// Only the first sub-turn of a user message captures or binds
    pub fn is_first_sub_turn(turn_index: u32) -> bool {
        turn_index == 0
    }

    /// Capture the worktree at the start of a user message
    ///
    /// Later sub-turns of the same message are ignored and return `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns the capture failure after resetting to idle; callers log it
    /// and let the turn continue.
    #[instrument(skip(self, store))]
    pub fn on_turn_start<G: GitRunner>(
        &mut self,
        store: &SnapshotStore<G>,
        turn_index: u32,
    ) -> Result<Option<SnapshotId>> {
        if !Self::is_first_sub_turn(turn_index) {
            return Ok(None);
        }

        // A pending snapshot from an unfinished turn is stale now
        self.state = CaptureState::Idle;

        let captured_at_ms = utils::now_ms();
        let snapshot = store.capture()?;
        debug!("Pending checkpoint {}", snapshot.short());
        self.state = CaptureState::Pending(PendingCapture {
            snapshot: snapshot.clone(),
            captured_at_ms,
        });
        Ok(Some(snapshot))
    }

    /// Bind the pending snapshot to `entry`, the newest user entry
    ///
    /// Returns `Ok(None)` when there is nothing to bind: a later sub-turn,
    /// no pending snapshot, or no user entry on the branch.
    ///
    /// # Errors
    ///
    /// Returns a pointer error if the ref cannot be written. The pending
    /// snapshot is discarded either way.
    #[instrument(skip(self, store, index, retention, entry))]
    pub fn on_turn_end<G: GitRunner>(
        &mut self,
        store: &SnapshotStore<G>,
        index: &mut CheckpointIndex,
        retention: &RetentionPolicy,
        turn_index: u32,
        entry: Option<&ConversationEntry>,
    ) -> Result<Option<BoundCheckpoint>> {
        if !Self::is_first_sub_turn(turn_index) {
            return Ok(None);
        }

        let pending = match std::mem::take(&mut self.state) {
            CaptureState::Pending(pending) => pending,
            CaptureState::Idle => {
                debug!("No pending snapshot at turn end, skipping checkpoint");
                return Ok(None);
            }
        };
        let Some(entry) = entry else {
            debug!("No user entry on branch, dropping pending snapshot");
            return Ok(None);
        };

        let pointer = PointerName::checkpoint(index.session_id(), pending.captured_at_ms, &entry.id)
            .encode(store.namespace());
        store.set_pointer(&pointer, &pending.snapshot)?;
        index.set(entry.id.clone(), pointer.clone());
        info!("Checkpoint {} bound to entry {}", pending.snapshot.short(), entry.id);

        let pruned = retention.prune(store, index);
        Ok(Some(BoundCheckpoint {
            entry_id: entry.id.clone(),
            pointer,
            snapshot: pending.snapshot,
            pruned,
        }))
    }
}
