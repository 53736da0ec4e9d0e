//! Per-session retention of checkpoint pointers
//!
//! Retention is housekeeping: every failure is logged and skipped, never
//! returned. Only the session's own ordinary checkpoints count toward the
//! cap. Backups, resume pointers and other sessions' pointers are untouched.

use crate::checkpoint::{kind_prefix, CheckpointRef, PointerKind};
use crate::git::GitRunner;
use crate::index::CheckpointIndex;
use crate::storage::SnapshotStore;
use crate::types::PruneReport;
use tracing::{debug, warn};

/// Bounds the number of checkpoints kept per session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    max_per_session: usize,
}

impl RetentionPolicy {
    /// Keep at most `max_per_session` ordinary checkpoints (minimum 1)
    pub fn new(max_per_session: usize) -> Self {
        Self {
            max_per_session: max_per_session.max(1),
        }
    }

    /// Configured cap
    pub fn max_per_session(&self) -> usize {
        self.max_per_session
    }

    /// Delete the oldest checkpoints of `index.session_id()` beyond the cap
    ///
    /// An index entry is dropped only while it still names the deleted
    /// pointer; a newer checkpoint for the same entry is preserved.
    pub fn prune<G: GitRunner>(
        &self,
        store: &SnapshotStore<G>,
        index: &mut CheckpointIndex,
    ) -> PruneReport {
        let mut report = PruneReport::default();
        let prefix = kind_prefix(store.namespace(), index.session_id(), PointerKind::Checkpoint);

        let mut checkpoints = match store.list_pointers(&prefix) {
            Ok(refs) => refs,
            Err(e) => {
                warn!("Retention skipped, cannot list checkpoints: {}", e);
                report.failures += 1;
                return report;
            }
        };
        checkpoints.retain(|r| r.pointer.is_owned_by(index.session_id()));

        if checkpoints.len() <= self.max_per_session {
            return report;
        }

        checkpoints.sort_by(CheckpointRef::oldest_first);
        let excess = checkpoints.len() - self.max_per_session;
        for checkpoint in checkpoints.into_iter().take(excess) {
            match store.delete_pointer(&checkpoint.name) {
                Ok(()) => {
                    if let Some(entry_id) = checkpoint.pointer.entry_id.as_deref() {
                        if index.remove_if_points_to(entry_id, &checkpoint.name) {
                            report.index_entries_removed += 1;
                        }
                    }
                    report.deleted.push(checkpoint.name);
                }
                Err(e) => {
                    warn!("Failed to prune {}: {}", checkpoint.name, e);
                    report.failures += 1;
                }
            }
        }

        debug!(
            "Pruned {} checkpoint(s) for session {}",
            report.deleted.len(),
            index.session_id()
        );
        report
    }

    /// Delete every pointer of `kind` for `session` except `keep`
    ///
    /// Used for the single-slot pointers (backups and resume checkpoints).
    pub fn prune_kind_except<G: GitRunner>(
        store: &SnapshotStore<G>,
        session: &str,
        kind: PointerKind,
        keep: &str,
    ) -> PruneReport {
        let mut report = PruneReport::default();
        let prefix = kind_prefix(store.namespace(), session, kind);
        let refs = match store.list_pointers(&prefix) {
            Ok(refs) => refs,
            Err(e) => {
                warn!("Cannot list {} pointers: {}", kind, e);
                report.failures += 1;
                return report;
            }
        };

        for stale in refs.into_iter().filter(|r| r.name != keep && r.pointer.is_owned_by(session)) {
            match store.delete_pointer(&stale.name) {
                Ok(()) => report.deleted.push(stale.name),
                Err(e) => {
                    warn!("Failed to delete superseded {}: {}", stale.name, e);
                    report.failures += 1;
                }
            }
        }
        report
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::new(crate::types::DEFAULT_MAX_CHECKPOINTS)
    }
}
