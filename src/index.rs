//! In-memory checkpoint index
//!
//! This module provides [`CheckpointIndex`], the map from conversation entry
//! to the pointer holding that entry's newest checkpoint. The index is never
//! persisted: it is a projection of the pointer namespace and is rebuilt from
//! the repository at the start of every session, which is also the recovery
//! path after a crash.
//!
//! ## Rebuild rules
//!
//! Pointers are visited newest first (see [`CheckpointRef::newest_first`]) and
//! the first pointer seen for an entry wins:
//!
//! - current-scheme checkpoints count only for the session being rebuilt
//! - legacy checkpoints count for any session
//! - before-restore and resume pointers are never indexed

use crate::checkpoint::{CheckpointRef, NameFormat, PointerKind};
use crate::error::Result;
use crate::git::GitRunner;
use crate::storage::SnapshotStore;
use std::collections::HashMap;
use tracing::{debug, trace};

/// Entry id to pointer name map for one session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckpointIndex {
    /// Session this index was built for
    session_id: String,
    /// entry id -> full pointer name
    entries: HashMap<String, String>,
}

impl CheckpointIndex {
    /// Create an empty index
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            entries: HashMap::new(),
        }
    }

    /// Rebuild the index for `session_id` from the pointers in `store`
    pub fn rebuild<G: GitRunner>(store: &SnapshotStore<G>, session_id: &str) -> Result<Self> {
        let refs = store.list_all()?;
        let index = Self::from_refs(session_id, &refs);
        debug!(
            "Rebuilt checkpoint index for session {}: {} entries from {} pointers",
            session_id,
            index.len(),
            refs.len()
        );
        Ok(index)
    }

    /// Build the index from an already-listed set of pointers
    ///
    /// The input order does not matter; the refs are re-sorted internally.
    pub fn from_refs(session_id: &str, refs: &[CheckpointRef]) -> Self {
        let mut ordered: Vec<&CheckpointRef> = refs.iter().collect();
        ordered.sort_by(|a, b| CheckpointRef::newest_first(a, b));

        let mut index = Self::new(session_id);
        for checkpoint in ordered {
            let pointer = &checkpoint.pointer;
            if pointer.kind != PointerKind::Checkpoint {
                continue;
            }
            let eligible = match pointer.format {
                NameFormat::V1 => pointer.is_owned_by(session_id),
                NameFormat::Legacy => true,
            };
            if !eligible {
                continue;
            }
            let Some(entry_id) = pointer.entry_id.as_ref() else {
                continue;
            };
            if !index.entries.contains_key(entry_id) {
                trace!("Indexing {} -> {}", entry_id, checkpoint.name);
                index.entries.insert(entry_id.clone(), checkpoint.name.clone());
            }
        }
        index
    }

    /// Session this index belongs to
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Pointer name for `entry_id`
    pub fn get(&self, entry_id: &str) -> Option<&str> {
        self.entries.get(entry_id).map(String::as_str)
    }

    /// Record `pointer` as the newest checkpoint for `entry_id`
    pub fn set(&mut self, entry_id: impl Into<String>, pointer: impl Into<String>) {
        self.entries.insert(entry_id.into(), pointer.into());
    }

    /// Forget `entry_id`
    pub fn remove(&mut self, entry_id: &str) -> Option<String> {
        self.entries.remove(entry_id)
    }

    /// Forget `entry_id` only if it still maps to exactly `pointer`
    ///
    /// Returns whether an entry was removed.
    pub fn remove_if_points_to(&mut self, entry_id: &str, pointer: &str) -> bool {
        if self.get(entry_id) == Some(pointer) {
            self.entries.remove(entry_id);
            true
        } else {
            false
        }
    }

    /// Number of indexed entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(entry id, pointer name)` pairs in no particular order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
