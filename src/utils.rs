//! Utility functions for Turnback
//!
//! Small helpers shared across modules: clock access, human-readable ages,
//! and worktree path hygiene used when restores delete files.

use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Component, Path};
use tracing::trace;

/// Current time in milliseconds since the Unix epoch
pub fn now_ms() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}

/// Human-readable age of `then` relative to `now`, e.g. `"3m 12s"`
///
/// Sub-second precision is dropped. Times in the future report `"just now"`.
pub fn format_age(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    match (now - then).to_std() {
        Ok(elapsed) if elapsed.as_secs() > 0 => {
            let whole = std::time::Duration::from_secs(elapsed.as_secs());
            humantime::format_duration(whole).to_string()
        }
        _ => "just now".to_string(),
    }
}

/// Whether `path` is relative and cannot escape its base directory
pub fn is_contained_relative(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Remove a directory if it is empty
pub fn remove_dir_if_empty(path: &Path) -> std::io::Result<bool> {
    if fs::read_dir(path)?.next().is_none() {
        fs::remove_dir(path)?;
        Ok(true)
    } else {
        Ok(false)
    }
}

/// Remove the empty ancestors of `removed`, stopping at `root`
pub fn prune_empty_parents(removed: &Path, root: &Path) {
    let mut current = removed.parent();
    while let Some(dir) = current {
        if dir == root || !dir.starts_with(root) {
            break;
        }
        match remove_dir_if_empty(dir) {
            Ok(true) => trace!("Removed empty directory {:?}", dir),
            _ => break,
        }
        current = dir.parent();
    }
}
