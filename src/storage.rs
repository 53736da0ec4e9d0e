//! Git-backed snapshot storage
//!
//! This module provides [`SnapshotStore`], the only component that talks to
//! the repository. It writes the worktree as an immutable snapshot object,
//! checks snapshots back out, and manages the pointer refs that name them.
//!
//! ## Isolation
//!
//! Snapshots are built in a private index file inside a temporary directory
//! (`GIT_INDEX_FILE`), never in `.git/index`. The current branch, `HEAD` and
//! the user's staging area are left untouched by both capture and checkout.
//! The temporary directory is a [`tempfile::TempDir`], removed when it drops
//! on every exit path.
//!
//! ## Snapshot objects
//!
//! ```text
//! read-tree HEAD       (private index, only when HEAD exists)
//! add -A -- .          (tracked + untracked, .gitignore respected)
//! write-tree           -> tree id
//! commit-tree <tree>   -> snapshot id (parentless commit)
//! ```
//!
//! Wrapping the tree in a commit keeps `git gc` from pruning it while a
//! pointer refers to it, and makes snapshots inspectable with `git show`.

use crate::checkpoint::{CheckpointRef, PointerName};
use crate::error::{Result, TurnbackError};
use crate::git::{GitInvocation, GitOutput, GitRunner, SystemGit};
use crate::types::SnapshotId;
use crate::utils;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, trace, warn};

const SNAPSHOT_MESSAGE: &str = "turnback snapshot";
const SNAPSHOT_IDENT_NAME: &str = "turnback";
const SNAPSHOT_IDENT_EMAIL: &str = "turnback@localhost";

/// Snapshot storage inside a git repository
pub struct SnapshotStore<G = SystemGit> {
    /// Git capability
    git: G,
    /// Top level of the worktree
    worktree: PathBuf,
    /// Pointer namespace, without trailing slash
    namespace: String,
}

impl<G> std::fmt::Debug for SnapshotStore<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStore")
            .field("worktree", &self.worktree)
            .field("namespace", &self.namespace)
            .finish()
    }
}

impl<G: GitRunner> SnapshotStore<G> {
    /// Open the repository containing `path`
    ///
    /// # Errors
    ///
    /// - [`TurnbackError::NotARepository`] if `path` is not inside a git worktree
    /// - [`TurnbackError::Io`] if git cannot be spawned
    pub fn open(git: G, path: &Path, namespace: &str) -> Result<Self> {
        let inv = GitInvocation::new(["rev-parse", "--show-toplevel"]);
        let output = git.run(path, &inv)?;
        if !output.success() {
            return Err(TurnbackError::NotARepository(path.to_path_buf()));
        }

        let worktree = PathBuf::from(output.stdout_trimmed());
        debug!("Opened snapshot store at {:?}", worktree);

        Ok(Self {
            git,
            worktree,
            namespace: namespace.trim_end_matches('/').to_string(),
        })
    }

    /// Top level of the worktree
    pub fn worktree(&self) -> &Path {
        &self.worktree
    }

    /// Pointer namespace
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn run(&self, invocation: &GitInvocation) -> Result<GitOutput> {
        self.git.run(&self.worktree, invocation)?.check(invocation)
    }

    /// Snapshot the current worktree
    ///
    /// Stages every tracked and untracked, non-ignored file into a private
    /// index, writes it as a tree and wraps the tree in a parentless commit.
    ///
    /// # Errors
    ///
    /// Any failure is reported as [`TurnbackError::Capture`].
    pub fn capture(&self) -> Result<SnapshotId> {
        let start = Instant::now();
        let staging = tempfile::Builder::new()
            .prefix("turnback-index-")
            .tempdir()
            .map_err(|e| TurnbackError::capture(format!("cannot create staging area: {}", e)))?;
        let index_file = staging.path().join("index");

        let id = self
            .capture_with_index(&index_file)
            .map_err(TurnbackError::into_capture)?;

        info!(
            "Captured snapshot {} in {}ms",
            id.short(),
            start.elapsed().as_millis()
        );
        Ok(id)
    }

    fn capture_with_index(&self, index_file: &Path) -> Result<SnapshotId> {
        if self.head_exists()? {
            self.run(&GitInvocation::new(["read-tree", "HEAD"]).env("GIT_INDEX_FILE", index_file))?;
        }

        self.run(&GitInvocation::new(["add", "-A", "--", "."]).env("GIT_INDEX_FILE", index_file))?;

        let tree = self.run(&GitInvocation::new(["write-tree"]).env("GIT_INDEX_FILE", index_file))?;
        let tree = tree.stdout_trimmed().to_string();
        if tree.is_empty() {
            return Err(TurnbackError::capture("write-tree returned no object id"));
        }
        trace!("Snapshot tree {}", tree);

        let commit = self.run(
            &GitInvocation::new(["commit-tree", tree.as_str(), "-m", SNAPSHOT_MESSAGE])
                .env("GIT_AUTHOR_NAME", SNAPSHOT_IDENT_NAME)
                .env("GIT_AUTHOR_EMAIL", SNAPSHOT_IDENT_EMAIL)
                .env("GIT_COMMITTER_NAME", SNAPSHOT_IDENT_NAME)
                .env("GIT_COMMITTER_EMAIL", SNAPSHOT_IDENT_EMAIL),
        )?;
        let commit = commit.stdout_trimmed();
        if commit.is_empty() {
            return Err(TurnbackError::capture("commit-tree returned no object id"));
        }
        Ok(SnapshotId::new(commit))
    }

    fn head_exists(&self) -> Result<bool> {
        let inv = GitInvocation::new(["rev-parse", "--verify", "--quiet", "HEAD^{commit}"]);
        Ok(self.git.run(&self.worktree, &inv)?.success())
    }

    /// Whether `snapshot` names a commit in the object store
    pub fn snapshot_exists(&self, snapshot: &SnapshotId) -> Result<bool> {
        let inv = GitInvocation::new(["cat-file", "-e"]).arg(format!("{}^{{commit}}", snapshot));
        Ok(self.git.run(&self.worktree, &inv)?.success())
    }

    /// Write the contents of `snapshot` over the worktree
    ///
    /// `subset` is a list of pathspecs relative to the worktree root; `["."]`
    /// restores everything. Files not present in the snapshot are left alone;
    /// see [`SnapshotStore::added_paths`] and
    /// [`SnapshotStore::remove_worktree_paths`] for that half.
    ///
    /// # Errors
    ///
    /// - [`TurnbackError::SnapshotNotFound`] if the object is missing
    /// - [`TurnbackError::Restore`] if the checkout fails part way. The
    ///   worktree may then be partially updated.
    pub fn checkout(&self, snapshot: &SnapshotId, subset: &[&str]) -> Result<()> {
        if !self.snapshot_exists(snapshot).map_err(TurnbackError::into_restore)? {
            return Err(TurnbackError::SnapshotNotFound(snapshot.to_string()));
        }

        if self.is_empty_snapshot(snapshot).map_err(TurnbackError::into_restore)? {
            debug!("Snapshot {} is empty, nothing to check out", snapshot.short());
            return Ok(());
        }

        let staging = tempfile::Builder::new()
            .prefix("turnback-index-")
            .tempdir()
            .map_err(|e| TurnbackError::restore(format!("cannot create staging area: {}", e)))?;
        let index_file = staging.path().join("index");

        let subset: &[&str] = if subset.is_empty() { &["."] } else { subset };
        let mut inv = GitInvocation::new(["checkout", snapshot.as_str(), "--"])
            .env("GIT_INDEX_FILE", &index_file);
        for path in subset {
            inv = inv.arg(*path);
        }
        self.run(&inv).map_err(TurnbackError::into_restore)?;

        info!("Checked out snapshot {}", snapshot.short());
        Ok(())
    }

    fn is_empty_snapshot(&self, snapshot: &SnapshotId) -> Result<bool> {
        let output = self.run(&GitInvocation::new(["ls-tree", snapshot.as_str()]))?;
        Ok(output.stdout.trim().is_empty())
    }

    /// Files present in `to` but absent from `from`
    pub fn added_paths(&self, from: &SnapshotId, to: &SnapshotId) -> Result<Vec<String>> {
        let output = self.run(&GitInvocation::new([
            "diff-tree",
            "-r",
            "-z",
            "--no-renames",
            "--name-only",
            "--diff-filter=A",
            from.as_str(),
            to.as_str(),
        ]))?;

        Ok(output
            .stdout
            .split('\0')
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Delete worktree files by repository-relative path
    ///
    /// Missing files are ignored. Directories emptied by the removal are
    /// pruned up to, but not including, the worktree root. Returns the paths
    /// that were actually deleted.
    pub fn remove_worktree_paths(&self, paths: &[String]) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        for path in paths {
            let relative = Path::new(path);
            if !utils::is_contained_relative(relative) {
                warn!("Refusing to remove path outside the worktree: {}", path);
                continue;
            }
            let full = self.worktree.join(relative);
            match fs::remove_file(&full) {
                Ok(()) => {
                    trace!("Removed {}", path);
                    removed.push(path.clone());
                    utils::prune_empty_parents(&full, &self.worktree);
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(TurnbackError::restore(format!("cannot remove {}: {}", path, e)));
                }
            }
        }
        Ok(removed)
    }

    /// Point `name` at `snapshot`, creating or replacing the ref
    pub fn set_pointer(&self, name: &str, snapshot: &SnapshotId) -> Result<()> {
        self.ensure_in_namespace(name)?;
        self.run(&GitInvocation::new(["update-ref", name, snapshot.as_str()]))
            .map_err(TurnbackError::into_pointer)?;
        debug!("Set pointer {} -> {}", name, snapshot.short());
        Ok(())
    }

    /// Delete the ref `name`
    pub fn delete_pointer(&self, name: &str) -> Result<()> {
        self.ensure_in_namespace(name)?;
        self.run(&GitInvocation::new(["update-ref", "-d", name]))
            .map_err(TurnbackError::into_pointer)?;
        debug!("Deleted pointer {}", name);
        Ok(())
    }

    /// Snapshot a pointer refers to
    pub fn resolve_pointer(&self, name: &str) -> Result<SnapshotId> {
        let output = self
            .run(&GitInvocation::new(["rev-parse", "--verify", "--quiet"]).arg(format!("{}^{{commit}}", name)))
            .map_err(|_| TurnbackError::pointer(format!("cannot resolve {}", name)))?;
        Ok(SnapshotId::new(output.stdout_trimmed()))
    }

    /// List pointers under `prefix`, newest first
    ///
    /// Refs under the prefix that do not decode as Turnback pointers are
    /// skipped. Ordering follows [`CheckpointRef::newest_first`], so the
    /// result does not depend on the order git reports refs in.
    pub fn list_pointers(&self, prefix: &str) -> Result<Vec<CheckpointRef>> {
        self.ensure_in_namespace(prefix)?;
        let output = self
            .run(&GitInvocation::new(["for-each-ref", "--format=%(objectname) %(refname)", prefix]))
            .map_err(TurnbackError::into_pointer)?;

        let mut refs: Vec<CheckpointRef> = output
            .stdout
            .lines()
            .filter_map(|line| self.parse_ref_line(line))
            .collect();
        refs.sort_by(CheckpointRef::newest_first);
        Ok(refs)
    }

    /// List every pointer in the namespace, newest first
    pub fn list_all(&self) -> Result<Vec<CheckpointRef>> {
        self.list_pointers(&self.namespace)
    }

    fn parse_ref_line(&self, line: &str) -> Option<CheckpointRef> {
        let (object, refname) = line.split_once(' ')?;
        match PointerName::decode(&self.namespace, refname) {
            Some(pointer) => Some(CheckpointRef {
                name: refname.to_string(),
                pointer,
                snapshot: SnapshotId::new(object),
            }),
            None => {
                trace!("Skipping unrecognized ref {}", refname);
                None
            }
        }
    }

    fn ensure_in_namespace(&self, name: &str) -> Result<()> {
        let inside = name == self.namespace
            || name
                .strip_prefix(&self.namespace)
                .is_some_and(|rest| rest.starts_with('/'));
        if inside {
            Ok(())
        } else {
            Err(TurnbackError::pointer(format!(
                "{} is outside the {} namespace",
                name, self.namespace
            )))
        }
    }
}
