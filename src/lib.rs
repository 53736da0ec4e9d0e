//! # Turnback - worktree checkpoints for branching conversations
//!
//! A checkpoint-and-restore engine for conversational coding assistants. As
//! the conversation advances, Turnback snapshots the working tree of the git
//! repository the assistant edits; when the user forks or jumps to an earlier
//! point in the conversation, it can put the files back the way they were.
//!
//! ## Overview
//!
//! Turnback lets a conversation host:
//! - Snapshot the full worktree at the start of every user message
//! - Bind each snapshot to the user entry that triggered it
//! - Restore files when the conversation forks or jumps
//! - Undo the most recent restore through a single-slot backup
//! - Keep sessions sharing one repository isolated from each other
//!
//! ## Architecture
//!
//! - **Snapshots** are git commit objects built from a private index, so the
//!   user's branch, `HEAD` and staging area are never touched
//! - **Pointers** are refs under a dedicated namespace (`refs/turnback` by
//!   default), one per checkpoint, backup or resume point
//! - **The index** mapping entries to pointers lives in memory only and is
//!   rebuilt from the namespace at every session start
//! - **Retention** caps the number of checkpoints each session keeps
//!
//! Because all state is refs, it is crash-consistent with the repository and
//! inspectable with plain git:
//!
//! ```text
//! git for-each-ref refs/turnback
//! git show --stat refs/turnback/v1/<session>/checkpoint/<ts>/<entry>
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use turnback::{Turnback, TurnbackBuilder};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut engine = TurnbackBuilder::new()
//!     .max_checkpoints(50)
//!     .build("./my_project")?;
//!
//! engine.start_session("session-1")?;
//! let bound = engine.capture_for_entry("entry-1")?;
//! println!("Checkpoint {} -> {}", bound.entry_id, bound.snapshot.short());
//!
//! // ... files change ...
//!
//! let result = engine.restore_entry("entry-1")?;
//! println!("{}", result.summary());
//! engine.undo()?;
//! # Ok(())
//! # }
//! ```
//!
//! Hosts normally drive the engine through [`Turnback::dispatch`] with
//! [`HostEvent`]s instead; see the [`turnback`](crate::turnback) module.
//!
//! ## Error Handling
//!
//! All operations return `Result<T, TurnbackError>`. Errors are classified so
//! callers know how to react: capture problems skip a checkpoint, restore
//! problems cancel the navigation that asked for them. See [`error`].
//!
//! ## Module Organization
//!
//! - [`turnback`]: Engine, builder and event dispatch
//! - [`storage`]: Git-backed snapshot store
//! - [`checkpoint`]: Pointer naming scheme
//! - [`index`]: Entry to checkpoint map
//! - [`capture`]: Turn-driven capture state machine
//! - [`restore`]: Restore, undo and the fork/jump protocols
//! - [`retention`]: Per-session checkpoint cap
//! - [`session`]: Per-session runtime state
//! - [`host`]: Host traits and events
//! - [`git`]: Git process abstraction
//! - [`types`]: Common types and configuration
//! - [`error`]: Error types and handling

// Public API modules
pub mod capture;
pub mod checkpoint;
pub mod error;
pub mod git;
pub mod host;
pub mod index;
pub mod restore;
pub mod retention;
pub mod session;
pub mod storage;
pub mod turnback;
pub mod types;
pub mod utils;

// Re-export main types for convenience
pub use capture::{BoundCheckpoint, CaptureCoordinator};
pub use checkpoint::{CheckpointRef, PointerKind, PointerName};
pub use error::{Result, TurnbackError};
pub use git::{GitInvocation, GitOutput, GitRunner, SystemGit};
pub use host::{ConversationEntry, ConversationHost, EntryRole, Headless, HookOutcome, HostEvent, Prompter};
pub use index::CheckpointIndex;
pub use restore::RestoreCoordinator;
pub use retention::RetentionPolicy;
pub use session::SessionRuntime;
pub use storage::SnapshotStore;
pub use turnback::{SessionSummary, Turnback, TurnbackBuilder};
pub use types::*;

#[cfg(test)]
mod test_support;
