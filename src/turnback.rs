//! Main Turnback engine
//!
//! This module provides [`Turnback`], the entry point a conversation host
//! talks to, and [`TurnbackBuilder`] for configuring it.
//!
//! ## Overview
//!
//! `Turnback` owns the [`SnapshotStore`], the active [`SessionRuntime`] and
//! the policies applied to it. Hosts feed it [`HostEvent`]s through
//! [`Turnback::dispatch`] and act on the returned [`HookOutcome`]:
//!
//! | Event | Effect |
//! | --- | --- |
//! | `session_start`, `session_switch` | new runtime, resume checkpoint |
//! | `turn_start` (sub-turn 0) | pending snapshot |
//! | `turn_end` (sub-turn 0) | checkpoint bound to the newest user entry |
//! | `before_fork`, `before_jump` | restore menu, may cancel |
//! | `force_conversation_only_fork` | next fork leaves files alone, unless a turn or jump comes first |
//!
//! Capture and retention problems are logged and never surface as a
//! non-`Continue` outcome. Restore problems always cancel the navigation.
//!
//! ## Examples
//!
//! ```rust,no_run
//! use turnback::{ConversationEntry, ConversationHost, Headless, HostEvent, Turnback};
//!
//! struct Host;
//!
//! impl ConversationHost for Host {
//!     fn session_id(&self) -> String {
//!         "session-1".to_string()
//!     }
//!     fn current_branch_entries(&self) -> Vec<ConversationEntry> {
//!         vec![ConversationEntry::user("entry-1")]
//!     }
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut engine = Turnback::builder().max_checkpoints(50).build(".")?;
//! engine.dispatch(&HostEvent::SessionStart, &Host, &Headless);
//! engine.dispatch(&HostEvent::TurnStart { turn_index: 0 }, &Host, &Headless);
//! engine.dispatch(&HostEvent::TurnEnd { turn_index: 0, timestamp: 0 }, &Host, &Headless);
//! # Ok(())
//! # }
//! ```

use crate::capture::BoundCheckpoint;
use crate::checkpoint::{session_prefix, CheckpointRef, NameFormat, PointerKind};
use crate::error::{Result, TurnbackError};
use crate::git::{GitRunner, SystemGit};
use crate::host::{ConversationEntry, ConversationHost, HookOutcome, HostEvent, Prompter};
use crate::index::CheckpointIndex;
use crate::restore::RestoreCoordinator;
use crate::retention::RetentionPolicy;
use crate::session::{ResumeMode, SessionRuntime};
use crate::storage::SnapshotStore;
use crate::types::{EngineConfig, NotifyLevel, PruneReport, RestoreResult};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, instrument, warn};

/// Key used for the status line
pub const STATUS_KEY: &str = "turnback";

/// Checkpoint engine for one repository
pub struct Turnback<G: GitRunner = SystemGit> {
    store: SnapshotStore<G>,
    config: EngineConfig,
    retention: RetentionPolicy,
    restorer: RestoreCoordinator,
    session: Option<SessionRuntime>,
}

impl<G: GitRunner> std::fmt::Debug for Turnback<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Turnback")
            .field("store", &self.store)
            .field("config", &self.config)
            .field("session", &self.session.as_ref().map(|s| s.session_id()))
            .finish()
    }
}

/// Pointer counts for one session, as shown by `turnback sessions`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSummary {
    /// Session id, `None` for legacy session-less pointers
    pub session: Option<String>,
    /// Ordinary checkpoints
    pub checkpoints: usize,
    /// Before-restore backups and undo recovery points
    pub backups: usize,
    /// Resume checkpoints
    pub resumes: usize,
    /// Newest pointer timestamp in milliseconds
    pub newest_ms: u64,
}

impl Turnback<SystemGit> {
    /// Create a builder with default settings
    pub fn builder() -> TurnbackBuilder {
        TurnbackBuilder::new()
    }

    /// Open the repository containing `path` with discovered configuration
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        TurnbackBuilder::new().build(path)
    }
}

impl<G: GitRunner> Turnback<G> {
    /// Snapshot store
    pub fn store(&self) -> &SnapshotStore<G> {
        &self.store
    }

    /// Effective configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Active session, if one was started
    pub fn session(&self) -> Option<&SessionRuntime> {
        self.session.as_ref()
    }

    /// Start (or restart) `session_id`, capturing a resume checkpoint
    ///
    /// # Errors
    ///
    /// Returns the error from [`SessionRuntime::start`]; the previous
    /// session is dropped either way.
    #[instrument(skip(self))]
    pub fn start_session(&mut self, session_id: &str) -> Result<()> {
        self.session = None;
        let runtime = SessionRuntime::start(
            &self.store,
            session_id,
            self.config.migrate_legacy,
            ResumeMode::Capture,
        )?;
        self.session = Some(runtime);
        Ok(())
    }

    /// Attach to `session_id` without capturing anything
    ///
    /// Used by inspection tools that act on an existing session.
    pub fn attach_session(&mut self, session_id: &str) -> Result<()> {
        self.session = None;
        let runtime = SessionRuntime::start(&self.store, session_id, false, ResumeMode::Reuse)?;
        self.session = Some(runtime);
        Ok(())
    }

    /// Route a host event and report what the host should do next
    #[instrument(skip(self, event, host, ui), fields(event = event.kind()))]
    pub fn dispatch(&mut self, event: &HostEvent, host: &dyn ConversationHost, ui: &dyn Prompter) -> HookOutcome {
        match event {
            HostEvent::SessionStart | HostEvent::SessionSwitch => {
                self.begin_host_session(host, ui);
                HookOutcome::Continue
            }
            HostEvent::TurnStart { turn_index } => {
                self.ensure_session(host, ui);
                self.drop_conversation_only_request(event);
                self.on_turn_start(*turn_index);
                HookOutcome::Continue
            }
            HostEvent::TurnEnd { turn_index, .. } => {
                self.ensure_session(host, ui);
                self.on_turn_end(*turn_index, host.last_user_entry().as_ref(), ui);
                HookOutcome::Continue
            }
            HostEvent::BeforeFork { entry_id } => {
                self.ensure_session(host, ui);
                self.on_before_fork(entry_id, ui)
            }
            HostEvent::BeforeJump { target_entry_id } => {
                self.ensure_session(host, ui);
                self.drop_conversation_only_request(event);
                self.on_before_jump(target_entry_id, ui)
            }
            HostEvent::ForceConversationOnlyFork { source } => {
                self.ensure_session(host, ui);
                if let Some(session) = self.session.as_mut() {
                    debug!("Next fork forced to conversation-only by {}", source);
                    session.request_conversation_only_fork(source.clone());
                }
                HookOutcome::Continue
            }
        }
    }

    /// Parse a JSON event payload and dispatch it
    ///
    /// # Errors
    ///
    /// [`TurnbackError::InvalidEvent`] if the payload does not validate.
    pub fn dispatch_json(
        &mut self,
        payload: &str,
        host: &dyn ConversationHost,
        ui: &dyn Prompter,
    ) -> Result<HookOutcome> {
        let event = HostEvent::from_json(payload)?;
        Ok(self.dispatch(&event, host, ui))
    }

    fn begin_host_session(&mut self, host: &dyn ConversationHost, ui: &dyn Prompter) {
        let session_id = host.session_id();
        match self.start_session(&session_id) {
            Ok(()) => self.refresh_status(ui),
            Err(e) => {
                warn!("Checkpoints disabled for session {}: {}", session_id, e);
                ui.notify(&e.user_message(), NotifyLevel::Warning);
                ui.set_status(STATUS_KEY, None);
            }
        }
    }

    fn ensure_session(&mut self, host: &dyn ConversationHost, ui: &dyn Prompter) {
        let current = host.session_id();
        let matches = self
            .session
            .as_ref()
            .is_some_and(|s| s.session_id() == current);
        if !matches {
            debug!("No runtime for session {}, starting one", current);
            self.begin_host_session(host, ui);
        }
    }

    // A conversation-only request only covers the fork that directly follows it
    fn drop_conversation_only_request(&mut self, event: &HostEvent) {
        if let Some(source) = self.session.as_mut().and_then(|s| s.take_conversation_only_request()) {
            debug!("Conversation-only request from {} dropped on {}", source, event.kind());
        }
    }

    fn on_turn_start(&mut self, turn_index: u32) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if let Err(e) = session.begin_operation() {
            debug!("Turn start capture skipped: {}", e);
            return;
        }
        let (capture, _) = session.capture_parts();
        if let Err(e) = capture.on_turn_start(&self.store, turn_index) {
            warn!("Checkpoint skipped for this turn: {}", e);
        }
        session.end_operation();
    }

    fn on_turn_end(&mut self, turn_index: u32, entry: Option<&ConversationEntry>, ui: &dyn Prompter) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if let Err(e) = session.begin_operation() {
            debug!("Turn end binding skipped: {}", e);
            return;
        }
        let (capture, index) = session.capture_parts();
        let bound = capture.on_turn_end(&self.store, index, &self.retention, turn_index, entry);
        session.end_operation();

        match bound {
            Ok(Some(_)) => self.refresh_status(ui),
            Ok(None) => {}
            Err(e) => warn!("Checkpoint could not be recorded: {}", e),
        }
    }

    fn on_before_fork(&mut self, entry_id: &str, ui: &dyn Prompter) -> HookOutcome {
        let Some(session) = self.session.as_mut() else {
            return HookOutcome::Continue;
        };
        if let Some(source) = session.take_conversation_only_request() {
            info!("Fork from {} is conversation-only at the request of {}", entry_id, source);
            return HookOutcome::Continue;
        }
        if let Err(e) = session.begin_operation() {
            ui.notify(&e.user_message(), NotifyLevel::Warning);
            return HookOutcome::Cancel;
        }
        let outcome = self.restorer.on_before_fork(&self.store, session, entry_id, ui);
        session.end_operation();
        outcome
    }

    fn on_before_jump(&mut self, target_entry_id: &str, ui: &dyn Prompter) -> HookOutcome {
        let Some(session) = self.session.as_mut() else {
            return HookOutcome::Continue;
        };
        if let Err(e) = session.begin_operation() {
            ui.notify(&e.user_message(), NotifyLevel::Warning);
            return HookOutcome::Cancel;
        }
        let outcome = self.restorer.on_before_jump(&self.store, session, target_entry_id, ui);
        session.end_operation();
        outcome
    }

    /// Status line text, `None` when silent or without a session
    pub fn status_text(&self) -> Option<String> {
        if self.config.silent {
            return None;
        }
        self.session
            .as_ref()
            .map(|s| format!("{} checkpoint(s)", s.index().len()))
    }

    /// Push [`Turnback::status_text`] to the UI
    pub fn refresh_status(&self, ui: &dyn Prompter) {
        ui.set_status(STATUS_KEY, self.status_text().as_deref());
    }

    fn with_session<T>(
        &mut self,
        op: impl FnOnce(&SnapshotStore<G>, &RestoreCoordinator, &mut SessionRuntime) -> Result<T>,
    ) -> Result<T> {
        let session = self.session.as_mut().ok_or(TurnbackError::NoSession)?;
        session.begin_operation()?;
        let result = op(&self.store, &self.restorer, session);
        session.end_operation();
        result
    }

    /// Every pointer in the namespace, newest first
    pub fn list(&self) -> Result<Vec<CheckpointRef>> {
        self.store.list_all()
    }

    /// Capture the worktree now and bind it to `entry_id`
    ///
    /// # Errors
    ///
    /// [`TurnbackError::NoSession`] without an attached session, otherwise
    /// capture or pointer failures.
    pub fn capture_for_entry(&mut self, entry_id: &str) -> Result<BoundCheckpoint> {
        let retention = self.retention;
        self.with_session(|store, _, session| {
            let (capture, index) = session.capture_parts();
            capture.on_turn_start(store, 0)?;
            capture
                .on_turn_end(store, index, &retention, 0, Some(&ConversationEntry::user(entry_id)))?
                .ok_or_else(|| TurnbackError::internal("capture produced no checkpoint"))
        })
    }

    /// Restore the checkpoint for `entry_id`, or the resume checkpoint
    pub fn restore_entry(&mut self, entry_id: &str) -> Result<RestoreResult> {
        self.with_session(|store, restorer, session| restorer.restore_entry(store, session, entry_id))
    }

    /// Undo the last restore of the active session
    pub fn undo(&mut self) -> Result<RestoreResult> {
        self.with_session(|store, restorer, session| restorer.undo(store, session.session_id()))
    }

    /// Apply retention now, optionally with a different cap
    pub fn prune(&mut self, max_per_session: Option<usize>) -> Result<PruneReport> {
        let policy = max_per_session.map(RetentionPolicy::new).unwrap_or(self.retention);
        self.with_session(|store, _, session| Ok(policy.prune(store, session.index_mut())))
    }

    /// Delete the active session's pointers, or every pointer in the namespace
    ///
    /// Returns the number of pointers deleted.
    pub fn clean(&mut self, all_sessions: bool) -> Result<usize> {
        let prefix = if all_sessions {
            self.store.namespace().to_string()
        } else {
            let session = self.session.as_ref().ok_or(TurnbackError::NoSession)?;
            session_prefix(self.store.namespace(), session.session_id())
        };

        let mut deleted = 0;
        for pointer in self.store.list_pointers(&prefix)? {
            self.store.delete_pointer(&pointer.name)?;
            deleted += 1;
        }
        info!("Deleted {} pointer(s) under {}", deleted, prefix);

        if let Some(session) = self.session.as_mut() {
            let index = CheckpointIndex::rebuild(&self.store, session.session_id())?;
            *session.index_mut() = index;
        }
        Ok(deleted)
    }

    /// Pointer counts grouped by session
    pub fn sessions(&self) -> Result<Vec<SessionSummary>> {
        let mut grouped: BTreeMap<Option<String>, SessionSummary> = BTreeMap::new();
        for pointer in self.store.list_all()? {
            let key = match pointer.pointer.format {
                NameFormat::V1 => pointer.pointer.session.clone(),
                NameFormat::Legacy => None,
            };
            let summary = grouped.entry(key.clone()).or_insert_with(|| SessionSummary {
                session: key,
                ..Default::default()
            });
            match pointer.pointer.kind {
                PointerKind::Checkpoint => summary.checkpoints += 1,
                PointerKind::BeforeRestore | PointerKind::Recovery => summary.backups += 1,
                PointerKind::Resume => summary.resumes += 1,
            }
            summary.newest_ms = summary.newest_ms.max(pointer.pointer.timestamp_ms);
        }

        let mut sessions: Vec<SessionSummary> = grouped.into_values().collect();
        sessions.sort_by(|a, b| b.newest_ms.cmp(&a.newest_ms).then_with(|| a.session.cmp(&b.session)));
        Ok(sessions)
    }
}

/// Builder for configuring a [`Turnback`] instance
///
/// Settings start from an explicit [`EngineConfig`] if one is given, else
/// from the discovered configuration file, else from defaults. Individual
/// setters override whatever the base provides.
///
/// # Examples
///
/// ```rust,no_run
/// use turnback::TurnbackBuilder;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let engine = TurnbackBuilder::new()
///     .max_checkpoints(20)
///     .silent(true)
///     .build("./my_project")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct TurnbackBuilder {
    config: Option<EngineConfig>,
    max_checkpoints: Option<usize>,
    namespace: Option<String>,
    silent: Option<bool>,
    remove_added_files: Option<bool>,
    migrate_legacy: Option<bool>,
}

impl TurnbackBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `config` instead of discovering one
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the per-session retention cap
    pub fn max_checkpoints(mut self, max: usize) -> Self {
        self.max_checkpoints = Some(max);
        self
    }

    /// Set the pointer namespace
    ///
    /// Must live under `refs/` and outside branches and tags.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Suppress the status line
    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = Some(silent);
        self
    }

    /// Delete files absent from the restore target
    pub fn remove_added_files(mut self, remove: bool) -> Self {
        self.remove_added_files = Some(remove);
        self
    }

    /// Adopt legacy pointers on session start
    pub fn migrate_legacy(mut self, migrate: bool) -> Self {
        self.migrate_legacy = Some(migrate);
        self
    }

    fn resolve_config(self, path: &Path) -> Result<EngineConfig> {
        let mut config = match self.config {
            Some(config) => config,
            None => EngineConfig::discover(path)?,
        };
        if let Some(max) = self.max_checkpoints {
            config.max_checkpoints_per_session = max;
        }
        if let Some(namespace) = self.namespace {
            config.namespace = namespace;
        }
        if let Some(silent) = self.silent {
            config.silent = silent;
        }
        if let Some(remove) = self.remove_added_files {
            config.remove_added_files = remove;
        }
        if let Some(migrate) = self.migrate_legacy {
            config.migrate_legacy = migrate;
        }
        config.validate()?;
        Ok(config)
    }

    /// Build against the system git binary named by the configuration
    ///
    /// # Errors
    ///
    /// - [`TurnbackError::Config`] for invalid settings
    /// - [`TurnbackError::NotARepository`] if `path` is not in a git worktree
    pub fn build(self, path: impl AsRef<Path>) -> Result<Turnback<SystemGit>> {
        let path = path.as_ref();
        let config = self.resolve_config(path)?;
        let git = SystemGit::with_binary(config.git_binary.clone());
        Self::assemble(git, path, config)
    }

    /// Build against a custom [`GitRunner`]
    pub fn build_with_git<G: GitRunner>(self, git: G, path: impl AsRef<Path>) -> Result<Turnback<G>> {
        let path = path.as_ref();
        let config = self.resolve_config(path)?;
        Self::assemble(git, path, config)
    }

    fn assemble<G: GitRunner>(git: G, path: &Path, config: EngineConfig) -> Result<Turnback<G>> {
        let store = SnapshotStore::open(git, path, config.namespace())?;
        info!(
            "Turnback ready at {:?} (namespace {}, cap {})",
            store.worktree(),
            store.namespace(),
            config.max_checkpoints_per_session
        );
        Ok(Turnback {
            store,
            retention: RetentionPolicy::new(config.max_checkpoints_per_session),
            restorer: RestoreCoordinator::new(config.remove_added_files),
            config,
            session: None,
        })
    }
}
