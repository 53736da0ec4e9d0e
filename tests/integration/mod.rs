//! End-to-end integration tests for Turnback
//!
//! Drives the engine the way a conversation host does, against real git
//! repositories in temporary directories, and checks the worktree byte for
//! byte afterwards.

use ::turnback::*;
use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;
use walkdir::WalkDir;

/// Fresh repository with no commits
pub fn init_repo() -> TempDir {
    let dir = TempDir::new().unwrap();
    git(dir.path(), &["init", "-q"]);
    dir
}

/// Run git in `root` and return trimmed stdout, panicking on failure
pub fn git(root: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(root)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

pub fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

pub fn read(root: &Path, rel: &str) -> String {
    fs::read_to_string(root.join(rel)).unwrap()
}

/// Every file under `root` except `.git`, with its bytes
pub fn worktree_state(root: &Path) -> BTreeMap<String, Vec<u8>> {
    WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git")
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let rel = e.path().strip_prefix(root).unwrap().to_string_lossy().into_owned();
            (rel, fs::read(e.path()).unwrap())
        })
        .collect()
}

/// Conversation host with a movable branch head
pub struct TestHost {
    session: RefCell<String>,
    entries: RefCell<Vec<ConversationEntry>>,
    head: RefCell<Option<String>>,
}

impl TestHost {
    pub fn new(session: &str) -> Self {
        Self {
            session: RefCell::new(session.to_string()),
            entries: RefCell::new(Vec::new()),
            head: RefCell::new(None),
        }
    }

    pub fn switch_to(&self, session: &str) {
        *self.session.borrow_mut() = session.to_string();
        self.entries.borrow_mut().clear();
        *self.head.borrow_mut() = None;
    }

    pub fn push_user(&self, id: &str) {
        self.entries.borrow_mut().push(ConversationEntry::user(id));
        self.entries
            .borrow_mut()
            .push(ConversationEntry::assistant(format!("{}-reply", id)));
        *self.head.borrow_mut() = Some(id.to_string());
    }

    pub fn head(&self) -> Option<String> {
        self.head.borrow().clone()
    }

    /// Ask the engine first; move the branch only if it did not cancel
    pub fn fork<G: GitRunner>(&self, engine: &mut Turnback<G>, entry_id: &str, ui: &dyn Prompter) -> HookOutcome {
        let event = HostEvent::BeforeFork { entry_id: entry_id.to_string() };
        let outcome = engine.dispatch(&event, self, ui);
        if outcome != HookOutcome::Cancel {
            *self.head.borrow_mut() = Some(entry_id.to_string());
        }
        outcome
    }

    /// Same ordering as [`TestHost::fork`], for jumps
    pub fn jump<G: GitRunner>(&self, engine: &mut Turnback<G>, entry_id: &str, ui: &dyn Prompter) -> HookOutcome {
        let event = HostEvent::BeforeJump { target_entry_id: entry_id.to_string() };
        let outcome = engine.dispatch(&event, self, ui);
        if outcome != HookOutcome::Cancel {
            *self.head.borrow_mut() = Some(entry_id.to_string());
        }
        outcome
    }

    /// One user message with a single sub-turn
    pub fn turn<G: GitRunner>(&self, engine: &mut Turnback<G>, entry_id: &str, ui: &dyn Prompter) {
        engine.dispatch(&HostEvent::TurnStart { turn_index: 0 }, self, ui);
        self.push_user(entry_id);
        engine.dispatch(&HostEvent::TurnEnd { turn_index: 0, timestamp: 0 }, self, ui);
    }
}

impl ConversationHost for TestHost {
    fn session_id(&self) -> String {
        self.session.borrow().clone()
    }

    fn current_branch_entries(&self) -> Vec<ConversationEntry> {
        self.entries.borrow().clone()
    }
}

/// Prompter replaying canned answers
#[derive(Default)]
pub struct TestUi {
    answers: RefCell<VecDeque<Option<usize>>>,
    pub menus: RefCell<Vec<Vec<String>>>,
    pub notes: RefCell<Vec<(String, NotifyLevel)>>,
    pub status: RefCell<Option<String>>,
}

impl TestUi {
    pub fn answering(answers: impl IntoIterator<Item = Option<usize>>) -> Self {
        Self {
            answers: RefCell::new(answers.into_iter().collect()),
            ..Default::default()
        }
    }

    pub fn queue(&self, answer: Option<usize>) {
        self.answers.borrow_mut().push_back(answer);
    }

    pub fn last_note(&self) -> Option<(String, NotifyLevel)> {
        self.notes.borrow().last().cloned()
    }
}

impl Prompter for TestUi {
    fn choose(&self, _title: &str, options: &[String]) -> Option<usize> {
        self.menus.borrow_mut().push(options.to_vec());
        self.answers.borrow_mut().pop_front().flatten()
    }

    fn notify(&self, message: &str, level: NotifyLevel) {
        self.notes.borrow_mut().push((message.to_string(), level));
    }

    fn set_status(&self, _key: &str, text: Option<&str>) {
        *self.status.borrow_mut() = text.map(str::to_string);
    }
}

pub fn engine_with(repo: &TempDir, config: EngineConfig) -> Turnback {
    TurnbackBuilder::new().config(config).build(repo.path()).unwrap()
}

#[cfg(test)]
mod scenarios {
    use super::*;
    use ::turnback::checkpoint::kind_prefix;

    const NS: &str = "refs/turnback";

    #[test]
    fn test_restore_returns_exact_bytes_of_turn_start() {
        let repo = init_repo();
        let mut engine = engine_with(&repo, EngineConfig::default());
        let host = TestHost::new("S1");
        let ui = TestUi::default();

        engine.dispatch(&HostEvent::SessionStart, &host, &ui);
        write(repo.path(), "src/main.rs", "fn main() {}\n");
        write(repo.path(), "README.md", "# demo\n");
        let at_turn_start = worktree_state(repo.path());
        host.turn(&mut engine, "e1", &ui);

        write(repo.path(), "src/main.rs", "fn main() { println!(\"hi\"); }\n");
        fs::remove_file(repo.path().join("README.md")).unwrap();
        write(repo.path(), "src/lib.rs", "pub fn f() {}\n");
        host.turn(&mut engine, "e2", &ui);

        ui.queue(Some(0));
        assert_eq!(host.fork(&mut engine, "e1", &ui), HookOutcome::Continue);
        assert_eq!(worktree_state(repo.path()), at_turn_start);
        assert_eq!(host.head().as_deref(), Some("e1"));
    }

    #[test]
    fn test_fresh_process_falls_back_to_resume_checkpoint() {
        let repo = init_repo();
        write(repo.path(), "a.txt", "first run");
        {
            let mut engine = engine_with(&repo, EngineConfig::default());
            let host = TestHost::new("S1");
            engine.dispatch(&HostEvent::SessionStart, &host, &Headless);
        }

        write(repo.path(), "a.txt", "state at resume");
        let at_resume = worktree_state(repo.path());

        let mut engine = engine_with(&repo, EngineConfig::default());
        let host = TestHost::new("S1");
        let ui = TestUi::answering([Some(0)]);
        engine.dispatch(&HostEvent::SessionStart, &host, &ui);
        assert_eq!(engine.session().unwrap().index().len(), 0);

        write(repo.path(), "a.txt", "edited before any turn completed");
        write(repo.path(), "b.txt", "new");

        assert_eq!(host.fork(&mut engine, "old-entry", &ui), HookOutcome::Continue);
        assert_eq!(worktree_state(repo.path()), at_resume);

        let menu = &ui.menus.borrow()[0];
        assert!(menu[0].contains("session start"), "{:?}", menu);
        let (note, level) = ui.last_note().unwrap();
        assert_eq!(level, NotifyLevel::Info);
        assert!(note.contains("to session start"), "{}", note);

        // Only the newest resume checkpoint survives
        let store = engine.store();
        assert_eq!(store.list_pointers(&kind_prefix(NS, "S1", PointerKind::Resume)).unwrap().len(), 1);
    }

    #[test]
    fn test_sessions_sharing_a_repository_are_isolated() {
        let repo = init_repo();
        let mut engine = engine_with(&repo, EngineConfig::default());
        let host = TestHost::new("S1");

        engine.dispatch(&HostEvent::SessionStart, &host, &Headless);
        for entry in ["a1", "a2", "a3"] {
            write(repo.path(), "f.txt", entry);
            host.turn(&mut engine, entry, &Headless);
        }
        assert_eq!(engine.session().unwrap().index().len(), 3);

        host.switch_to("S2");
        engine.dispatch(&HostEvent::SessionSwitch, &host, &Headless);
        host.turn(&mut engine, "b1", &Headless);

        let s2 = engine.session().unwrap();
        assert_eq!(s2.session_id(), "S2");
        assert_eq!(s2.index().len(), 1);
        assert!(s2.index().get("a1").is_none());

        // S2 cannot restore S1's entries exactly; it only falls back to its own start
        let target = RestoreCoordinator::resolve_target(engine.store(), s2, "a1").unwrap().unwrap();
        assert_eq!(target.source, RestoreSource::SessionStart);

        // And S1 is untouched by S2's activity
        host.switch_to("S1");
        engine.dispatch(&HostEvent::SessionSwitch, &host, &Headless);
        let s1 = engine.session().unwrap();
        assert_eq!(s1.index().len(), 3);
        assert!(s1.index().get("b1").is_none());
    }

    #[test]
    fn test_restore_then_undo_round_trip() {
        let repo = init_repo();
        let mut engine = engine_with(&repo, EngineConfig::default());
        let host = TestHost::new("S1");
        let ui = TestUi::default();

        engine.dispatch(&HostEvent::SessionStart, &host, &ui);
        write(repo.path(), "a.txt", "checkpointed");
        host.turn(&mut engine, "e1", &ui);

        write(repo.path(), "a.txt", "latest");
        write(repo.path(), "deep/nested/new.txt", "added later");
        let before_restore = worktree_state(repo.path());

        // Jump and restore files
        ui.queue(Some(1));
        assert_eq!(host.jump(&mut engine, "e1", &ui), HookOutcome::Continue);
        assert_eq!(read(repo.path(), "a.txt"), "checkpointed");
        assert!(!repo.path().join("deep").exists());

        // Work done after the restore must survive the undo
        write(repo.path(), "a.txt", "precious edit");
        write(repo.path(), "notes.txt", "made after restore");

        // Jump menu now offers undo: keep, restore, undo, cancel
        ui.queue(Some(2));
        assert_eq!(host.jump(&mut engine, "e1", &ui), HookOutcome::Cancel);
        assert_eq!(worktree_state(repo.path()), before_restore);

        let recovery = RestoreCoordinator::latest_recovery(engine.store(), "S1")
            .unwrap()
            .expect("undo keeps the state it replaced");
        assert_eq!(git(repo.path(), &["show", &format!("{}:a.txt", recovery.name)]), "precious edit");
        assert_eq!(
            git(repo.path(), &["show", &format!("{}:notes.txt", recovery.name)]),
            "made after restore"
        );

        // No backup left
        let err = engine.undo().unwrap_err();
        assert!(err.user_message().contains("No checkpoint/backup available"));
        assert_eq!(worktree_state(repo.path()), before_restore);

        // And the menu no longer offers it
        ui.queue(Some(0));
        host.jump(&mut engine, "e1", &ui);
        let menus = ui.menus.borrow();
        assert_eq!(menus.last().unwrap().len(), 3);
    }

    #[test]
    fn test_restore_replaces_directory_with_file() {
        let repo = init_repo();
        let mut engine = engine_with(&repo, EngineConfig::default());
        let host = TestHost::new("S1");
        let ui = TestUi::default();

        engine.dispatch(&HostEvent::SessionStart, &host, &ui);
        write(repo.path(), "x/y.txt", "inside");
        host.turn(&mut engine, "e1", &ui);
        host.turn(&mut engine, "e2", &ui);

        fs::remove_dir_all(repo.path().join("x")).unwrap();
        write(repo.path(), "x", "now a file");
        let before_restore = worktree_state(repo.path());

        ui.queue(Some(0));
        assert_eq!(host.fork(&mut engine, "e1", &ui), HookOutcome::Continue);
        assert_eq!(host.head().as_deref(), Some("e1"));
        assert_eq!(read(repo.path(), "x/y.txt"), "inside");
        assert_eq!(ui.last_note().unwrap().1, NotifyLevel::Info);

        engine.undo().unwrap();
        assert_eq!(worktree_state(repo.path()), before_restore);
    }

    #[test]
    fn test_restore_replaces_file_with_directory() {
        let repo = init_repo();
        let mut engine = engine_with(&repo, EngineConfig::default());
        let host = TestHost::new("S1");
        let ui = TestUi::default();

        engine.dispatch(&HostEvent::SessionStart, &host, &ui);
        write(repo.path(), "x", "a file");
        host.turn(&mut engine, "e1", &ui);
        host.turn(&mut engine, "e2", &ui);

        fs::remove_file(repo.path().join("x")).unwrap();
        write(repo.path(), "x/y.txt", "now nested");
        let before_restore = worktree_state(repo.path());

        ui.queue(Some(1));
        assert_eq!(host.jump(&mut engine, "e1", &ui), HookOutcome::Continue);
        assert_eq!(host.head().as_deref(), Some("e1"));
        assert!(repo.path().join("x").is_file());
        assert_eq!(read(repo.path(), "x"), "a file");

        engine.undo().unwrap();
        assert_eq!(worktree_state(repo.path()), before_restore);
    }

    #[test]
    fn test_exactly_one_backup_after_every_restore() {
        let repo = init_repo();
        let mut engine = engine_with(&repo, EngineConfig::default());
        let host = TestHost::new("S1");

        engine.dispatch(&HostEvent::SessionStart, &host, &Headless);
        for i in 0..3 {
            write(repo.path(), "f.txt", &format!("v{}", i));
            host.turn(&mut engine, &format!("e{}", i), &Headless);
        }

        let prefix = kind_prefix(NS, "S1", PointerKind::BeforeRestore);
        for entry in ["e0", "e2", "e1", "e1", "missing"] {
            let result = engine.restore_entry(entry).unwrap();
            let backups = engine.store().list_pointers(&prefix).unwrap();
            assert_eq!(backups.len(), 1, "after restoring {}", entry);
            assert_eq!(Some(&backups[0].name), result.backup_pointer.as_ref());
        }
    }

    #[test]
    fn test_retention_bound_holds_across_many_turns() {
        let repo = init_repo();
        let config = EngineConfig {
            max_checkpoints_per_session: 3,
            ..Default::default()
        };
        let mut engine = engine_with(&repo, config);
        let host = TestHost::new("S1");

        engine.dispatch(&HostEvent::SessionStart, &host, &Headless);
        for i in 0..8 {
            write(repo.path(), "f.txt", &format!("{}", i));
            host.turn(&mut engine, &format!("e{}", i), &Headless);

            let live = engine
                .store()
                .list_pointers(&kind_prefix(NS, "S1", PointerKind::Checkpoint))
                .unwrap();
            assert!(live.len() <= 3);
            let names: Vec<&str> = live.iter().map(|r| r.name.as_str()).collect();
            for (_, pointer) in engine.session().unwrap().index().iter() {
                assert!(names.contains(&pointer), "index references pruned {}", pointer);
            }
        }

        let index = engine.session().unwrap().index();
        assert_eq!(index.len(), 3);
        assert!(index.get("e7").is_some());
        assert!(index.get("e0").is_none());
    }

    #[test]
    fn test_conversation_only_and_files_only_forks() {
        let repo = init_repo();
        let mut engine = engine_with(&repo, EngineConfig::default());
        let host = TestHost::new("S1");
        let ui = TestUi::default();

        engine.dispatch(&HostEvent::SessionStart, &host, &ui);
        write(repo.path(), "a.txt", "v1");
        host.turn(&mut engine, "e1", &ui);
        write(repo.path(), "a.txt", "v2");

        ui.queue(Some(1));
        assert_eq!(host.fork(&mut engine, "e1", &ui), HookOutcome::Continue);
        assert_eq!(read(repo.path(), "a.txt"), "v2");

        ui.queue(Some(2));
        assert_eq!(host.fork(&mut engine, "e1", &ui), HookOutcome::SkipConversationRestore);
        assert_eq!(read(repo.path(), "a.txt"), "v1");
    }

    #[test]
    fn test_dismissed_menu_cancels_navigation() {
        let repo = init_repo();
        let mut engine = engine_with(&repo, EngineConfig::default());
        let host = TestHost::new("S1");
        let ui = TestUi::default();

        engine.dispatch(&HostEvent::SessionStart, &host, &ui);
        host.turn(&mut engine, "e1", &ui);
        host.turn(&mut engine, "e2", &ui);

        ui.queue(None);
        assert_eq!(host.jump(&mut engine, "e1", &ui), HookOutcome::Cancel);
        assert_eq!(host.head().as_deref(), Some("e2"));
    }

    #[test]
    fn test_legacy_pointers_adopted_by_first_session() {
        let repo = init_repo();
        write(repo.path(), "a.txt", "legacy state");
        let commit_tree = {
            let engine = engine_with(&repo, EngineConfig::default());
            engine.store().capture().unwrap()
        };
        git(
            repo.path(),
            &["update-ref", "refs/turnback/checkpoint-1700000000000-legacy-entry", commit_tree.as_str()],
        );
        write(repo.path(), "a.txt", "now");

        let mut engine = engine_with(&repo, EngineConfig::default());
        let host = TestHost::new("S1");
        engine.dispatch(&HostEvent::SessionStart, &host, &Headless);
        assert!(engine.session().unwrap().index().get("legacy-entry").is_some());

        engine.restore_entry("legacy-entry").unwrap();
        assert_eq!(read(repo.path(), "a.txt"), "legacy state");

        let remaining = git(repo.path(), &["for-each-ref", "--format=%(refname)", "refs/turnback"]);
        assert!(!remaining.contains("checkpoint-1700000000000"), "{}", remaining);

        host.switch_to("S2");
        engine.dispatch(&HostEvent::SessionSwitch, &host, &Headless);
        assert!(engine.session().unwrap().index().get("legacy-entry").is_none());
    }

    #[test]
    fn test_turns_outside_a_repository_are_not_blocked() {
        let repo = init_repo();
        let mut engine = engine_with(&repo, EngineConfig::default());
        let host = TestHost::new("S1");

        engine.dispatch(&HostEvent::SessionStart, &host, &Headless);
        fs::remove_dir_all(repo.path().join(".git")).unwrap();

        // Every hook still lets the conversation continue
        host.turn(&mut engine, "e1", &Headless);
        assert!(engine.session().unwrap().index().get("e1").is_none());
        assert_eq!(host.fork(&mut engine, "e1", &Headless), HookOutcome::Continue);
    }
}
