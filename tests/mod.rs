//! Main test module for Turnback
//!
//! This module includes all test suites:
//! - Integration tests for end-to-end conversation scenarios
//! - Chaos tests with git failures injected at chosen subcommands
//! - Property-based tests for naming and index invariants

pub mod integration;
pub mod property;

#[cfg(test)]
mod edge_cases {
    use ::turnback::*;
    use crate::integration::{init_repo, read, write, TestHost, TestUi};
    use std::fs;

    #[test]
    fn test_capture_outside_repository_disables_checkpoints() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = TurnbackBuilder::new()
            .config(EngineConfig::default())
            .build(dir.path())
            .unwrap_err();
        assert!(matches!(err, TurnbackError::NotARepository(_)));
        assert!(err.user_message().contains("not inside a git repository"));
    }

    #[test]
    fn test_special_and_unicode_entry_ids() {
        let repo = init_repo();
        let mut engine = TurnbackBuilder::new()
            .config(EngineConfig::default())
            .build(repo.path())
            .unwrap();
        engine.attach_session("sess/with spaces").unwrap();

        let ids = ["entry with spaces", "файл-1", "a/b/../c", "🚀", "_", "x.lock"];
        for (i, id) in ids.iter().enumerate() {
            write(repo.path(), "f.txt", &format!("v{}", i));
            engine.capture_for_entry(id).unwrap();
        }

        engine.attach_session("sess/with spaces").unwrap();
        let session = engine.session().unwrap();
        assert_eq!(session.index().len(), ids.len());

        engine.restore_entry("файл-1").unwrap();
        assert_eq!(read(repo.path(), "f.txt"), "v1");
    }

    #[test]
    fn test_restore_into_repository_with_commits() {
        let repo = init_repo();
        write(repo.path(), "tracked.txt", "committed");
        write(repo.path(), ".gitignore", "*.log\n");
        crate::integration::git(repo.path(), &["add", "."]);
        crate::integration::git(
            repo.path(),
            &["-c", "user.name=t", "-c", "user.email=t@t", "commit", "-qm", "init"],
        );
        let head_before = crate::integration::git(repo.path(), &["rev-parse", "HEAD"]);

        let mut engine = TurnbackBuilder::new()
            .config(EngineConfig::default())
            .build(repo.path())
            .unwrap();
        let host = TestHost::new("s1");
        let ui = TestUi::answering([Some(0)]);

        engine.dispatch(&HostEvent::SessionStart, &host, &ui);
        write(repo.path(), "tracked.txt", "edited before turn");
        engine.dispatch(&HostEvent::TurnStart { turn_index: 0 }, &host, &ui);
        host.push_user("e1");
        engine.dispatch(&HostEvent::TurnEnd { turn_index: 0, timestamp: 1 }, &host, &ui);

        write(repo.path(), "tracked.txt", "edited by the assistant");
        write(repo.path(), "debug.log", "ignored");
        assert_eq!(host.fork(&mut engine, "e1", &ui), HookOutcome::Continue);

        assert_eq!(read(repo.path(), "tracked.txt"), "edited before turn");
        // Ignored files are neither captured nor removed
        assert_eq!(read(repo.path(), "debug.log"), "ignored");
        assert_eq!(crate::integration::git(repo.path(), &["rev-parse", "HEAD"]), head_before);
        let status = crate::integration::git(repo.path(), &["diff", "--cached", "--name-only"]);
        assert!(status.is_empty(), "staging area changed: {}", status);
    }

    #[test]
    fn test_empty_worktree_restore() {
        let repo = init_repo();
        let mut engine = TurnbackBuilder::new()
            .config(EngineConfig::default())
            .build(repo.path())
            .unwrap();
        engine.attach_session("s1").unwrap();
        engine.capture_for_entry("e1").unwrap();

        write(repo.path(), "created/later.txt", "x");
        let result = engine.restore_entry("e1").unwrap();
        assert_eq!(result.removed_paths, vec!["created/later.txt".to_string()]);
        assert!(!repo.path().join("created").exists());
        assert!(fs::read_dir(repo.path()).unwrap().all(|e| e.unwrap().file_name() == ".git"));
    }
}
