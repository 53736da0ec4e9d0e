//! Shared fixtures for unit tests

use crate::host::{ConversationEntry, ConversationHost, Prompter};
use crate::types::NotifyLevel;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

/// Fresh repository with no commits
pub fn git_repo() -> TempDir {
    let dir = TempDir::new().unwrap();
    let status = Command::new("git")
        .args(["init", "-q"])
        .current_dir(dir.path())
        .status()
        .unwrap();
    assert!(status.success(), "git init failed");
    dir
}

/// Write `content` to `rel`, creating parent directories
pub fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

/// Read `rel` as UTF-8
pub fn read(root: &Path, rel: &str) -> String {
    fs::read_to_string(root.join(rel)).unwrap()
}

/// Host whose branch can be extended from a test
pub struct FakeHost {
    session: String,
    entries: RefCell<Vec<ConversationEntry>>,
}

impl FakeHost {
    pub fn new(session: &str) -> Self {
        Self {
            session: session.to_string(),
            entries: RefCell::new(Vec::new()),
        }
    }

    pub fn push_user(&self, id: &str) {
        self.entries.borrow_mut().push(ConversationEntry::user(id));
    }
}

impl ConversationHost for FakeHost {
    fn session_id(&self) -> String {
        self.session.clone()
    }

    fn current_branch_entries(&self) -> Vec<ConversationEntry> {
        self.entries.borrow().clone()
    }
}

/// Prompter that replays canned menu answers and records everything shown
#[derive(Default)]
pub struct ScriptedPrompter {
    answers: RefCell<VecDeque<Option<usize>>>,
    menus: RefCell<Vec<Vec<String>>>,
    notes: RefCell<Vec<(String, NotifyLevel)>>,
    status: RefCell<Option<String>>,
}

impl ScriptedPrompter {
    pub fn answering(answers: impl IntoIterator<Item = Option<usize>>) -> Self {
        Self {
            answers: RefCell::new(answers.into_iter().collect()),
            ..Default::default()
        }
    }

    pub fn menus(&self) -> Vec<Vec<String>> {
        self.menus.borrow().clone()
    }

    pub fn notes(&self) -> Vec<(String, NotifyLevel)> {
        self.notes.borrow().clone()
    }

    pub fn last_status(&self) -> Option<String> {
        self.status.borrow().clone()
    }
}

impl Prompter for ScriptedPrompter {
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
