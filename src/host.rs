//! Host integration boundary
//!
//! Turnback is driven by a conversation host it does not own. The host
//! provides:
//!
//! - a [`ConversationHost`] to read the session id and the current branch
//! - a [`Prompter`] for menus, notifications and the status line
//! - a stream of [`HostEvent`]s from its lifecycle callbacks
//!
//! Events arriving as loosely-typed JSON are validated once, here, by
//! [`HostEvent::from_json`]; everything past this boundary works with the
//! typed variants only.

use crate::error::{Result, TurnbackError};
use crate::types::NotifyLevel;
use serde::{Deserialize, Serialize};

/// Who authored a conversation entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EntryRole {
    /// A user message; checkpoints bind to these
    User,
    /// A model response
    Assistant,
    /// Tool call or result
    Tool,
    /// Anything else the host records
    Other,
}

impl From<String> for EntryRole {
    fn from(role: String) -> Self {
        match role.as_str() {
            "user" => EntryRole::User,
            "assistant" => EntryRole::Assistant,
            "tool" | "tool_result" => EntryRole::Tool,
            _ => EntryRole::Other,
        }
    }
}

impl From<EntryRole> for String {
    fn from(role: EntryRole) -> Self {
        match role {
            EntryRole::User => "user",
            EntryRole::Assistant => "assistant",
            EntryRole::Tool => "tool",
            EntryRole::Other => "other",
        }
        .to_string()
    }
}

/// One node on the current conversation branch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationEntry {
    /// Host-assigned identifier
    pub id: String,
    /// Author
    pub role: EntryRole,
}

impl ConversationEntry {
    /// Convenience constructor for a user entry
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: EntryRole::User,
        }
    }

    /// Convenience constructor for an assistant entry
    pub fn assistant(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: EntryRole::Assistant,
        }
    }
}

/// Read access to the host's conversation state
pub trait ConversationHost {
    /// Stable identifier of the live session
    fn session_id(&self) -> String;

    /// Entries of the current branch, root first
    fn current_branch_entries(&self) -> Vec<ConversationEntry>;

    /// Most recent user-authored entry on the current branch
    fn last_user_entry(&self) -> Option<ConversationEntry> {
        self.current_branch_entries()
            .into_iter()
            .rev()
            .find(|e| e.role == EntryRole::User)
    }
}

/// Interactive surface offered by the host
pub trait Prompter {
    /// Whether a human can answer prompts
    fn has_ui(&self) -> bool {
        true
    }

    /// Ask the user to pick one of `options`; `None` means dismissed
    fn choose(&self, title: &str, options: &[String]) -> Option<usize>;

    /// Show a transient message
    fn notify(&self, message: &str, level: NotifyLevel);

    /// Set or clear a keyed status line
    fn set_status(&self, key: &str, text: Option<&str>);
}

/// [`Prompter`] for headless hosts: never prompts, drops messages
#[derive(Debug, Clone, Copy, Default)]
pub struct Headless;

impl Prompter for Headless {
    fn has_ui(&self) -> bool {
        false
    }

    fn choose(&self, _title: &str, _options: &[String]) -> Option<usize> {
        None
    }

    fn notify(&self, _message: &str, _level: NotifyLevel) {}

    fn set_status(&self, _key: &str, _text: Option<&str>) {}
}

/// Lifecycle events delivered by the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostEvent {
    /// A session started (fresh or resumed)
    SessionStart,
    /// The host switched to another session
    SessionSwitch,
    /// An agent sub-turn is starting; index 0 is the first after a user message
    TurnStart {
        /// Sub-turn index within the current user message
        turn_index: u32,
    },
    /// An agent sub-turn finished
    TurnEnd {
        /// Sub-turn index within the current user message
        turn_index: u32,
        /// Host clock in milliseconds since the Unix epoch
        timestamp: u64,
    },
    /// The user is about to fork from `entry_id`
    BeforeFork {
        /// Entry the fork is rooted at
        entry_id: String,
    },
    /// The user is about to jump to `target_entry_id`
    BeforeJump {
        /// Destination entry
        target_entry_id: String,
    },
    /// Another collaborator asks for the next fork to leave files alone
    ForceConversationOnlyFork {
        /// Who asked, for diagnostics
        source: String,
    },
}

impl HostEvent {
    /// Parse and validate a JSON event payload
    pub fn from_json(payload: &str) -> Result<Self> {
        let event: HostEvent = serde_json::from_str(payload)
            .map_err(|e| TurnbackError::InvalidEvent(e.to_string()))?;
        event.validate()?;
        Ok(event)
    }

    /// Parse and validate an already-decoded JSON value
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let event: HostEvent = serde_json::from_value(value)
            .map_err(|e| TurnbackError::InvalidEvent(e.to_string()))?;
        event.validate()?;
        Ok(event)
    }

    /// Check field contents that the type system does not
    pub fn validate(&self) -> Result<()> {
        let empty = |field: &str| -> Result<()> {
            Err(TurnbackError::InvalidEvent(format!("{} must not be empty", field)))
        };
        match self {
            HostEvent::BeforeFork { entry_id } if entry_id.trim().is_empty() => empty("entry_id"),
            HostEvent::BeforeJump { target_entry_id } if target_entry_id.trim().is_empty() => {
                empty("target_entry_id")
            }
            HostEvent::ForceConversationOnlyFork { source } if source.trim().is_empty() => empty("source"),
            _ => Ok(()),
        }
    }

    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            HostEvent::SessionStart => "session_start",
            HostEvent::SessionSwitch => "session_switch",
            HostEvent::TurnStart { .. } => "turn_start",
            HostEvent::TurnEnd { .. } => "turn_end",
            HostEvent::BeforeFork { .. } => "before_fork",
            HostEvent::BeforeJump { .. } => "before_jump",
            HostEvent::ForceConversationOnlyFork { .. } => "force_conversation_only_fork",
        }
    }
}

/// What the host should do after an event handler returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookOutcome {
    /// Proceed normally
    Continue,
    /// Abort the pending fork or jump
    Cancel,
    /// Proceed with the fork, but do not roll the conversation back
    SkipConversationRestore,
}
