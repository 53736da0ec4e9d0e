//! Checkpoint pointer names
//!
//! A checkpoint pointer is a git ref that points at one snapshot. Everything
//! Turnback knows about a pointer (its kind, owning session, creation time and
//! bound conversation entry) is encoded in the ref name itself, so the index
//! can always be rebuilt from `git for-each-ref` alone.
//!
//! ## Layout
//!
//! ```text
//! <namespace>/v1/<session>/checkpoint/<ts_ms>/<entry>
//! <namespace>/v1/<session>/before-restore/<ts_ms>
//! <namespace>/v1/<session>/resume/<ts_ms>
//! ```
//!
//! `<session>` and `<entry>` pass through [`escape_component`], an injective
//! transform onto `[A-Za-z0-9_-]`, so any identifier yields a valid ref
//! component and decodes back to the exact original. `<ts_ms>` is milliseconds
//! since the Unix epoch, zero-padded to 13 digits.
//!
//! Older pointers written without a session use a flat, read-only layout:
//!
//! ```text
//! <namespace>/checkpoint-<ts_ms>-<entry>
//! <namespace>/before-restore-<ts_ms>
//! <namespace>/resume-<ts_ms>
//! ```
//!
//! ## Examples
//!
//! ```rust
//! use turnback::checkpoint::{PointerKind, PointerName};
//!
//! let name = PointerName::checkpoint("session-1", 1_700_000_000_000, "msg/42");
//! let encoded = name.encode("refs/turnback");
//! assert_eq!(
//!     encoded,
//!     "refs/turnback/v1/session-1/checkpoint/1700000000000/msg_2f42"
//! );
//!
//! let decoded = PointerName::decode("refs/turnback", &encoded).unwrap();
//! assert_eq!(decoded.kind, PointerKind::Checkpoint);
//! assert_eq!(decoded.entry_id.as_deref(), Some("msg/42"));
//! ```

use crate::types::SnapshotId;
use chrono::{DateTime, TimeZone, Utc};
use std::cmp::Ordering;
use std::fmt;

/// Version segment of the current naming scheme
pub const NAME_VERSION: &str = "v1";

const TIMESTAMP_WIDTH: usize = 13;

/// What a pointer is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PointerKind {
    /// Ordinary checkpoint bound to a conversation entry
    Checkpoint,
    /// Single-slot undo backup taken before a restore
    BeforeRestore,
    /// Fallback snapshot taken when a session starts
    Resume,
    /// Single-slot copy of the state an undo replaced
    Recovery,
}

impl PointerKind {
    /// Name segment for this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            PointerKind::Checkpoint => "checkpoint",
            PointerKind::BeforeRestore => "before-restore",
            PointerKind::Resume => "resume",
            PointerKind::Recovery => "recovery",
        }
    }

    fn parse(segment: &str) -> Option<Self> {
        match segment {
            "checkpoint" => Some(PointerKind::Checkpoint),
            "before-restore" => Some(PointerKind::BeforeRestore),
            "resume" => Some(PointerKind::Resume),
            "recovery" => Some(PointerKind::Recovery),
            _ => None,
        }
    }
}

impl fmt::Display for PointerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which naming scheme a pointer was written with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NameFormat {
    /// Current session-scoped scheme
    V1,
    /// Session-less flat scheme, read-only
    Legacy,
}

/// Structured form of a pointer name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PointerName {
    /// Pointer kind
    pub kind: PointerKind,
    /// Owning session; `None` only for legacy pointers
    pub session: Option<String>,
    /// Creation time in milliseconds since the Unix epoch
    pub timestamp_ms: u64,
    /// Bound conversation entry; present for checkpoints only
    pub entry_id: Option<String>,
    /// Scheme the name was written with
    pub format: NameFormat,
}

impl PointerName {
    /// Ordinary checkpoint for `entry_id`
    pub fn checkpoint(session: &str, timestamp_ms: u64, entry_id: &str) -> Self {
        Self {
            kind: PointerKind::Checkpoint,
            session: Some(session.to_string()),
            timestamp_ms,
            entry_id: Some(entry_id.to_string()),
            format: NameFormat::V1,
        }
    }

    /// Before-restore backup
    pub fn before_restore(session: &str, timestamp_ms: u64) -> Self {
        Self {
            kind: PointerKind::BeforeRestore,
            session: Some(session.to_string()),
            timestamp_ms,
            entry_id: None,
            format: NameFormat::V1,
        }
    }

    /// Resume checkpoint
    pub fn resume(session: &str, timestamp_ms: u64) -> Self {
        Self {
            kind: PointerKind::Resume,
            session: Some(session.to_string()),
            timestamp_ms,
            entry_id: None,
            format: NameFormat::V1,
        }
    }

    /// Recovery point written by an undo
    pub fn recovery(session: &str, timestamp_ms: u64) -> Self {
        Self {
            kind: PointerKind::Recovery,
            session: Some(session.to_string()),
            timestamp_ms,
            entry_id: None,
            format: NameFormat::V1,
        }
    }

    /// Legacy session-less checkpoint, as older releases wrote them
    pub fn legacy_checkpoint(timestamp_ms: u64, entry_id: &str) -> Self {
        Self {
            kind: PointerKind::Checkpoint,
            session: None,
            timestamp_ms,
            entry_id: Some(entry_id.to_string()),
            format: NameFormat::Legacy,
        }
    }

    /// Full ref name under `namespace`
    pub fn encode(&self, namespace: &str) -> String {
        let namespace = namespace.trim_end_matches('/');
        match self.format {
            NameFormat::V1 => {
                let session = escape_component(self.session.as_deref().unwrap_or_default());
                let mut name = format!(
                    "{}/{}/{}/{}/{:0width$}",
                    namespace,
                    NAME_VERSION,
                    session,
                    self.kind.as_str(),
                    self.timestamp_ms,
                    width = TIMESTAMP_WIDTH
                );
                if self.kind == PointerKind::Checkpoint {
                    name.push('/');
                    name.push_str(&escape_component(self.entry_id.as_deref().unwrap_or_default()));
                }
                name
            }
            NameFormat::Legacy => match self.kind {
                PointerKind::Checkpoint => format!(
                    "{}/checkpoint-{}-{}",
                    namespace,
                    self.timestamp_ms,
                    self.entry_id.as_deref().unwrap_or_default()
                ),
                kind => format!("{}/{}-{}", namespace, kind.as_str(), self.timestamp_ms),
            },
        }
    }

    /// Parse a full ref name; `None` if it is not a Turnback pointer
    pub fn decode(namespace: &str, refname: &str) -> Option<Self> {
        let namespace = namespace.trim_end_matches('/');
        let rest = refname.strip_prefix(namespace)?.strip_prefix('/')?;

        match rest.strip_prefix(NAME_VERSION).and_then(|r| r.strip_prefix('/')) {
            Some(v1) => Self::decode_v1(v1),
            None => Self::decode_legacy(rest),
        }
    }

    fn decode_v1(rest: &str) -> Option<Self> {
        let parts: Vec<&str> = rest.split('/').collect();
        let (session, kind, timestamp, entry) = match parts.as_slice() {
            [session, kind, ts] => (*session, PointerKind::parse(kind)?, *ts, None),
            [session, kind, ts, entry] => (*session, PointerKind::parse(kind)?, *ts, Some(*entry)),
            _ => return None,
        };

        // Only checkpoints carry an entry segment
        if (kind == PointerKind::Checkpoint) != entry.is_some() {
            return None;
        }

        Some(Self {
            kind,
            session: Some(unescape_component(session)?),
            timestamp_ms: parse_timestamp(timestamp)?,
            entry_id: match entry {
                Some(entry) => Some(unescape_component(entry)?),
                None => None,
            },
            format: NameFormat::V1,
        })
    }

    fn decode_legacy(rest: &str) -> Option<Self> {
        if rest.contains('/') {
            return None;
        }

        if let Some(body) = rest.strip_prefix("checkpoint-") {
            let (timestamp, entry) = body.split_once('-')?;
            if entry.is_empty() {
                return None;
            }
            return Some(Self::legacy_checkpoint(parse_timestamp(timestamp)?, entry));
        }

        let (kind, body) = if let Some(body) = rest.strip_prefix("before-restore-") {
            (PointerKind::BeforeRestore, body)
        } else if let Some(body) = rest.strip_prefix("resume-") {
            (PointerKind::Resume, body)
        } else {
            return None;
        };

        // Some older builds put extra segments before the timestamp
        let timestamp = body.rsplit('-').next().and_then(parse_timestamp).unwrap_or(0);
        Some(Self {
            kind,
            session: None,
            timestamp_ms: timestamp,
            entry_id: None,
            format: NameFormat::Legacy,
        })
    }

    /// Whether this pointer belongs to `session` under the current scheme
    pub fn is_owned_by(&self, session: &str) -> bool {
        self.format == NameFormat::V1 && self.session.as_deref() == Some(session)
    }

    /// Creation time
    pub fn created_at(&self) -> DateTime<Utc> {
        i64::try_from(self.timestamp_ms)
            .ok()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_default()
    }
}

/// Ref prefix holding every v1 pointer of `session`
pub fn session_prefix(namespace: &str, session: &str) -> String {
    format!(
        "{}/{}/{}",
        namespace.trim_end_matches('/'),
        NAME_VERSION,
        escape_component(session)
    )
}

/// Ref prefix holding the v1 pointers of one kind for `session`
pub fn kind_prefix(namespace: &str, session: &str, kind: PointerKind) -> String {
    format!("{}/{}", session_prefix(namespace, session), kind.as_str())
}

/// A listed pointer: its ref name, parsed form, and target snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointRef {
    /// Full ref name
    pub name: String,
    /// Parsed name
    pub pointer: PointerName,
    /// Snapshot the ref points at
    pub snapshot: SnapshotId,
}

impl CheckpointRef {
    /// Total order used for every "newest first" listing
    ///
    /// Newer timestamps first; on ties the v1 scheme beats legacy; remaining
    /// ties fall back to the ref name so the order never depends on how the
    /// refs were listed.
    pub fn newest_first(a: &CheckpointRef, b: &CheckpointRef) -> Ordering {
        b.pointer
            .timestamp_ms
            .cmp(&a.pointer.timestamp_ms)
            .then_with(|| format_rank(a.pointer.format).cmp(&format_rank(b.pointer.format)))
            .then_with(|| a.name.cmp(&b.name))
    }

    /// Reverse of [`CheckpointRef::newest_first`]
    pub fn oldest_first(a: &CheckpointRef, b: &CheckpointRef) -> Ordering {
        Self::newest_first(b, a)
    }
}

fn format_rank(format: NameFormat) -> u8 {
    match format {
        NameFormat::V1 => 0,
        NameFormat::Legacy => 1,
    }
}

fn parse_timestamp(segment: &str) -> Option<u64> {
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    segment.parse().ok()
}

/// Escape an identifier into a single safe ref component
///
/// ASCII letters, digits and `-` pass through. Every other byte of the UTF-8
/// encoding becomes `_` followed by two lowercase hex digits. The empty string
/// maps to a lone `_`, which no non-empty input can produce.
pub fn escape_component(raw: &str) -> String {
    if raw.is_empty() {
        return "_".to_string();
    }
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("_{:02x}", byte));
        }
    }
    out
}

/// Inverse of [`escape_component`]; `None` for malformed input
pub fn unescape_component(escaped: &str) -> Option<String> {
    if escaped == "_" {
        return Some(String::new());
    }
    if escaped.is_empty() {
        return None;
    }

    let bytes = escaped.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => {
                let hex = escaped.get(i + 1..i + 3)?;
                if !hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
                    return None;
                }
                let byte = u8::from_str_radix(hex, 16).ok()?;
                // Reject non-canonical escapes of pass-through bytes
                if byte.is_ascii_alphanumeric() || byte == b'-' {
                    return None;
                }
                out.push(byte);
                i += 3;
            }
            b if b.is_ascii_alphanumeric() || b == b'-' => {
                out.push(b);
                i += 1;
            }
            _ => return None,
        }
    }
    String::from_utf8(out).ok()
}
