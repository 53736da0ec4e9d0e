//! Property-based testing for Turnback
//!
//! Uses proptest to check the pointer naming scheme and the index rebuild
//! against arbitrary session ids, entry ids and listing orders.

use ::turnback::checkpoint::{escape_component, session_prefix, unescape_component};
use ::turnback::*;
use proptest::prelude::*;
use std::process::Command;

const NS: &str = "refs/turnback";

/// Identifiers as hosts produce them, plus the awkward ones
fn id_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z0-9-]{1,16}",
        "[A-Za-z0-9 ./_:~^?*\\[\\]@{}-]{0,24}",
        any::<String>(),
    ]
}

fn kind_strategy() -> impl Strategy<Value = PointerKind> {
    prop_oneof![
        Just(PointerKind::Checkpoint),
        Just(PointerKind::BeforeRestore),
        Just(PointerKind::Resume),
        Just(PointerKind::Recovery),
    ]
}

fn pointer_strategy() -> impl Strategy<Value = PointerName> {
    (kind_strategy(), id_strategy(), 0u64..10_000_000_000_000, id_strategy()).prop_map(
        |(kind, session, ts, entry)| match kind {
            PointerKind::Checkpoint => PointerName::checkpoint(&session, ts, &entry),
            PointerKind::BeforeRestore => PointerName::before_restore(&session, ts),
            PointerKind::Resume => PointerName::resume(&session, ts),
            PointerKind::Recovery => PointerName::recovery(&session, ts),
        },
    )
}

/// Checkpoint refs for a handful of sessions, with repeated entry ids
fn listing_strategy() -> impl Strategy<Value = Vec<CheckpointRef>> {
    prop::collection::vec(
        (
            prop::sample::select(vec!["s1", "s2", "s1/sub"]),
            0u64..50,
            prop::sample::select(vec!["e1", "e2", "e3", "e4"]),
            any::<bool>(),
        ),
        0..24,
    )
    .prop_map(|specs| {
        specs
            .into_iter()
            .enumerate()
            .map(|(i, (session, ts, entry, legacy))| {
                let pointer = if legacy {
                    PointerName::legacy_checkpoint(ts, entry)
                } else {
                    PointerName::checkpoint(session, ts, entry)
                };
                CheckpointRef {
                    name: pointer.encode(NS),
                    pointer,
                    snapshot: SnapshotId::new(format!("{:040x}", i)),
                }
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn prop_escape_is_injective(a in id_strategy(), b in id_strategy()) {
        prop_assume!(a != b);
        prop_assert_ne!(escape_component(&a), escape_component(&b));
    }

    #[test]
    fn prop_escape_is_ref_safe_and_reversible(raw in id_strategy()) {
        let escaped = escape_component(&raw);
        prop_assert!(!escaped.is_empty());
        prop_assert!(escaped.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_'));
        prop_assert_eq!(unescape_component(&escaped), Some(raw));
    }

    #[test]
    fn prop_names_decode_to_themselves(pointer in pointer_strategy()) {
        let encoded = pointer.encode(NS);
        prop_assert!(encoded.starts_with("refs/turnback/v1/"));
        prop_assert_eq!(PointerName::decode(NS, &encoded), Some(pointer));
    }

    #[test]
    fn prop_sessions_never_share_prefixes(a in id_strategy(), b in id_strategy()) {
        prop_assume!(a != b);
        let name = PointerName::resume(&a, 1).encode(NS);
        let other_prefix = format!("{}/", session_prefix(NS, &b));
        prop_assert!(!name.starts_with(&other_prefix));
    }

    #[test]
    fn prop_index_ignores_listing_order(
        (refs, shuffled) in listing_strategy().prop_flat_map(|refs| {
            let shuffled = Just(refs.clone()).prop_shuffle();
            (Just(refs), shuffled)
        })
    ) {
        let a = CheckpointIndex::from_refs("s1", &refs);
        let b = CheckpointIndex::from_refs("s1", &shuffled);
        prop_assert_eq!(&a, &b);

        // Every entry maps to the newest eligible pointer for it
        for (entry, pointer) in a.iter() {
            let newest = refs
                .iter()
                .filter(|r| r.pointer.entry_id.as_deref() == Some(entry))
                .filter(|r| r.pointer.session.is_none() || r.pointer.is_owned_by("s1"))
                .max_by(|x, y| CheckpointRef::oldest_first(x, y))
                .map(|r| r.name.as_str());
            prop_assert_eq!(Some(pointer), newest);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_encoded_names_are_valid_refs(pointer in pointer_strategy()) {
        let encoded = pointer.encode(NS);
        let status = Command::new("git")
            .args(["check-ref-format", &encoded])
            .status()
            .unwrap();
        prop_assert!(status.success(), "rejected: {}", encoded);
    }
}
