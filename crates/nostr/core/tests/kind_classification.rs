//! Boundary table for kind classification.
//!
//! Every range edge is checked on both sides, then the whole u16 space is
//! swept against the range table so no kind is left unclassified.

use nostr::{KindClass, KindClassification, classify_kind, classify_kind_nip01};
use pretty_assertions::assert_eq;

const BOUNDARIES: &[(u16, KindClass)] = &[
    (0, KindClass::ReplaceableOrAddressable),
    (1, KindClass::Regular),
    (2, KindClass::Regular),
    (3, KindClass::ReplaceableOrAddressable),
    (4, KindClass::Regular),
    (44, KindClass::Regular),
    (45, KindClass::BroadcastOnly),
    (999, KindClass::BroadcastOnly),
    (1000, KindClass::Regular),
    (9999, KindClass::Regular),
    (10000, KindClass::ReplaceableOrAddressable),
    (19999, KindClass::ReplaceableOrAddressable),
    (20000, KindClass::BroadcastOnly),
    (29999, KindClass::BroadcastOnly),
    (30000, KindClass::ReplaceableOrAddressable),
    (39999, KindClass::ReplaceableOrAddressable),
    (40000, KindClass::BroadcastOnly),
    (u16::MAX, KindClass::BroadcastOnly),
];

fn expected(kind: u16) -> KindClass {
    let regular = kind == 1 || kind == 2 || (4..45).contains(&kind) || (1000..10000).contains(&kind);
    let replaceable = kind == 0 || kind == 3 || (10000..20000).contains(&kind);
    let addressable = (30000..40000).contains(&kind);

    if regular {
        KindClass::Regular
    } else if replaceable || addressable {
        KindClass::ReplaceableOrAddressable
    } else {
        KindClass::BroadcastOnly
    }
}

#[test]
fn boundary_table() {
    for &(kind, class) in BOUNDARIES {
        assert_eq!(classify_kind(kind), class, "kind {}", kind);
    }
}

#[test]
fn every_kind_matches_range_table() {
    for kind in 0..=u16::MAX {
        assert_eq!(classify_kind(kind), expected(kind), "kind {}", kind);
    }
}

#[test]
fn ephemeral_and_unknown_are_never_stored() {
    for kind in (20000..30000).chain(45..1000).chain(40000..=u16::MAX) {
        let nip01 = classify_kind_nip01(kind);
        assert!(matches!(
            nip01,
            KindClassification::Ephemeral | KindClassification::Unknown
        ));
        assert_eq!(classify_kind(kind), KindClass::BroadcastOnly);
    }
}
