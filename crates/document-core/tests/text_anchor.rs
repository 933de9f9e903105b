use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use document_core::{AnchorMovementType, TextAnchor, TextDocument, TextLocation};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[test]
fn test_anchor_in_empty_document() {
    let mut doc = TextDocument::new("");
    let a1 = doc.create_anchor(0).unwrap();
    let a2 = doc.create_anchor(0).unwrap();
    a1.set_movement_type(AnchorMovementType::BeforeInsertion);
    a2.set_movement_type(AnchorMovementType::AfterInsertion);

    assert_eq!(a1.offset(&doc), Ok(0));
    assert_eq!(a2.offset(&doc), Ok(0));
    assert_eq!(a1.location(&doc), Ok(TextLocation::new(1, 1)));

    doc.insert(0, "x").unwrap();
    assert_eq!(a1.offset(&doc), Ok(0));
    assert_eq!(a2.offset(&doc), Ok(1));
    assert_eq!(a2.location(&doc), Ok(TextLocation::new(1, 2)));
}

#[test]
fn test_anchors_survive_deletion() {
    let mut doc = TextDocument::new("1234567890");
    let anchors: Vec<TextAnchor> = (0..=10)
        .map(|offset| {
            let anchor = doc.create_anchor(offset).unwrap();
            anchor.set_survive_deletion(true);
            anchor
        })
        .collect();

    doc.remove(2, 4).unwrap();
    let offsets: Vec<usize> = anchors.iter().map(|a| a.offset(&doc).unwrap()).collect();
    assert_eq!(offsets, vec![0, 1, 2, 2, 2, 2, 2, 3, 4, 5, 6]);
    assert!(anchors.iter().all(|a| !a.is_deleted()));
}

#[test]
fn test_remove_text_deletes_inner_anchors() {
    let mut doc = TextDocument::new("1234567890");
    let anchors: Vec<TextAnchor> = (0..=10).map(|o| doc.create_anchor(o).unwrap()).collect();

    doc.remove(2, 4).unwrap();
    let deleted: Vec<bool> = anchors.iter().map(TextAnchor::is_deleted).collect();
    assert_eq!(
        deleted,
        vec![false, false, false, true, true, true, false, false, false, false, false]
    );
    for (i, anchor) in anchors.iter().enumerate() {
        if !anchor.is_deleted() {
            let expected = if i <= 2 { i } else { i - 4 };
            assert_eq!(anchor.offset(&doc), Ok(expected));
        }
    }
}

#[test]
fn test_deleted_callback_runs_after_change() {
    let mut doc = TextDocument::new("abcdef");
    let anchor = doc.create_anchor(3).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    anchor.on_deleted(move |a| {
        assert!(a.is_deleted());
        seen.fetch_add(1, Ordering::SeqCst);
    });

    doc.insert(0, "x").unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    doc.remove(2, 4).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(anchor.is_deleted());

    // Deleted anchors stay deleted, and the callback does not run again.
    doc.insert(0, "more").unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_anchor_follows_line_changes() {
    let mut doc = TextDocument::new("first\nsecond\nthird");
    let anchor = doc.create_anchor(9).unwrap();
    assert_eq!(anchor.location(&doc), Ok(TextLocation::new(2, 4)));
    let line = anchor.line(&doc).unwrap();
    assert_eq!(doc.line(line).unwrap().line_number(), 2);

    doc.insert(0, "zeroth\n").unwrap();
    assert_eq!(anchor.location(&doc), Ok(TextLocation::new(3, 4)));

    doc.remove(6, 7).unwrap();
    assert_eq!(&*doc.text().unwrap(), "zerothsecond\nthird");
    assert_eq!(anchor.location(&doc), Ok(TextLocation::new(1, 10)));
}

#[test]
fn test_many_anchors_at_same_offset() {
    let mut doc = TextDocument::new("ab");
    let before: Vec<TextAnchor> = (0..20)
        .map(|_| {
            let a = doc.create_anchor(1).unwrap();
            a.set_movement_type(AnchorMovementType::BeforeInsertion);
            a
        })
        .collect();
    let after: Vec<TextAnchor> = (0..20)
        .map(|_| {
            let a = doc.create_anchor(1).unwrap();
            a.set_movement_type(AnchorMovementType::AfterInsertion);
            a
        })
        .collect();

    doc.insert(1, "xyz").unwrap();
    assert!(before.iter().all(|a| a.offset(&doc) == Ok(1)));
    assert!(after.iter().all(|a| a.offset(&doc) == Ok(4)));
}

#[test]
fn test_insert_with_movement_overrides_default_anchors() {
    let mut doc = TextDocument::new("ab");
    let default = doc.create_anchor(1).unwrap();
    let after = doc.create_anchor(1).unwrap();
    after.set_movement_type(AnchorMovementType::AfterInsertion);

    doc.insert_with_movement(1, "--", AnchorMovementType::BeforeInsertion)
        .unwrap();
    assert_eq!(default.offset(&doc), Ok(1));
    assert_eq!(after.offset(&doc), Ok(3));

    doc.insert_with_movement(1, "++", AnchorMovementType::AfterInsertion)
        .unwrap();
    assert_eq!(default.offset(&doc), Ok(3));
}

#[test]
fn test_dropped_anchors_are_purged_by_edits() {
    let mut doc = TextDocument::new("0123456789");
    // Appending in offset order does not walk over earlier nodes, so nothing is purged yet.
    for offset in 0..6 {
        drop(doc.create_anchor(offset).unwrap());
    }
    let keep = doc.create_anchor(6).unwrap();
    assert_eq!(doc.anchor_node_count(), 7);

    doc.remove(0, 6).unwrap();
    assert_eq!(keep.offset(&doc), Ok(0));
    assert!(!keep.is_deleted());

    doc.insert(0, "x").unwrap();
    assert_eq!(doc.anchor_node_count(), 1);
    assert_eq!(keep.offset(&doc), Ok(1));
}

#[test]
fn test_creating_anchor_purges_dropped_anchors_on_its_path() {
    let mut doc = TextDocument::new("0123456789");
    for offset in 0..6 {
        drop(doc.create_anchor(offset).unwrap());
    }
    assert_eq!(doc.anchor_node_count(), 6);

    // The lookup for offset 0 descends through dropped nodes and removes them.
    let first = doc.create_anchor(0).unwrap();
    assert!(doc.anchor_node_count() < 7);
    assert_eq!(first.offset(&doc), Ok(0));
    let last = doc.create_anchor(10).unwrap();
    assert_eq!(last.offset(&doc), Ok(10));
}

#[test]
fn test_random_edits_match_naive_offsets() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut doc = TextDocument::new(&"abcdefghij".repeat(10));
    let mut anchors: Vec<(TextAnchor, usize, AnchorMovementType)> = Vec::new();

    for _ in 0..500 {
        let length = doc.text_length();
        match rng.gen_range(0..4) {
            0 => {
                let offset = rng.gen_range(0..=length);
                let movement = if rng.gen_bool(0.5) {
                    AnchorMovementType::BeforeInsertion
                } else {
                    AnchorMovementType::AfterInsertion
                };
                let anchor = doc.create_anchor(offset).unwrap();
                anchor.set_movement_type(movement);
                anchors.push((anchor, offset, movement));
            }
            1 => {
                let offset = rng.gen_range(0..=length);
                let count = rng.gen_range(1..6);
                doc.insert(offset, &"z".repeat(count)).unwrap();
                for (_, expected, movement) in &mut anchors {
                    if *expected > offset
                        || (*expected == offset && *movement == AnchorMovementType::AfterInsertion)
                    {
                        *expected += count;
                    }
                }
            }
            _ => {
                if length == 0 {
                    continue;
                }
                let offset = rng.gen_range(0..length);
                let count = rng.gen_range(1..=(length - offset).min(8));
                doc.remove(offset, count).unwrap();
                anchors.retain(|(anchor, expected, _)| {
                    let inside = *expected > offset && *expected < offset + count;
                    assert_eq!(anchor.is_deleted(), inside);
                    !inside
                });
                for (_, expected, _) in &mut anchors {
                    if *expected >= offset + count {
                        *expected -= count;
                    }
                }
            }
        }
        for (anchor, expected, _) in &anchors {
            assert_eq!(anchor.offset(&doc), Ok(*expected));
        }
    }
}
