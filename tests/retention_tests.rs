//! Tests for the retention closure algorithm against constructed
//! manifests, independent of any on-disk store.

use snapvault::error::VaultError;
use snapvault::generation::{BackupGeneration, GenerationKind, Manifest};
use snapvault::retention::{RetentionRule, retained_closure};

const NANOS_PER_DAY: u128 = 86_400 * 1_000_000_000;

fn generation(id: &str, parent: Option<&str>, root: &str, age_days: u128, now: u128) -> BackupGeneration {
    BackupGeneration {
        id: id.to_string(),
        kind: match parent {
            Some(parent) => GenerationKind::Incremental {
                parent: parent.to_string(),
            },
            None => GenerationKind::Full,
        },
        root: root.to_string(),
        created_at_nanos: now - age_days * NANOS_PER_DAY,
        files: Vec::new(),
    }
}

fn manifest(generations: Vec<BackupGeneration>) -> Manifest {
    let mut manifest = Manifest::new();
    for generation in generations {
        manifest.push(generation);
    }
    manifest
}

const NOW: u128 = 1_000 * NANOS_PER_DAY;

fn rule(keep_count: usize, keep_days: u64) -> RetentionRule {
    RetentionRule {
        keep_count,
        keep_days,
    }
}

#[test]
fn test_empty_manifest_has_empty_closure() {
    let closure = retained_closure(&Manifest::new(), rule(10, 30), NOW).unwrap();
    assert!(closure.is_empty());
}

#[test]
fn test_keep_count_retains_newest_per_root() {
    let m = manifest(vec![
        generation("g1", None, "/a", 90, NOW),
        generation("g2", None, "/a", 80, NOW),
        generation("g3", None, "/a", 70, NOW),
    ]);
    let closure = retained_closure(&m, rule(2, 0), NOW).unwrap();

    assert!(!closure.contains("g1"));
    assert!(closure.contains("g2"));
    assert!(closure.contains("g3"));
}

#[test]
fn test_age_window_retains_recent_generations() {
    let m = manifest(vec![
        generation("old", None, "/a", 90, NOW),
        generation("aging", None, "/a", 31, NOW),
        generation("fresh", None, "/a", 5, NOW),
    ]);
    let closure = retained_closure(&m, rule(1, 30), NOW).unwrap();

    // "fresh" is inside the window and also the newest; "aging" and "old"
    // are outside both protections.
    assert!(closure.contains("fresh"));
    assert!(!closure.contains("aging"));
    assert!(!closure.contains("old"));
}

#[test]
fn test_closure_pulls_in_every_ancestor_of_a_retained_tip() {
    let m = manifest(vec![
        generation("full", None, "/a", 90, NOW),
        generation("mid", Some("full"), "/a", 60, NOW),
        generation("tip", Some("mid"), "/a", 1, NOW),
    ]);
    let closure = retained_closure(&m, rule(1, 7), NOW).unwrap();

    // Only "tip" qualifies directly, but its whole chain is protected.
    assert_eq!(closure.len(), 3);
    assert!(closure.contains("full"));
    assert!(closure.contains("mid"));
    assert!(closure.contains("tip"));
}

#[test]
fn test_unretained_side_branch_is_not_protected() {
    let m = manifest(vec![
        generation("full", None, "/a", 90, NOW),
        generation("abandoned", Some("full"), "/a", 89, NOW),
        generation("tip", Some("full"), "/a", 1, NOW),
    ]);
    let closure = retained_closure(&m, rule(1, 7), NOW).unwrap();

    // The shared full survives through the retained tip; the stale
    // sibling branch does not.
    assert!(closure.contains("full"));
    assert!(closure.contains("tip"));
    assert!(!closure.contains("abandoned"));
}

#[test]
fn test_roots_are_retained_independently() {
    let m = manifest(vec![
        generation("a1", None, "/a", 90, NOW),
        generation("a2", None, "/a", 80, NOW),
        generation("b1", None, "/b", 85, NOW),
    ]);
    let closure = retained_closure(&m, rule(1, 0), NOW).unwrap();

    // keep_count applies per root: /b's only generation survives even
    // though both /a generations are newer than it.
    assert!(closure.contains("a2"));
    assert!(closure.contains("b1"));
    assert!(!closure.contains("a1"));
}

#[test]
fn test_broken_retained_chain_aborts_the_computation() {
    let m = manifest(vec![generation("tip", Some("vanished"), "/a", 1, NOW)]);
    let err = retained_closure(&m, rule(1, 30), NOW).unwrap_err();
    assert!(matches!(err, VaultError::ChainResolution { .. }));
}

#[test]
fn test_zero_thresholds_retain_nothing() {
    let m = manifest(vec![
        generation("g1", None, "/a", 90, NOW),
        generation("g2", None, "/a", 80, NOW),
    ]);
    let closure = retained_closure(&m, rule(0, 0), NOW).unwrap();
    assert!(closure.is_empty());
}
