//! Pure fingerprint diffing.
//!
//! The diff is the decision half of an incremental backup, separated from
//! the copy/persist side effects so it can be tested deterministically
//! without a filesystem: given the parent's resolved state and a fresh scan,
//! decide which files to copy and which to tombstone.

use std::collections::BTreeMap;

use crate::generation::{FileFingerprint, FileRecord};

/// The record plan for one incremental generation.
///
/// `to_copy` holds changed and newly added files, `tombstones` the files
/// present in the parent state but absent from the scan. Unchanged files
/// appear in neither list; an incremental generation never restates them.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DiffPlan {
    /// Paths whose content must be copied, with their scanned fingerprints.
    pub to_copy: Vec<(String, FileFingerprint)>,
    /// Paths removed since the parent state.
    pub tombstones: Vec<String>,
    /// Files left out because their digest is unchanged.
    pub unchanged: usize,
}

impl DiffPlan {
    /// True when the scan matches the parent state exactly.
    pub fn is_empty(&self) -> bool {
        self.to_copy.is_empty() && self.tombstones.is_empty()
    }
}

/// Diffs a fresh scan against the parent's resolved file state.
///
/// Equality is digest equality; the size comparison is only a short-circuit
/// that proves a change without touching the digest. Both inputs are sorted
/// maps, so the plan comes out sorted by path.
pub fn diff_states(
    parent: &BTreeMap<&str, &FileRecord>,
    scanned: &BTreeMap<String, FileFingerprint>,
) -> DiffPlan {
    let mut plan = DiffPlan::default();

    for (path, fingerprint) in scanned {
        match parent.get(path.as_str()) {
            Some(previous)
                if previous.fingerprint.size == fingerprint.size
                    && previous.fingerprint.digest == fingerprint.digest =>
            {
                plan.unchanged += 1;
            }
            _ => plan.to_copy.push((path.clone(), fingerprint.clone())),
        }
    }

    for path in parent.keys() {
        if !scanned.contains_key(*path) {
            plan.tombstones.push((*path).to_string());
        }
    }

    plan
}

/// Path-level difference between two resolved file states.
///
/// Unlike a [`DiffPlan`], which drives a copy, this is a pure report for
/// the user: which files changed between two points in history.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct StateComparison {
    /// Paths present only in the target state.
    pub added: Vec<String>,
    /// Paths present only in the base state.
    pub removed: Vec<String>,
    /// Paths present in both states with differing digests.
    pub modified: Vec<String>,
    /// Paths identical in both states.
    pub unchanged: usize,
}

impl StateComparison {
    /// True when the two states hold the same files with the same content.
    pub fn is_identical(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

/// Compares two resolved file states path by path.
///
/// Content equality is digest equality; mtimes are ignored, a touched but
/// unmodified file is unchanged. Sorted inputs keep every list sorted.
pub fn compare_states(
    base: &BTreeMap<&str, &FileRecord>,
    target: &BTreeMap<&str, &FileRecord>,
) -> StateComparison {
    let mut comparison = StateComparison::default();

    for (path, record) in target {
        match base.get(path) {
            None => comparison.added.push((*path).to_string()),
            Some(previous) if previous.fingerprint.digest != record.fingerprint.digest => {
                comparison.modified.push((*path).to_string());
            }
            Some(_) => comparison.unchanged += 1,
        }
    }
    for path in base.keys() {
        if !target.contains_key(*path) {
            comparison.removed.push((*path).to_string());
        }
    }

    comparison
}
