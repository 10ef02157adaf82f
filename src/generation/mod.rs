use std::collections::{BTreeMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};

use rkyv::{Archive, Deserialize, Serialize};

use crate::error::{Result, VaultError};


/// Current version of the manifest format.
///
/// Incremented when incompatible changes are made to the on-disk layout.
/// A manifest with a newer version than this constant is refused as corrupt
/// rather than guessed at.
pub const MANIFEST_VERSION: u32 = 1;

/// A file's state at scan time: size, modification time, content digest.
///
/// Change detection is digest equality. Size is only a cheap pre-filter
/// (a differing size proves a change without hashing); mtime is recorded
/// for reporting but never consulted, so clock skew or a same-size rewrite
/// cannot hide a change.
#[derive(Archive, Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct FileFingerprint {
    /// Size of the file in bytes.
    pub size: u64,

    /// Modification time as nanoseconds since UNIX_EPOCH.
    pub mtime_nanos: u128,

    /// Hex-encoded BLAKE3 digest of the file's contents.
    pub digest: String,
}

/// One file's entry within a generation.
///
/// A tombstone marks the file as removed relative to the parent state and
/// carries no content pointer. A non-tombstone record points at the copied
/// content inside the generation's file store.
#[derive(Archive, Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Path relative to the backed-up root (UTF-8, `/`-separated).
    pub path: String,

    /// Fingerprint of the file as of this generation.
    ///
    /// For tombstones this is the last known fingerprint of the removed
    /// file, kept for reporting.
    pub fingerprint: FileFingerprint,

    /// True when the file was removed since the parent state.
    pub tombstone: bool,

    /// Content location relative to the backup directory, present iff this
    /// record is not a tombstone.
    pub store_path: Option<String>,
}

/// Kind of a backup generation.
///
/// Parent nullability is encoded in the variant: a full generation has no
/// parent by construction, an incremental generation always names one.
#[derive(Archive, Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub enum GenerationKind {
    /// Self-contained snapshot of every file under the root.
    Full,
    /// Delta against the resolved state of `parent`.
    Incremental {
        /// Id of the generation this delta applies on top of.
        parent: String,
    },
}

impl GenerationKind {
    /// Parent generation id, `None` for full generations.
    pub fn parent(&self) -> Option<&str> {
        match self {
            GenerationKind::Full => None,
            GenerationKind::Incremental { parent } => Some(parent),
        }
    }

    /// Short human-readable label for summaries and `list` output.
    pub fn label(&self) -> &'static str {
        match self {
            GenerationKind::Full => "full",
            GenerationKind::Incremental { .. } => "incremental",
        }
    }
}

/// One immutable backup generation.
///
/// Once appended to the manifest a generation is never mutated in place;
/// the only state transition left is deletion through retention cleanup.
#[derive(Archive, Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct BackupGeneration {
    /// Unique generation id, typically time-derived.
    pub id: String,

    /// Full or incremental, with the parent link for the latter.
    pub kind: GenerationKind,

    /// The root path this generation backs up (absolute, UTF-8).
    pub root: String,

    /// Creation time as nanoseconds since UNIX_EPOCH.
    pub created_at_nanos: u128,

    /// File records, sorted by path, paths unique within the generation.
    pub files: Vec<FileRecord>,
}

impl BackupGeneration {
    /// True for self-contained full generations.
    pub fn is_full(&self) -> bool {
        matches!(self.kind, GenerationKind::Full)
    }

    /// Number of non-tombstone records.
    pub fn live_file_count(&self) -> usize {
        self.files.iter().filter(|r| !r.tombstone).count()
    }
}

/// The in-memory manifest: every generation across all roots.
///
/// Ordered by creation time. Persistence, locking and atomic commits live
/// in [`crate::manifest::ManifestStore`]; this type holds the pure index
/// and chain logic so it can be tested without a filesystem.
#[derive(Archive, Deserialize, Serialize, Debug, Clone, Default)]
pub struct Manifest {
    /// Version of the manifest format for forward compatibility.
    pub version: u32,

    /// All generations, ordered by `created_at_nanos`.
    pub generations: Vec<BackupGeneration>,
}

impl Manifest {
    /// Creates an empty manifest at the current format version.
    pub fn new() -> Self {
        Self {
            version: MANIFEST_VERSION,
            generations: Vec::new(),
        }
    }

    /// Looks up a generation by id.
    pub fn get(&self, id: &str) -> Option<&BackupGeneration> {
        self.generations.iter().find(|g| g.id == id)
    }

    /// True if a generation with this id exists.
    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Appends a generation, keeping the creation-time ordering.
    pub fn push(&mut self, generation: BackupGeneration) {
        let idx = self
            .generations
            .partition_point(|g| g.created_at_nanos <= generation.created_at_nanos);
        self.generations.insert(idx, generation);
    }

    /// Removes a generation record by id, returning it if present.
    pub fn remove(&mut self, id: &str) -> Option<BackupGeneration> {
        let idx = self.generations.iter().position(|g| g.id == id)?;
        Some(self.generations.remove(idx))
    }

    /// Generations for one root, oldest first. With `None`, all of them.
    pub fn for_root(&self, root: Option<&str>) -> Vec<&BackupGeneration> {
        self.generations
            .iter()
            .filter(|g| root.is_none_or(|r| g.root == r))
            .collect()
    }

    /// The most recently created generation for a root, if any.
    pub fn latest_for_root(&self, root: &str) -> Option<&BackupGeneration> {
        self.generations.iter().rev().find(|g| g.root == root)
    }

    /// Resolves the dependency chain for `id`, root full generation first,
    /// `id` last.
    ///
    /// Fails with `ChainResolution` if the id is unknown, a parent link is
    /// missing, or the parent links form a cycle.
    pub fn resolve_chain(&self, id: &str) -> Result<Vec<&BackupGeneration>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = self.get(id).ok_or_else(|| VaultError::ChainResolution {
            generation: id.to_string(),
            message: format!("generation '{id}' does not exist"),
        })?;

        loop {
            if !seen.insert(current.id.as_str()) {
                return Err(VaultError::ChainResolution {
                    generation: id.to_string(),
                    message: format!("parent links form a cycle at '{}'", current.id),
                });
            }
            chain.push(current);

            match current.kind.parent() {
                None => break,
                Some(parent_id) => {
                    current = self.get(parent_id).ok_or_else(|| VaultError::ChainResolution {
                        generation: id.to_string(),
                        message: format!(
                            "parent '{parent_id}' of '{}' does not exist",
                            current.id
                        ),
                    })?;
                }
            }
        }

        chain.reverse();
        Ok(chain)
    }

    /// Replays a resolved chain into the effective file state at its tip.
    ///
    /// Non-tombstone records overwrite the path, tombstones delete it. The
    /// resulting records carry the store paths of whichever generation last
    /// touched each file, which is exactly where restore finds the content.
    pub fn effective_state<'a>(chain: &[&'a BackupGeneration]) -> BTreeMap<&'a str, &'a FileRecord> {
        let mut state = BTreeMap::new();
        for generation in chain {
            for record in &generation.files {
                if record.tombstone {
                    state.remove(record.path.as_str());
                } else {
                    state.insert(record.path.as_str(), record);
                }
            }
        }
        state
    }

    /// Generates a fresh time-derived generation id.
    ///
    /// Ids are zero-padded nanosecond timestamps so their lexicographic
    /// order matches creation order. If the clock stands still or runs
    /// backwards relative to the newest existing generation, the id is
    /// bumped to one nanosecond past it, so ids never collide and never
    /// sort before an older generation.
    pub fn next_generation_id(&self, now_nanos: u128) -> (String, u128) {
        let max_existing = self
            .generations
            .iter()
            .map(|g| g.created_at_nanos)
            .max()
            .unwrap_or(0);
        let nanos = now_nanos.max(max_existing + 1);
        (format!("gen-{nanos:020}"), nanos)
    }

    /// Structural validation of a freshly loaded manifest.
    ///
    /// Returns a description of the first violation found: duplicate ids,
    /// duplicate paths within a generation, a tombstone carrying a content
    /// pointer, or a live record missing one. Parent-link existence is not
    /// checked here; a broken link only fails the chains that cross it
    /// (and mid-cleanup manifests legitimately hold doomed children whose
    /// parent record is already gone).
    pub fn validate(&self) -> std::result::Result<(), String> {
        let mut ids = HashSet::new();
        for generation in &self.generations {
            if !ids.insert(generation.id.as_str()) {
                return Err(format!("duplicate generation id '{}'", generation.id));
            }

            let mut paths = HashSet::new();
            for record in &generation.files {
                if !paths.insert(record.path.as_str()) {
                    return Err(format!(
                        "generation '{}' records path '{}' twice",
                        generation.id, record.path
                    ));
                }
                if record.tombstone && record.store_path.is_some() {
                    return Err(format!(
                        "generation '{}' has a tombstone for '{}' with a content pointer",
                        generation.id, record.path
                    ));
                }
                if !record.tombstone && record.store_path.is_none() {
                    return Err(format!(
                        "generation '{}' has a live record for '{}' without a content pointer",
                        generation.id, record.path
                    ));
                }
                if record.tombstone && generation.is_full() {
                    return Err(format!(
                        "full generation '{}' has a tombstone for '{}'",
                        generation.id, record.path
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Current time as nanoseconds since UNIX_EPOCH.
pub fn unix_nanos_now() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}
