//! Backup orchestration: scan, diff, copy, append.
//!
//! The engine decides full vs incremental, turns the pure diff plan into
//! copied content plus manifest records, and commits the new generation
//! through the store's atomic append. Content is copied into a private
//! staging directory and renamed into place only after the manifest
//! commit, so a failed or racing backup only ever sweeps its own staging
//! and never another generation's committed content.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use rayon::prelude::*;

use crate::diff::{DiffPlan, diff_states};
use crate::error::{Result, VaultError};
use crate::generation::{
    BackupGeneration, FileRecord, GenerationKind, Manifest, unix_nanos_now,
};
use crate::logging::Logger;
use crate::manifest::{LOCK_FILE, MANIFEST_FILE, ManifestStore};
use crate::scan::scan_tree;

/// Disambiguates staging directories created in the same nanosecond by
/// concurrent backups within one process.
static STAGING_SEQ: AtomicU64 = AtomicU64::new(0);

/// Summary of one backup run.
#[derive(Debug)]
pub struct BackupReport {
    /// Id of the committed generation.
    pub generation_id: String,
    /// "full" or "incremental".
    pub kind: &'static str,
    /// Files found by the scan.
    pub files_scanned: usize,
    /// Changed or new files whose content was copied.
    pub files_recorded: usize,
    /// Files tombstoned as removed.
    pub tombstones: usize,
    /// Files omitted because their digest was unchanged.
    pub unchanged: usize,
    /// Bytes of content copied into the generation's store.
    pub bytes_copied: u64,
    /// Symbolic links skipped by the scan.
    pub symlinks_skipped: usize,
}

/// Orchestrates backups against one [`ManifestStore`].
pub struct BackupEngine<'a> {
    store: &'a ManifestStore,
    log: Logger,
}

impl<'a> BackupEngine<'a> {
    pub fn new(store: &'a ManifestStore, log: Logger) -> Self {
        Self { store, log }
    }

    /// Backs up `root` as a new generation and returns its summary.
    ///
    /// The first backup of a root is always full, as is any run with
    /// `incremental` set to false. Otherwise the scan is diffed against
    /// the resolved state of the root's latest generation and only the
    /// delta is recorded.
    pub fn backup(
        &self,
        root: &Path,
        name: Option<&str>,
        incremental: bool,
    ) -> Result<BackupReport> {
        if let Some(requested) = name {
            validate_name(requested)?;
        }

        let root = root.canonicalize().map_err(|source| VaultError::Scan {
            path: root.to_path_buf(),
            source,
        })?;
        let root_str = root
            .to_str()
            .ok_or_else(|| VaultError::InvalidUtf8Path(root.clone()))?
            .to_string();

        let scan = scan_tree(&root)?;
        if scan.symlinks_skipped > 0 {
            self.log.info(format!(
                "Skipped {} symbolic link{} (not backed up)",
                scan.symlinks_skipped,
                if scan.symlinks_skipped == 1 { "" } else { "s" }
            ));
        }

        // Snapshot of the last committed manifest; the append below
        // re-validates name and parent under the lock.
        let manifest = self.store.load()?;

        if let Some(requested) = name
            && manifest.contains(requested)
        {
            return Err(VaultError::NameCollision(requested.to_string()));
        }

        let latest = manifest.latest_for_root(&root_str);
        let (kind, parent_state) = match latest {
            Some(parent) if incremental => {
                let chain = manifest.resolve_chain(&parent.id)?;
                (
                    GenerationKind::Incremental {
                        parent: parent.id.clone(),
                    },
                    Manifest::effective_state(&chain),
                )
            }
            _ => (GenerationKind::Full, BTreeMap::new()),
        };

        let plan = diff_states(&parent_state, &scan.fingerprints);

        let (generated_id, created_at_nanos) = manifest.next_generation_id(unix_nanos_now());
        let id = name.map(str::to_string).unwrap_or(generated_id);

        self.log.verbose(
            1,
            format!(
                "Creating {} generation '{id}' for {root_str}: {} to copy, {} tombstones, {} \
                 unchanged",
                kind.label(),
                plan.to_copy.len(),
                plan.tombstones.len(),
                plan.unchanged
            ),
        );

        let staging = self.staging_dir(created_at_nanos);
        let (mut files, bytes_copied) = self.copy_contents(&root, &id, &staging, &plan)?;

        for path in &plan.tombstones {
            let previous = parent_state
                .get(path.as_str())
                .expect("tombstones come from the parent state");
            files.push(FileRecord {
                path: path.clone(),
                fingerprint: previous.fingerprint.clone(),
                tombstone: true,
                store_path: None,
            });
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));

        let generation = BackupGeneration {
            id: id.clone(),
            kind: kind.clone(),
            root: root_str,
            created_at_nanos,
            files,
        };

        if let Err(err) = self.store.append(generation) {
            // The generation never became visible; drop its staged content.
            let _ = fs::remove_dir_all(&staging);
            return Err(err);
        }

        // Only after the commit does the content move to its public
        // location. A leftover directory at the final path can only be an
        // orphan (the append just proved the id was unused).
        let final_dir = self.store.generation_dir(&id);
        if final_dir.exists() {
            let _ = fs::remove_dir_all(&final_dir);
        }
        if let Err(source) = fs::rename(&staging, &final_dir) {
            let _ = self.store.remove(&id);
            let _ = fs::remove_dir_all(&staging);
            return Err(VaultError::Backup {
                path: final_dir,
                source,
            });
        }

        Ok(BackupReport {
            generation_id: id,
            kind: kind.label(),
            files_scanned: scan.fingerprints.len(),
            files_recorded: plan.to_copy.len(),
            tombstones: plan.tombstones.len(),
            unchanged: plan.unchanged,
            bytes_copied,
            symlinks_skipped: scan.symlinks_skipped,
        })
    }

    /// Staging directory unique to this backup attempt.
    ///
    /// Keyed by timestamp, pid and an in-process sequence number, so two
    /// racing attempts (even with an identical explicit name) never share
    /// a staging path.
    fn staging_dir(&self, nanos: u128) -> PathBuf {
        let seq = STAGING_SEQ.fetch_add(1, Ordering::Relaxed);
        self.store
            .backup_dir()
            .join(format!(".staging-{nanos}-{}-{seq}", std::process::id()))
    }

    /// Copies every planned file into the staging directory, returning the
    /// live records and total bytes copied.
    ///
    /// Records point at the final `<id>/files/<relative-path>` location;
    /// the staged tree moves there only after the manifest commit.
    fn copy_contents(
        &self,
        root: &Path,
        id: &str,
        staging: &Path,
        plan: &DiffPlan,
    ) -> Result<(Vec<FileRecord>, u64)> {
        let files_dir = staging.join("files");
        fs::create_dir_all(&files_dir).map_err(|source| VaultError::Backup {
            path: files_dir.clone(),
            source,
        })?;

        let copied: Vec<(FileRecord, u64)> = plan
            .to_copy
            .par_iter()
            .map(|(path, fingerprint)| {
                let source = root.join(path);
                let target = files_dir.join(path);
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).map_err(|source| VaultError::Backup {
                        path: parent.to_path_buf(),
                        source,
                    })?;
                }
                let bytes = fs::copy(&source, &target).map_err(|source| VaultError::Backup {
                    path: target.clone(),
                    source,
                })?;

                Ok((
                    FileRecord {
                        path: path.clone(),
                        fingerprint: fingerprint.clone(),
                        tombstone: false,
                        store_path: Some(ManifestStore::store_path_for(id, path)),
                    },
                    bytes,
                ))
            })
            .collect::<Result<_>>()
            .inspect_err(|_| {
                // Partial copies are useless without a manifest record.
                let _ = fs::remove_dir_all(staging);
            })?;

        let bytes_copied = copied.iter().map(|(_, bytes)| bytes).sum();
        Ok((copied.into_iter().map(|(record, _)| record).collect(), bytes_copied))
    }
}

/// Explicit names double as directory names inside the backup directory,
/// so a usable name is exactly one normal path component.
fn validate_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\'])
        || name == MANIFEST_FILE
        || name == LOCK_FILE
    {
        return Err(VaultError::InvalidName(name.to_string()));
    }
    Ok(())
}
