//! Retention cleanup: age/count windows plus chain-closure protection.
//!
//! Cleanup works per root. The retained set is the newest `keep_count`
//! generations unioned with everything younger than `keep_days`; it is then
//! expanded to its chain closure, the ancestors any retained generation
//! needs to resolve. Only generations outside that closure are deleted,
//! strictly oldest first, content directory before manifest record, so a
//! crash can orphan a content directory but never leave a record pointing
//! at missing content.

use std::collections::HashSet;

use walkdir::WalkDir;

use crate::error::{Result, VaultError};
use crate::generation::{Manifest, unix_nanos_now};
use crate::logging::Logger;
use crate::manifest::ManifestStore;

const NANOS_PER_DAY: u128 = 86_400 * 1_000_000_000;

/// Age/count thresholds below which generations become deletable.
#[derive(Debug, Clone, Copy)]
pub struct RetentionRule {
    /// Newest generations to retain per root, regardless of age.
    pub keep_count: usize,
    /// Retain every generation newer than this many days.
    pub keep_days: u64,
}

/// Summary of one cleanup run.
#[derive(Debug, Default)]
pub struct CleanupReport {
    /// Generations deleted (or that would be, in dry-run mode).
    pub generations_deleted: usize,
    /// Bytes of content freed.
    pub bytes_reclaimed: u64,
    /// True when nothing was actually deleted.
    pub dry_run: bool,
}

/// Applies a [`RetentionRule`] against one [`ManifestStore`].
pub struct RetentionPolicy<'a> {
    store: &'a ManifestStore,
    log: Logger,
}

impl<'a> RetentionPolicy<'a> {
    pub fn new(store: &'a ManifestStore, log: Logger) -> Self {
        Self { store, log }
    }

    /// Deletes every generation outside the retained chain closure.
    ///
    /// A deleting run holds the manifest lock from closure computation
    /// through the last removal, so a concurrent backup can never chain a
    /// new generation onto a parent this run deletes: the backup either
    /// commits first (and the closure computed here sees its chain) or
    /// waits for the lock and then fails its own parent check against the
    /// post-cleanup manifest. Dry runs take no lock.
    ///
    /// Idempotent: a second run with the same rule and no intervening
    /// backups deletes nothing.
    pub fn cleanup(&self, rule: RetentionRule, dry_run: bool) -> Result<CleanupReport> {
        let _lock = if dry_run {
            None
        } else {
            Some(self.store.lock()?)
        };

        let manifest = self.store.load()?;
        let closure = retained_closure(&manifest, rule, unix_nanos_now())?;

        // Manifest order is creation order, so this walks oldest first.
        let doomed: Vec<String> = manifest
            .generations
            .iter()
            .filter(|g| !closure.contains(g.id.as_str()))
            .map(|g| g.id.clone())
            .collect();

        let mut report = CleanupReport {
            dry_run,
            ..CleanupReport::default()
        };

        for id in doomed {
            // The filter above makes this unreachable; deleting a required
            // ancestor would break every chain through it, so re-check as
            // an internal invariant rather than trusting one code path.
            if closure.contains(id.as_str()) {
                return Err(VaultError::RetentionViolation { generation: id });
            }

            let generation_dir = self.store.generation_dir(&id);
            let bytes = directory_size(&generation_dir);

            self.log.verbose(
                1,
                format!(
                    "{} generation '{id}' ({bytes} bytes)",
                    if dry_run { "Would delete" } else { "Deleting" }
                ),
            );

            if !dry_run {
                // Content first, record second: a crash here orphans the
                // content directory but the manifest stays resolvable.
                if generation_dir.exists() {
                    std::fs::remove_dir_all(&generation_dir).map_err(|source| VaultError::Io {
                        path: generation_dir.clone(),
                        source,
                    })?;
                }
                self.store.remove_locked(&id)?;
            }

            report.generations_deleted += 1;
            report.bytes_reclaimed += bytes;
        }

        Ok(report)
    }
}

/// Computes the retained set for every root and expands it to its chain
/// closure.
///
/// Pure with respect to the manifest, so the algorithm is testable without
/// a store. Fails with `ChainResolution` if a retained generation's own
/// chain is already broken; deleting anything while a retained chain is
/// unresolvable would be guesswork.
pub fn retained_closure(
    manifest: &Manifest,
    rule: RetentionRule,
    now_nanos: u128,
) -> Result<HashSet<String>> {
    let cutoff = now_nanos.saturating_sub(rule.keep_days as u128 * NANOS_PER_DAY);

    let roots: HashSet<&str> = manifest
        .generations
        .iter()
        .map(|g| g.root.as_str())
        .collect();

    let mut retained: Vec<&str> = Vec::new();
    for root in roots {
        let generations = manifest.for_root(Some(root));

        // Newest keep_count, regardless of age.
        retained.extend(
            generations
                .iter()
                .rev()
                .take(rule.keep_count)
                .map(|g| g.id.as_str()),
        );
        // Everything inside the age window.
        retained.extend(
            generations
                .iter()
                .filter(|g| g.created_at_nanos >= cutoff)
                .map(|g| g.id.as_str()),
        );
    }

    let mut closure = HashSet::new();
    for id in retained {
        for ancestor in manifest.resolve_chain(id)? {
            closure.insert(ancestor.id.clone());
        }
    }
    Ok(closure)
}

/// Total size of all files under `path`; zero when it does not exist.
fn directory_size(path: &std::path::Path) -> u64 {
    WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|metadata| metadata.len())
        .sum()
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::Duration;

    use tempfile::TempDir;

    use super::*;
    use crate::backup::BackupEngine;

    fn fixture() -> (TempDir, ManifestStore) {
        let temp_dir = TempDir::new().unwrap();
        let store =
            ManifestStore::open(temp_dir.path().join("backups"), Duration::from_secs(2)).unwrap();
        fs::create_dir_all(temp_dir.path().join("tree")).unwrap();
        fs::write(temp_dir.path().join("tree/a.md"), "alpha").unwrap();
        (temp_dir, store)
    }

    /// Build a chain of one full + `increments` incrementals by mutating
    /// the tree between backups.
    fn build_chain(temp_dir: &TempDir, store: &ManifestStore, increments: usize) -> Vec<String> {
        let engine = BackupEngine::new(store, Logger::new(0, true));
        let tree = temp_dir.path().join("tree");
        let mut ids = Vec::new();

        ids.push(engine.backup(&tree, None, true).unwrap().generation_id);
        for i in 0..increments {
            fs::write(tree.join("a.md"), format!("alpha v{i}")).unwrap();
            ids.push(engine.backup(&tree, None, true).unwrap().generation_id);
        }
        ids
    }

    #[test]
    fn test_keep_count_protects_newest_and_their_ancestors() {
        let (temp_dir, store) = fixture();
        let ids = build_chain(&temp_dir, &store, 5);
        let policy = RetentionPolicy::new(&store, Logger::new(0, true));

        let report = policy
            .cleanup(
                RetentionRule {
                    keep_count: 2,
                    keep_days: 0,
                },
                false,
            )
            .unwrap();

        // Retained: the two newest, plus every ancestor back to the full.
        // With a linear chain that closure is the entire chain, so nothing
        // is deletable even though four generations fall outside the window.
        assert_eq!(report.generations_deleted, 0);
        let remaining = store.list(None).unwrap();
        assert_eq!(remaining.len(), ids.len());
    }

    #[test]
    fn test_independent_full_generations_are_deleted() {
        let (temp_dir, store) = fixture();
        let engine = BackupEngine::new(&store, Logger::new(0, true));
        let tree = temp_dir.path().join("tree");

        // Four standalone full generations; no chains between them.
        let mut ids = Vec::new();
        for i in 0..4 {
            fs::write(tree.join("a.md"), format!("alpha v{i}")).unwrap();
            ids.push(engine.backup(&tree, None, false).unwrap().generation_id);
        }

        let policy = RetentionPolicy::new(&store, Logger::new(0, true));
        let report = policy
            .cleanup(
                RetentionRule {
                    keep_count: 2,
                    keep_days: 0,
                },
                false,
            )
            .unwrap();

        assert_eq!(report.generations_deleted, 2);
        assert!(report.bytes_reclaimed > 0);

        let remaining: Vec<String> = store
            .list(None)
            .unwrap()
            .into_iter()
            .map(|g| g.id)
            .collect();
        assert_eq!(remaining, ids[2..].to_vec());

        // Deleted content directories are gone too.
        assert!(!store.generation_dir(&ids[0]).exists());
        assert!(store.generation_dir(&ids[2]).exists());
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let (temp_dir, store) = fixture();
        let engine = BackupEngine::new(&store, Logger::new(0, true));
        let tree = temp_dir.path().join("tree");
        for i in 0..4 {
            fs::write(tree.join("a.md"), format!("alpha v{i}")).unwrap();
            engine.backup(&tree, None, false).unwrap();
        }

        let policy = RetentionPolicy::new(&store, Logger::new(0, true));
        let rule = RetentionRule {
            keep_count: 1,
            keep_days: 0,
        };

        let first = policy.cleanup(rule, false).unwrap();
        assert_eq!(first.generations_deleted, 3);

        let second = policy.cleanup(rule, false).unwrap();
        assert_eq!(second.generations_deleted, 0);
        assert_eq!(second.bytes_reclaimed, 0);
    }

    #[test]
    fn test_dry_run_deletes_nothing() {
        let (temp_dir, store) = fixture();
        let engine = BackupEngine::new(&store, Logger::new(0, true));
        let tree = temp_dir.path().join("tree");
        for i in 0..3 {
            fs::write(tree.join("a.md"), format!("alpha v{i}")).unwrap();
            engine.backup(&tree, None, false).unwrap();
        }

        let policy = RetentionPolicy::new(&store, Logger::new(0, true));
        let report = policy
            .cleanup(
                RetentionRule {
                    keep_count: 1,
                    keep_days: 0,
                },
                true,
            )
            .unwrap();

        assert!(report.dry_run);
        assert_eq!(report.generations_deleted, 2);
        assert_eq!(store.list(None).unwrap().len(), 3);
    }

    #[test]
    fn test_deleting_cleanup_waits_for_the_manifest_lock() {
        let (temp_dir, store) = fixture();
        let engine = BackupEngine::new(&store, Logger::new(0, true));
        let tree = temp_dir.path().join("tree");
        for i in 0..2 {
            fs::write(tree.join("a.md"), format!("alpha v{i}")).unwrap();
            engine.backup(&tree, None, false).unwrap();
        }

        let backup_dir = store.backup_dir().to_path_buf();
        let lock_path = backup_dir.join("snapvault.lock");
        fs::write(&lock_path, "0").unwrap();

        let impatient = ManifestStore::open(&backup_dir, Duration::from_millis(50)).unwrap();
        let rule = RetentionRule {
            keep_count: 1,
            keep_days: 0,
        };

        // A deleting run takes the lock before touching anything.
        let err = RetentionPolicy::new(&impatient, Logger::new(0, true))
            .cleanup(rule, false)
            .unwrap_err();
        assert!(matches!(err, VaultError::LockTimeout { .. }));
        assert_eq!(store.list(None).unwrap().len(), 2);

        // A dry run is a read and proceeds despite the held lock.
        let report = RetentionPolicy::new(&impatient, Logger::new(0, true))
            .cleanup(rule, true)
            .unwrap();
        assert!(report.dry_run);
        assert_eq!(report.generations_deleted, 1);

        fs::remove_file(&lock_path).unwrap();
    }

    #[test]
    fn test_concurrent_backup_never_chains_onto_a_deleted_parent() {
        let (temp_dir, store) = fixture();
        let engine = BackupEngine::new(&store, Logger::new(0, true));
        let tree = temp_dir.path().join("tree");

        // Two standalone fulls; keep_count 1 dooms the older.
        engine.backup(&tree, None, false).unwrap();
        fs::write(tree.join("a.md"), "alpha v2").unwrap();
        engine.backup(&tree, None, false).unwrap();
        let ids: Vec<String> = store.list(None).unwrap().into_iter().map(|g| g.id).collect();

        // Hold the lock so both contenders queue up behind it.
        let backup_dir = store.backup_dir().to_path_buf();
        let lock_path = backup_dir.join("snapvault.lock");
        fs::write(&lock_path, "0").unwrap();

        let cleanup_dir = backup_dir.clone();
        let cleanup = std::thread::spawn(move || {
            let store = ManifestStore::open(cleanup_dir, Duration::from_secs(5)).unwrap();
            RetentionPolicy::new(&store, Logger::new(0, true)).cleanup(
                RetentionRule {
                    keep_count: 1,
                    keep_days: 0,
                },
                false,
            )
        });

        fs::write(tree.join("a.md"), "alpha v3").unwrap();
        let backup_tree = tree.clone();
        let backup_store_dir = backup_dir.clone();
        let backup = std::thread::spawn(move || {
            let store = ManifestStore::open(backup_store_dir, Duration::from_secs(5)).unwrap();
            BackupEngine::new(&store, Logger::new(0, true)).backup(&backup_tree, None, true)
        });

        std::thread::sleep(Duration::from_millis(150));
        fs::remove_file(&lock_path).unwrap();

        cleanup.join().unwrap().unwrap();
        let child = backup.join().unwrap().unwrap();

        // Whichever side won the lock, the new incremental's chain is
        // intact: its parent full survived and every content pointer of
        // every remaining generation resolves.
        let remaining = store.list(None).unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(!store.generation_dir(&ids[0]).exists());

        let chain = store.resolve_chain(&child.generation_id).unwrap();
        assert_eq!(chain.first().unwrap().id, ids[1]);
        for generation in &remaining {
            for record in generation.files.iter().filter(|r| !r.tombstone) {
                let content = store
                    .backup_dir()
                    .join(record.store_path.as_deref().unwrap());
                assert!(content.is_file(), "missing content for {}", record.path);
            }
        }
    }

    #[test]
    fn test_keep_days_window_retains_recent_generations() {
        let (temp_dir, store) = fixture();
        let engine = BackupEngine::new(&store, Logger::new(0, true));
        let tree = temp_dir.path().join("tree");
        for i in 0..3 {
            fs::write(tree.join("a.md"), format!("alpha v{i}")).unwrap();
            engine.backup(&tree, None, false).unwrap();
        }

        // keep_count 0, but everything was created seconds ago and a one
        // day window covers it all.
        let policy = RetentionPolicy::new(&store, Logger::new(0, true));
        let report = policy
            .cleanup(
                RetentionRule {
                    keep_count: 0,
                    keep_days: 1,
                },
                false,
            )
            .unwrap();

        assert_eq!(report.generations_deleted, 0);
        assert_eq!(store.list(None).unwrap().len(), 3);
    }
}
