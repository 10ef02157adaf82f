//! Restore orchestration: chain replay, verification, atomic swap.
//!
//! A restore never writes into a live destination. The chain is replayed
//! into a staging directory next to the destination, every staged file is
//! re-fingerprinted against what chain resolution predicts, and only then
//! is the staged tree swapped in. An interrupted or failed restore leaves
//! the destination exactly as it was.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, VaultError};
use crate::generation::{BackupGeneration, Manifest};
use crate::logging::Logger;
use crate::manifest::ManifestStore;
use crate::scan::scan_tree;

/// Summary of one restore run.
#[derive(Debug)]
pub struct RestoreReport {
    /// The generation that was restored.
    pub generation_id: String,
    /// Where the restored tree ended up.
    pub destination: PathBuf,
    /// Files in the restored tree.
    pub files_restored: usize,
    /// Total bytes in the restored tree.
    pub bytes_restored: u64,
    /// Generations applied while replaying the chain.
    pub generations_applied: usize,
}

/// Reconstructs generations out of one [`ManifestStore`].
pub struct RestoreEngine<'a> {
    store: &'a ManifestStore,
    log: Logger,
}

impl<'a> RestoreEngine<'a> {
    pub fn new(store: &'a ManifestStore, log: Logger) -> Self {
        Self { store, log }
    }

    /// Restores generation `name` into `destination`.
    ///
    /// With no destination, the generation's recorded root path is used.
    /// Fails with `ChainResolution` for an unknown name or broken chain,
    /// `RestoreVerification` if any staged file deviates from its recorded
    /// fingerprint, and `Restore` for I/O failures at the destination.
    pub fn restore(&self, name: &str, destination: Option<&Path>) -> Result<RestoreReport> {
        let chain = self.store.resolve_chain(name)?;
        let tip = chain.last().expect("a resolved chain is never empty");

        let destination = destination
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(&tip.root));

        self.log.verbose(
            1,
            format!(
                "Restoring '{name}' into {} ({} generation{} in chain)",
                destination.display(),
                chain.len(),
                if chain.len() == 1 { "" } else { "s" }
            ),
        );

        let staging = sibling_dir(&destination, "staging")?;
        if staging.exists() {
            // Leftover from a previous interrupted restore.
            fs::remove_dir_all(&staging).map_err(|source| VaultError::Restore {
                path: staging.clone(),
                source,
            })?;
        }
        fs::create_dir_all(&staging).map_err(|source| VaultError::Restore {
            path: staging.clone(),
            source,
        })?;

        let result = self.stage_and_verify(name, &chain, &staging);
        let (files_restored, bytes_restored) = match result {
            Ok(counts) => counts,
            Err(err) => {
                let _ = fs::remove_dir_all(&staging);
                return Err(err);
            }
        };

        self.swap_into_place(&staging, &destination)?;

        Ok(RestoreReport {
            generation_id: name.to_string(),
            destination,
            files_restored,
            bytes_restored,
            generations_applied: chain.len(),
        })
    }

    /// Replays the chain into the staging tree, then verifies every staged
    /// file against the fingerprints chain resolution predicts.
    fn stage_and_verify(
        &self,
        name: &str,
        chain: &[BackupGeneration],
        staging: &Path,
    ) -> Result<(usize, u64)> {
        for generation in chain {
            for record in &generation.files {
                let staged = staging.join(&record.path);
                if record.tombstone {
                    match fs::remove_file(&staged) {
                        Ok(()) => {}
                        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                        Err(source) => {
                            return Err(VaultError::Restore {
                                path: staged,
                                source,
                            });
                        }
                    }
                    continue;
                }

                let store_path = record
                    .store_path
                    .as_deref()
                    .expect("live records carry a content pointer");
                let content = self.store.backup_dir().join(store_path);
                if let Some(parent) = staged.parent() {
                    fs::create_dir_all(parent).map_err(|source| VaultError::Restore {
                        path: parent.to_path_buf(),
                        source,
                    })?;
                }
                fs::copy(&content, &staged).map_err(|source| VaultError::Restore {
                    path: staged.clone(),
                    source,
                })?;
            }
        }

        // Verify the staged tree matches the resolved state exactly.
        let chain_refs: Vec<&BackupGeneration> = chain.iter().collect();
        let expected = Manifest::effective_state(&chain_refs);
        let staged_scan = scan_tree(staging)?;

        for (path, record) in &expected {
            match staged_scan.fingerprints.get(*path) {
                Some(staged)
                    if staged.size == record.fingerprint.size
                        && staged.digest == record.fingerprint.digest => {}
                _ => {
                    return Err(VaultError::RestoreVerification {
                        path: (*path).to_string(),
                        generation: name.to_string(),
                    });
                }
            }
        }
        for path in staged_scan.fingerprints.keys() {
            if !expected.contains_key(path.as_str()) {
                return Err(VaultError::RestoreVerification {
                    path: path.clone(),
                    generation: name.to_string(),
                });
            }
        }

        let bytes = expected.values().map(|r| r.fingerprint.size).sum();
        Ok((expected.len(), bytes))
    }

    /// Swaps the verified staging tree into the destination.
    ///
    /// An existing destination is moved aside first and only removed after
    /// the staged tree has taken its place; if that second rename fails the
    /// original tree is moved back.
    fn swap_into_place(&self, staging: &Path, destination: &Path) -> Result<()> {
        if let Some(parent) = destination.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|source| VaultError::Restore {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let displaced = sibling_dir(destination, "old")?;
        if displaced.exists() {
            fs::remove_dir_all(&displaced).map_err(|source| VaultError::Restore {
                path: displaced.clone(),
                source,
            })?;
        }

        let had_previous = destination.exists();
        if had_previous {
            fs::rename(destination, &displaced).map_err(|source| VaultError::Restore {
                path: destination.to_path_buf(),
                source,
            })?;
        }

        if let Err(source) = fs::rename(staging, destination) {
            if had_previous {
                let _ = fs::rename(&displaced, destination);
            }
            return Err(VaultError::Restore {
                path: destination.to_path_buf(),
                source,
            });
        }

        if had_previous {
            fs::remove_dir_all(&displaced).map_err(|source| VaultError::Restore {
                path: displaced,
                source,
            })?;
        }

        Ok(())
    }
}

/// Hidden sibling of `path` used for staging and displacement, so the swap
/// is a same-filesystem rename.
fn sibling_dir(path: &Path, suffix: &str) -> Result<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| VaultError::Restore {
            path: path.to_path_buf(),
            source: std::io::Error::other("destination has no directory name"),
        })?
        .to_string_lossy();
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    Ok(parent.join(format!(".{name}.snapvault-{suffix}")))
}
