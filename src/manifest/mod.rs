use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use memmap2::Mmap;

use crate::diff::{StateComparison, compare_states};
use crate::error::{Result, VaultError};
use crate::generation::{BackupGeneration, MANIFEST_VERSION, Manifest};
use crate::lock::ManifestLock;


/// Manifest file name inside the backup directory.
pub const MANIFEST_FILE: &str = "snapvault.manifest";

/// Lockfile name, a sibling of the manifest.
pub const LOCK_FILE: &str = "snapvault.lock";

/// Durable store for the backup manifest.
///
/// The store owns the backup directory layout: the manifest file, its
/// lockfile, and one content directory per generation
/// (`<backup-dir>/<generation-id>/files/<relative-path>`).
///
/// Commits are atomic (temp file, fsync, rename), so a crash mid-write
/// leaves the previously committed manifest intact and a partial generation
/// is never visible. Mutating calls (`append`, `remove`) re-load the
/// manifest under an exclusive timeout-bounded lock; read calls operate on
/// the last committed snapshot without taking the lock at all.
#[derive(Debug)]
pub struct ManifestStore {
    backup_dir: PathBuf,
    manifest_path: PathBuf,
    lock_path: PathBuf,
    lock_timeout: Duration,
}

impl ManifestStore {
    /// Opens (and creates if needed) the backup directory at `backup_dir`.
    pub fn open(backup_dir: impl Into<PathBuf>, lock_timeout: Duration) -> Result<Self> {
        let backup_dir = backup_dir.into();
        fs::create_dir_all(&backup_dir).map_err(|source| VaultError::Io {
            path: backup_dir.clone(),
            source,
        })?;

        Ok(Self {
            manifest_path: backup_dir.join(MANIFEST_FILE),
            lock_path: backup_dir.join(LOCK_FILE),
            backup_dir,
            lock_timeout,
        })
    }

    /// The backup directory this store manages.
    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Content directory for one generation's copied files.
    pub fn file_store_dir(&self, generation_id: &str) -> PathBuf {
        self.backup_dir.join(generation_id).join("files")
    }

    /// Directory holding everything owned by one generation.
    pub fn generation_dir(&self, generation_id: &str) -> PathBuf {
        self.backup_dir.join(generation_id)
    }

    /// Manifest-relative content pointer for a file record.
    pub fn store_path_for(generation_id: &str, relative_path: &str) -> String {
        format!("{generation_id}/files/{relative_path}")
    }

    /// Loads the last committed manifest snapshot.
    ///
    /// A missing or empty manifest file yields an empty manifest. Anything
    /// that fails to decode or fails structural validation is reported as
    /// corruption; the store never repairs or resets a manifest on its own.
    pub fn load(&self) -> Result<Manifest> {
        if !self.manifest_path.exists() {
            return Ok(Manifest::new());
        }

        let file = File::open(&self.manifest_path).map_err(|source| VaultError::Io {
            path: self.manifest_path.clone(),
            source,
        })?;
        let file_len = file
            .metadata()
            .map_err(|source| VaultError::Io {
                path: self.manifest_path.clone(),
                source,
            })?
            .len();
        if file_len == 0 {
            return Ok(Manifest::new());
        }

        let mmap = unsafe { Mmap::map(&file) }.map_err(|source| VaultError::Io {
            path: self.manifest_path.clone(),
            source,
        })?;

        let manifest = rkyv::from_bytes::<Manifest, rkyv::rancor::BoxedError>(&mmap[..]).map_err(
            |err| VaultError::ManifestCorruption {
                path: self.manifest_path.clone(),
                message: format!("cannot decode manifest: {err}"),
            },
        )?;

        if manifest.version > MANIFEST_VERSION {
            return Err(VaultError::ManifestCorruption {
                path: self.manifest_path.clone(),
                message: format!(
                    "manifest version {} is newer than supported version {MANIFEST_VERSION}",
                    manifest.version
                ),
            });
        }

        manifest
            .validate()
            .map_err(|message| VaultError::ManifestCorruption {
                path: self.manifest_path.clone(),
                message,
            })?;

        Ok(manifest)
    }

    /// Looks up one generation in the last committed snapshot.
    pub fn get(&self, id: &str) -> Result<Option<BackupGeneration>> {
        Ok(self.load()?.get(id).cloned())
    }

    /// Lists generations, optionally filtered by root, oldest first.
    pub fn list(&self, root: Option<&str>) -> Result<Vec<BackupGeneration>> {
        Ok(self
            .load()?
            .for_root(root)
            .into_iter()
            .cloned()
            .collect())
    }

    /// Resolves the chain for `id` against the last committed snapshot,
    /// root full generation first.
    pub fn resolve_chain(&self, id: &str) -> Result<Vec<BackupGeneration>> {
        let manifest = self.load()?;
        Ok(manifest
            .resolve_chain(id)?
            .into_iter()
            .cloned()
            .collect())
    }

    /// Diffs the resolved effective states of two generations.
    ///
    /// Both sides are replayed through their full chains first, so the
    /// report describes what a restore of each generation would produce,
    /// not just the records each generation restates. Lock-free, like
    /// every other read.
    pub fn compare(&self, base: &str, target: &str) -> Result<StateComparison> {
        let manifest = self.load()?;
        let base_state = Manifest::effective_state(&manifest.resolve_chain(base)?);
        let target_state = Manifest::effective_state(&manifest.resolve_chain(target)?);
        Ok(compare_states(&base_state, &target_state))
    }

    /// Durably appends a generation.
    ///
    /// Re-loads the manifest under the exclusive lock, so concurrent
    /// appends serialize instead of overwriting each other. Fails with
    /// `NameCollision` if the id is already taken and with
    /// `ChainResolution` if an incremental generation names a parent that
    /// does not exist.
    pub fn append(&self, generation: BackupGeneration) -> Result<()> {
        let _lock = ManifestLock::acquire(&self.lock_path, self.lock_timeout)?;

        let mut manifest = self.load()?;
        if manifest.contains(&generation.id) {
            return Err(VaultError::NameCollision(generation.id));
        }
        if let Some(parent) = generation.kind.parent()
            && !manifest.contains(parent)
        {
            return Err(VaultError::ChainResolution {
                generation: generation.id.clone(),
                message: format!("parent '{parent}' does not exist"),
            });
        }

        manifest.push(generation);
        self.save(&manifest)
    }

    /// Acquires the store's exclusive lock for a multi-step mutation.
    ///
    /// The lock is not reentrant: while the guard lives, only the
    /// `*_locked` mutation methods may be used.
    pub(crate) fn lock(&self) -> Result<ManifestLock> {
        ManifestLock::acquire(&self.lock_path, self.lock_timeout)
    }

    /// Removes a generation's manifest record.
    ///
    /// Only retention cleanup calls this, after validating the generation
    /// is safe to delete; the record-level store enforces no chain policy
    /// of its own.
    pub fn remove(&self, id: &str) -> Result<Option<BackupGeneration>> {
        let _lock = self.lock()?;
        self.remove_locked(id)
    }

    /// Removes a record under a lock the caller already holds.
    pub(crate) fn remove_locked(&self, id: &str) -> Result<Option<BackupGeneration>> {
        let mut manifest = self.load()?;
        let removed = manifest.remove(id);
        if removed.is_some() {
            self.save(&manifest)?;
        }
        Ok(removed)
    }

    /// Commits the manifest atomically: temp file, fsync, rename.
    pub(crate) fn save(&self, manifest: &Manifest) -> Result<()> {
        let bytes = rkyv::to_bytes::<rkyv::rancor::BoxedError>(manifest)
            .map_err(|e| VaultError::Serialization(Box::new(e)))?;

        let temp_path = self.manifest_path.with_extension("tmp");

        let mut temp_file = File::create(&temp_path).map_err(|source| VaultError::Io {
            path: temp_path.clone(),
            source,
        })?;
        temp_file
            .write_all(&bytes)
            .map_err(|source| VaultError::Io {
                path: temp_path.clone(),
                source,
            })?;
        temp_file.sync_all().map_err(|source| VaultError::Io {
            path: temp_path.clone(),
            source,
        })?;

        fs::rename(&temp_path, &self.manifest_path).map_err(|source| VaultError::Io {
            path: self.manifest_path.clone(),
            source,
        })?;

        Ok(())
    }
}
