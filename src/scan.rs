//! Directory tree scanning and content fingerprinting.
//!
//! A scan walks the tree under a root and produces one [`FileFingerprint`]
//! per regular file: size, mtime, and a streaming BLAKE3 digest. The scan is
//! purely read-only, a snapshot of the filesystem at call time. Hashing uses
//! a fixed-size chunked read so peak memory is independent of file size, and
//! the per-file work runs on rayon's worker pool.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use blake3::Hasher;
use rayon::prelude::*;
use walkdir::WalkDir;

use crate::error::{Result, VaultError};
use crate::generation::FileFingerprint;

/// Read chunk size for streaming hashes.
const HASH_CHUNK_BYTES: usize = 64 * 1024;

/// Outcome of scanning a directory tree.
#[derive(Debug)]
pub struct ScanResult {
    /// Fingerprints keyed by root-relative path.
    pub fingerprints: BTreeMap<String, FileFingerprint>,
    /// Symbolic links encountered and skipped.
    pub symlinks_skipped: usize,
}

/// Scans the tree under `root` and fingerprints every regular file.
///
/// Symbolic links are skipped (and counted); empty directories leave no
/// trace. Fails with `Scan` if the root does not exist, is not a directory,
/// or any part of the tree cannot be read; fails with `Hash` if a file
/// becomes unreadable between discovery and hashing.
pub fn scan_tree(root: &Path) -> Result<ScanResult> {
    let root_meta = std::fs::metadata(root).map_err(|source| VaultError::Scan {
        path: root.to_path_buf(),
        source,
    })?;
    if !root_meta.is_dir() {
        return Err(VaultError::Scan {
            path: root.to_path_buf(),
            source: std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                "backup root is not a directory",
            ),
        });
    }

    let mut relative_paths: Vec<(String, PathBuf)> = Vec::new();
    let mut symlinks_skipped = 0;

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|err| {
            let path = err
                .path()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| root.to_path_buf());
            VaultError::Scan {
                path,
                source: err
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("directory walk failed")),
            }
        })?;

        if entry.path_is_symlink() {
            symlinks_skipped += 1;
            continue;
        }
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(root)
            .expect("walkdir yields paths under its root");
        let relative_str = relative
            .to_str()
            .ok_or_else(|| VaultError::InvalidUtf8Path(relative.to_path_buf()))?
            .to_string();
        relative_paths.push((relative_str, entry.path().to_path_buf()));
    }

    let fingerprints: BTreeMap<String, FileFingerprint> = relative_paths
        .into_par_iter()
        .map(|(relative, full_path)| Ok((relative, fingerprint_file(&full_path)?)))
        .collect::<Result<_>>()?;

    Ok(ScanResult {
        fingerprints,
        symlinks_skipped,
    })
}

/// Fingerprints a single file: size and mtime from metadata, digest from a
/// streaming read.
pub(crate) fn fingerprint_file(path: &Path) -> Result<FileFingerprint> {
    let metadata = std::fs::symlink_metadata(path).map_err(|source| VaultError::Hash {
        path: path.to_path_buf(),
        source,
    })?;

    let mtime_nanos = metadata
        .modified()
        .map_err(|source| VaultError::Hash {
            path: path.to_path_buf(),
            source,
        })?
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();

    Ok(FileFingerprint {
        size: metadata.len(),
        mtime_nanos,
        digest: hash_file(path)?,
    })
}

/// Computes the hex BLAKE3 digest of a file with a bounded-memory chunked
/// read, so hashing a multi-gigabyte file costs the same memory as a small
/// one.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|source| VaultError::Hash {
        path: path.to_path_buf(),
        source,
    })?;

    let mut hasher = Hasher::new();
    let mut chunk = vec![0u8; HASH_CHUNK_BYTES];
    loop {
        let read = file.read(&mut chunk).map_err(|source| VaultError::Hash {
            path: path.to_path_buf(),
            source,
        })?;
        if read == 0 {
            break;
        }
        hasher.update(&chunk[..read]);
    }

    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_hash_file() {
        let temp_dir = TempDir::new().unwrap();
        let test_file = temp_dir.path().join("test.txt");
        fs::write(&test_file, "hello world").unwrap();

        let hash = hash_file(&test_file).unwrap();
        // BLAKE3 hash of "hello world"
        assert_eq!(
            hash,
            "d74981efa70a0c880b8d8c1985d075dbcbf679b99a5f9914e5aaf96b831a9e24"
        );
    }

    #[test]
    fn test_hash_empty_file() {
        let temp_dir = TempDir::new().unwrap();
        let test_file = temp_dir.path().join("empty.txt");
        fs::write(&test_file, "").unwrap();

        let hash = hash_file(&test_file).unwrap();
        // BLAKE3 hash of empty string
        assert_eq!(
            hash,
            "af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262"
        );
    }

    #[test]
    fn test_hash_nonexistent_file() {
        let result = hash_file(Path::new("/nonexistent/file"));
        assert!(matches!(result, Err(VaultError::Hash { .. })));
    }

    #[test]
    fn test_scan_tree_fingerprints_nested_files() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("docs/deep")).unwrap();
        fs::write(temp_dir.path().join("top.md"), "top").unwrap();
        fs::write(temp_dir.path().join("docs/deep/nested.md"), "nested").unwrap();

        let result = scan_tree(temp_dir.path()).unwrap();
        assert_eq!(result.fingerprints.len(), 2);
        assert_eq!(result.symlinks_skipped, 0);

        let nested = &result.fingerprints["docs/deep/nested.md"];
        assert_eq!(nested.size, 6);
        assert_eq!(nested.digest, hash_file(&temp_dir.path().join("docs/deep/nested.md")).unwrap());
    }

    #[test]
    fn test_scan_tree_empty_directories_leave_no_trace() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("empty/also-empty")).unwrap();

        let result = scan_tree(temp_dir.path()).unwrap();
        assert!(result.fingerprints.is_empty());
    }

    #[test]
    fn test_scan_tree_missing_root() {
        let temp_dir = TempDir::new().unwrap();
        let result = scan_tree(&temp_dir.path().join("nope"));
        assert!(matches!(result, Err(VaultError::Scan { .. })));
    }

    #[test]
    fn test_scan_tree_root_is_a_file() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("file.txt");
        fs::write(&file, "not a dir").unwrap();

        let result = scan_tree(&file);
        assert!(matches!(result, Err(VaultError::Scan { .. })));
    }

    #[test]
    #[cfg(unix)]
    fn test_scan_tree_skips_symlinks() {
        use std::os::unix::fs::symlink;

        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("target.txt");
        fs::write(&target, "content").unwrap();
        symlink(&target, temp_dir.path().join("link.txt")).unwrap();

        let result = scan_tree(temp_dir.path()).unwrap();
        assert_eq!(result.fingerprints.len(), 1);
        assert_eq!(result.symlinks_skipped, 1);
        assert!(result.fingerprints.contains_key("target.txt"));
    }
}
