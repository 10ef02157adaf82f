use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::error::{Result, VaultError};

/// Poll interval while waiting for a contended lock.
const RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Exclusive, timeout-bounded lock over a manifest.
///
/// The lock is a sibling lockfile created with `create_new`, which is atomic
/// on every platform we care about. Acquisition retries until the timeout
/// elapses, then fails with `LockTimeout` instead of blocking forever. The
/// lockfile is removed on drop, so every exit path (including panics
/// unwinding through engine code) releases the lock.
#[derive(Debug)]
pub struct ManifestLock {
    path: PathBuf,
}

impl ManifestLock {
    /// Acquires the lock at `path`, waiting up to `timeout`.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self> {
        let start = Instant::now();

        loop {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    // Owner pid, purely informational for whoever finds a
                    // stale lockfile after a hard kill.
                    let _ = writeln!(file, "{}", std::process::id());
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    if start.elapsed() >= timeout {
                        return Err(VaultError::LockTimeout {
                            path: path.to_path_buf(),
                            waited_secs: timeout.as_secs(),
                        });
                    }
                    std::thread::sleep(RETRY_INTERVAL.min(timeout));
                }
                Err(source) => {
                    return Err(VaultError::Io {
                        path: path.to_path_buf(),
                        source,
                    });
                }
            }
        }
    }
}

impl Drop for ManifestLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_acquire_and_release() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("manifest.lock");

        {
            let _lock = ManifestLock::acquire(&lock_path, Duration::from_secs(1)).unwrap();
            assert!(lock_path.exists());
        }

        // Dropped: the file is gone and the lock can be re-taken.
        assert!(!lock_path.exists());
        let _lock = ManifestLock::acquire(&lock_path, Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn test_contention_times_out() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("manifest.lock");

        let _held = ManifestLock::acquire(&lock_path, Duration::from_secs(1)).unwrap();
        let result = ManifestLock::acquire(&lock_path, Duration::from_millis(120));
        assert!(matches!(result, Err(VaultError::LockTimeout { .. })));
    }

    #[test]
    fn test_waiter_gets_lock_after_release() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("manifest.lock");

        let held = ManifestLock::acquire(&lock_path, Duration::from_secs(1)).unwrap();

        let waiter_path = lock_path.clone();
        let waiter = std::thread::spawn(move || {
            ManifestLock::acquire(&waiter_path, Duration::from_secs(5))
        });

        std::thread::sleep(Duration::from_millis(100));
        drop(held);

        assert!(waiter.join().unwrap().is_ok());
    }
}
