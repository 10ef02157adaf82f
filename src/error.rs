//! Error types for snapvault.
//!
//! This module defines all error types used throughout snapvault, using
//! a combination of `thiserror` for ergonomic error definitions and `miette`
//! for rich diagnostic output.
//!
//! # Error Handling Strategy
//!
//! - All errors derive from [`VaultError`]
//! - Each variant includes helpful error messages and diagnostic codes
//! - Context is preserved through the error chain
//! - Errors are automatically converted to `miette::Result` for CLI output
//!
//! Mutating operations are all-or-nothing: any error leaves the manifest and
//! every restore destination exactly as they were before the call.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Error types that can occur in snapvault operations
#[derive(Error, Debug, Diagnostic)]
pub enum VaultError {
    /// The backup root cannot be scanned.
    ///
    /// Raised when the directory passed to `backup` does not exist, is not a
    /// directory, or cannot be read at all.
    #[error("Cannot scan backup root '{path}'")]
    #[diagnostic(
        code(snapvault::scan::unreadable_root),
        help("Ensure the path exists, is a directory, and is readable.")
    )]
    Scan {
        /// The root that could not be scanned
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A file became unreadable while its content digest was being computed.
    ///
    /// The scan fingerprints every regular file in the tree; a file that is
    /// deleted or loses read permission mid-scan surfaces here rather than
    /// being silently dropped from the snapshot.
    #[error("Failed to hash file '{path}'")]
    #[diagnostic(
        code(snapvault::scan::hash_error),
        help("The file may have been removed or had its permissions changed mid-scan.")
    )]
    Hash {
        /// The file that could not be hashed
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A loaded manifest failed structural validation.
    ///
    /// The manifest is the authoritative index of every backup generation.
    /// A record that cannot be decoded, carries an unsupported version, or
    /// violates the structural rules (duplicate ids, tombstones with content
    /// pointers) must fail loudly: repairing or dropping it silently could
    /// detach restorable data.
    #[error("Manifest at '{path}' is corrupt: {message}")]
    #[diagnostic(
        code(snapvault::manifest::corrupt),
        help(
            "The manifest cannot be repaired automatically. Restore it from a copy or move it \
             aside and re-create your backups."
        )
    )]
    ManifestCorruption {
        /// Path of the manifest file
        path: PathBuf,
        /// Description of the validation failure
        message: String,
    },

    /// A generation's parent chain cannot be resolved.
    ///
    /// Raised when `restore` or chain resolution encounters an unknown
    /// generation id or a parent link that no longer resolves.
    #[error("Cannot resolve generation chain for '{generation}': {message}")]
    #[diagnostic(
        code(snapvault::manifest::chain_resolution),
        help("Use 'snapvault list' to see the generations that exist.")
    )]
    ChainResolution {
        /// The generation whose chain failed to resolve
        generation: String,
        /// Description of the broken link
        message: String,
    },

    /// An explicit backup name is already taken.
    ///
    /// Generation ids are the global lookup key for restore, so an explicit
    /// `--name` must not collide with any existing generation. Detected
    /// before any content is copied.
    #[error("A backup named '{0}' already exists")]
    #[diagnostic(
        code(snapvault::backup::name_collision),
        help("Pick a different --name, or omit it to get a time-derived name.")
    )]
    NameCollision(
        /// The colliding generation name
        String,
    ),

    /// An explicit backup name cannot be used as a generation id.
    ///
    /// Generation ids double as directory names inside the backup
    /// directory, so a name must be a single normal path component:
    /// no separators, no dot segments, no leading dot, and not one of
    /// the store's own file names.
    #[error("Invalid backup name '{0}'")]
    #[diagnostic(
        code(snapvault::backup::invalid_name),
        help("Use a single path component without '/', '\\' or leading dots.")
    )]
    InvalidName(
        /// The rejected name
        String,
    ),

    /// A restored file's fingerprint does not match the manifest.
    ///
    /// After replaying the full chain into the staging area, every staged
    /// file is re-fingerprinted and compared against what chain resolution
    /// predicts. On mismatch the staged tree is discarded and the live
    /// destination is left untouched.
    #[error("Restore verification failed for '{path}' in generation '{generation}'")]
    #[diagnostic(
        code(snapvault::restore::verification_failed),
        help(
            "The backed-up content no longer matches its recorded fingerprint. The backup store \
             may have been modified or damaged."
        )
    )]
    RestoreVerification {
        /// Relative path of the mismatched file
        path: String,
        /// The generation being restored
        generation: String,
    },

    /// Retention attempted to delete a generation that is still required.
    ///
    /// The chain-closure rule guarantees this can never happen; if it does,
    /// it is an internal invariant failure, not a user error.
    #[error("Internal error: retention attempted to delete required generation '{generation}'")]
    #[diagnostic(
        code(snapvault::retention::violation),
        help("This is a bug in snapvault. No data has been deleted; please report it.")
    )]
    RetentionViolation {
        /// The protected generation that was about to be deleted
        generation: String,
    },

    /// The manifest lock could not be acquired within the timeout.
    ///
    /// All mutating operations serialize through an exclusive lockfile next
    /// to the manifest. A concurrent backup or cleanup holding the lock past
    /// the timeout surfaces here instead of blocking forever.
    #[error("Timed out after {waited_secs}s waiting for manifest lock '{path}'")]
    #[diagnostic(
        code(snapvault::manifest::lock_timeout),
        help(
            "Another snapvault invocation holds the lock. Retry later, or remove the lockfile if \
             you are certain no other invocation is running."
        )
    )]
    LockTimeout {
        /// Path of the lockfile
        path: PathBuf,
        /// Seconds waited before giving up
        waited_secs: u64,
    },

    /// Generic I/O failure while writing the backup store.
    #[error("Backup failed at '{path}'")]
    #[diagnostic(
        code(snapvault::backup::io_error),
        help("Check free disk space and permissions on the backup directory.")
    )]
    Backup {
        /// The path being written when the failure occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Generic I/O failure while writing the restore destination.
    #[error("Restore failed at '{path}'")]
    #[diagnostic(
        code(snapvault::restore::io_error),
        help("Check free disk space and permissions on the destination.")
    )]
    Restore {
        /// The path being written when the failure occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// File system I/O error during snapvault operations.
    ///
    /// Common causes: permission denied, file not found, disk full. Used
    /// for manifest and lockfile access outside the backup/restore
    /// boundaries.
    #[error("I/O error accessing '{path}'")]
    #[diagnostic(code(snapvault::io_error))]
    Io {
        /// The path that caused the I/O error
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to serialize the manifest to rkyv format.
    #[error("Failed to serialize manifest")]
    #[diagnostic(code(snapvault::manifest::serialization_error))]
    Serialization(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A scanned path cannot be represented as UTF-8.
    ///
    /// Manifest records store paths as UTF-8 strings, so files with
    /// non-UTF-8 names cannot be backed up.
    #[error("Invalid UTF-8 in path: {0}")]
    #[diagnostic(
        code(snapvault::path::invalid_utf8),
        help("Rename the file to a valid UTF-8 name before backing it up.")
    )]
    InvalidUtf8Path(
        /// The path containing invalid UTF-8
        PathBuf,
    ),

    /// Invalid configuration or CLI usage.
    #[error("Configuration error: {0}")]
    #[diagnostic(code(snapvault::config::error))]
    Config(
        /// Description of the configuration error
        String,
    ),
}

/// Type alias for Results in this crate
pub type Result<T> = std::result::Result<T, VaultError>;
