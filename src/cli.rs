//! Command-line interface definitions for snapvault.
//!
//! This module defines the CLI structure using clap, including all
//! subcommands and their arguments. The main entry point is the [`Cli`]
//! struct.
//!
//! # Example
//!
//! ```no_run
//! use snapvault::cli::{Cli, Commands};
//!
//! let cli = Cli::parse_args();
//!
//! match cli.command() {
//!     Commands::Backup { root, .. } => println!("Backing up {}", root.display()),
//!     Commands::Restore { name, .. } => println!("Restoring {name}"),
//!     _ => {}
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::error::{Result, VaultError};

/// Main command-line interface for snapvault.
#[derive(Parser)]
#[command(
    name = "snapvault",
    bin_name = "snapvault",
    author,
    version,
    about = "Content-versioned incremental backup and restore for directory trees",
    long_about = None,
    propagate_version = true
)]
pub struct Cli {
    #[command(flatten)]
    global_opts: GlobalOpts,

    #[command(subcommand)]
    command: Commands,
}

/// Global options that apply to all snapvault commands.
#[derive(Parser)]
pub struct GlobalOpts {
    /// Directory holding the manifest and all generation content
    #[arg(
        long,
        global = true,
        default_value = "backups",
        env = "SNAPVAULT_BACKUP_DIR"
    )]
    backup_dir: PathBuf,

    /// Seconds to wait for the manifest lock before giving up
    #[arg(
        long,
        global = true,
        default_value = "10",
        env = "SNAPVAULT_LOCK_TIMEOUT_SECS"
    )]
    lock_timeout_secs: u64,

    /// Enable verbose output (use multiple times for more verbosity)
    #[arg(short, long, global = true, action = clap::ArgAction::Count, env = "SNAPVAULT_VERBOSE")]
    verbose: u8,

    /// Silence all output except for errors
    #[arg(
        short,
        long,
        global = true,
        conflicts_with = "verbose",
        env = "SNAPVAULT_QUIET"
    )]
    quiet: bool,
}

impl GlobalOpts {
    /// Create a new builder for constructing `GlobalOpts` programmatically.
    pub fn builder() -> GlobalOptsBuilder {
        GlobalOptsBuilder::default()
    }

    /// Get the absolute backup directory path
    pub fn get_backup_dir(&self) -> PathBuf {
        normalize_path(&self.backup_dir)
    }

    /// Get the backup directory as given
    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Get the manifest lock timeout
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    /// Get the verbose level
    pub fn verbose(&self) -> u8 {
        self.verbose
    }

    /// Check if quiet mode is enabled
    pub fn quiet(&self) -> bool {
        self.quiet
    }
}

/// Builder for constructing `GlobalOpts` without command-line parsing,
/// for tests and library callers.
#[derive(Default)]
pub struct GlobalOptsBuilder {
    backup_dir: Option<PathBuf>,
    lock_timeout_secs: Option<u64>,
    verbose: u8,
    quiet: bool,
}

impl GlobalOptsBuilder {
    /// Set the backup directory path.
    pub fn backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = Some(dir.into());
        self
    }

    /// Set the manifest lock timeout in seconds.
    pub fn lock_timeout_secs(mut self, secs: u64) -> Self {
        self.lock_timeout_secs = Some(secs);
        self
    }

    /// Set the verbosity level (0 = normal, 1+ = verbose).
    pub fn verbose(mut self, level: u8) -> Self {
        self.verbose = level;
        self
    }

    /// Enable or disable quiet mode.
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Build the `GlobalOpts` instance with the configured values.
    pub fn build(self) -> GlobalOpts {
        GlobalOpts {
            backup_dir: self.backup_dir.unwrap_or_else(|| PathBuf::from("backups")),
            lock_timeout_secs: self.lock_timeout_secs.unwrap_or(10),
            verbose: self.verbose,
            quiet: self.quiet,
        }
    }
}

impl Cli {
    /// Get the global options
    pub fn global_opts(&self) -> &GlobalOpts {
        &self.global_opts
    }

    /// Get the command
    pub fn command(&self) -> &Commands {
        &self.command
    }

    /// Create a builder for programmatic construction
    pub fn builder() -> CliBuilder {
        CliBuilder::default()
    }

    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Builder for [`Cli`]
#[derive(Debug, Default)]
pub struct CliBuilder {
    backup_dir: Option<PathBuf>,
    lock_timeout_secs: Option<u64>,
    verbose: u8,
    quiet: bool,
    command: Option<Commands>,
}

impl CliBuilder {
    /// Set the backup directory
    pub fn backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = Some(dir.into());
        self
    }

    /// Set the manifest lock timeout in seconds
    pub fn lock_timeout_secs(mut self, secs: u64) -> Self {
        self.lock_timeout_secs = Some(secs);
        self
    }

    /// Set the verbose level
    pub fn verbose(mut self, level: u8) -> Self {
        self.verbose = level;
        self
    }

    /// Enable quiet mode
    pub fn quiet(mut self, enabled: bool) -> Self {
        self.quiet = enabled;
        self
    }

    /// Set the command
    pub fn command(mut self, command: Commands) -> Self {
        self.command = Some(command);
        self
    }

    /// Build the Cli instance
    pub fn build(self) -> Result<Cli> {
        let command = self
            .command
            .ok_or_else(|| VaultError::Config("Command is required".to_string()))?;

        let mut builder = GlobalOpts::builder()
            .backup_dir(self.backup_dir.unwrap_or_else(|| PathBuf::from("backups")))
            .verbose(self.verbose)
            .quiet(self.quiet);
        if let Some(secs) = self.lock_timeout_secs {
            builder = builder.lock_timeout_secs(secs);
        }

        Ok(Cli {
            global_opts: builder.build(),
            command,
        })
    }
}

/// Normalize a path to be absolute and clean, without requiring it to exist.
///
/// This function:
/// - Converts relative paths to absolute using the current directory
/// - Removes `.` and `..` components where possible
/// - Does NOT resolve symlinks (preserves user intent)
/// - Does NOT require the path to exist
fn normalize_path(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();

    let absolute = if path.is_relative() {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    } else {
        path.to_path_buf()
    };

    let mut components = Vec::new();
    for component in absolute.components() {
        use std::path::Component;
        match component {
            Component::ParentDir => {
                if let Some(last) = components.last()
                    && !matches!(last, Component::ParentDir)
                {
                    components.pop();
                    continue;
                }
                components.push(component);
            }
            Component::CurDir => {
                continue;
            }
            _ => components.push(component),
        }
    }

    let mut result = PathBuf::new();
    for component in components {
        result.push(component);
    }

    result
}

/// Available snapvault subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Back up a directory tree as a new generation
    ///
    /// Scans the tree, fingerprints every file with a BLAKE3 content
    /// digest, and records a new generation:
    /// - The first backup of a root is always a full, self-contained
    ///   snapshot
    /// - Later backups record only changed and new files, plus tombstones
    ///   for removed ones
    /// - Use --full to force a self-contained snapshot at any time
    Backup {
        /// The directory tree to back up
        root: PathBuf,

        /// Explicit generation name (default: time-derived)
        #[arg(long, env = "SNAPVAULT_BACKUP_NAME")]
        name: Option<String>,

        /// Force a full (non-incremental) generation
        #[arg(long, env = "SNAPVAULT_FULL")]
        full: bool,
    },

    /// Restore a generation exactly
    ///
    /// Resolves the generation's dependency chain back to its full
    /// snapshot, replays it into a staging area, verifies every file
    /// against its recorded fingerprint, and atomically swaps the result
    /// into the destination. A failed restore never touches the
    /// destination.
    Restore {
        /// Name of the generation to restore
        name: String,

        /// Where to place the restored tree (default: the backed-up root)
        #[arg(long)]
        destination: Option<PathBuf>,
    },

    /// List backup generations, newest first
    List {
        /// Only list generations of this root
        #[arg(long)]
        root: Option<PathBuf>,
    },

    /// Compare the effective states of two generations
    ///
    /// Resolves each generation's chain back to its full snapshot and
    /// diffs the resulting file states: which files were added, removed
    /// or modified between the two points in history. Content equality
    /// is digest equality, so a touched but unmodified file does not
    /// count as a change.
    Compare {
        /// The older generation to compare from
        base: String,

        /// The newer generation to compare against
        target: String,
    },

    /// Delete old generations while preserving chain integrity
    ///
    /// Retains the newest --keep-count generations per root plus
    /// everything newer than --keep-days, then expands that set to every
    /// ancestor a retained generation needs. Only generations outside the
    /// expanded set are deleted, so a restore of any surviving generation
    /// always works.
    Cleanup {
        /// Retain everything newer than this many days
        #[arg(long, default_value = "30", env = "SNAPVAULT_KEEP_DAYS")]
        keep_days: u64,

        /// Minimum number of newest generations to retain per root
        #[arg(long, default_value = "10", env = "SNAPVAULT_KEEP_COUNT")]
        keep_count: usize,

        /// Show what would be deleted without actually deleting
        #[arg(long, env = "SNAPVAULT_DRY_RUN")]
        dry_run: bool,
    },
}
