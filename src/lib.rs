//! # snapvault
//!
//! Content-versioned incremental backup and restore for directory trees.
//!
//! ## Overview
//!
//! snapvault snapshots a directory tree into named *generations*. Change
//! detection is content-based: every file is fingerprinted with a BLAKE3
//! digest, so a rewritten timestamp alone never causes a file to be
//! re-stored. The first backup of a root is a full, self-contained
//! snapshot; subsequent backups record only the delta (changed and new
//! files, plus tombstones for deleted ones) against the previous
//! generation's resolved state.
//!
//! ## Key Features
//!
//! - **Content-based change detection**: BLAKE3 digests decide what gets
//!   copied, not timestamps
//! - **Incremental generations**: unchanged content is stored once and
//!   referenced through the chain
//! - **Verified, atomic restores**: every restored file is re-hashed
//!   against its recorded digest in a staging area before the destination
//!   is swapped
//! - **Chain-safe retention**: cleanup never deletes a generation that a
//!   retained generation still depends on
//! - **Zero-copy manifest loading**: rkyv deserialization over a
//!   memory-mapped manifest
//! - **Parallel hashing and copying**: rayon across the scanned tree
//!
//! ## Architecture
//!
//! - [`cli`]: Command-line interface definitions using clap
//! - [`commands`]: Dispatch from parsed CLI arguments to the engines
//! - [`error`]: Error types with thiserror + miette diagnostics
//! - [`generation`]: The manifest data model (generations, file records,
//!   chain resolution)
//! - [`manifest`]: Durable manifest persistence with locking and atomic
//!   replace
//! - [`backup`]: Scan, diff, and commit of new generations
//! - [`restore`]: Chain replay, verification, and atomic swap-in
//! - [`retention`]: Age/count cleanup constrained by chain closure
//!
//! Internal modules (not part of the public API):
//! - `scan`: Directory walking and chunked BLAKE3 fingerprinting
//! - `diff`: Pure diff of a scanned tree against a resolved parent state
//! - `lock`: Lock-file based mutual exclusion for manifest mutations
//! - `logging`: Verbosity-gated stderr output ([`Logger`] is re-exported)
//!
//! ## Library Usage
//!
//! snapvault is primarily a CLI tool, but the engines are usable directly:
//!
//! ```no_run
//! use std::path::Path;
//! use std::time::Duration;
//!
//! use snapvault::Logger;
//! use snapvault::backup::BackupEngine;
//! use snapvault::manifest::ManifestStore;
//!
//! let store = ManifestStore::open("backups", Duration::from_secs(10))?;
//! let log = Logger::new(0, false);
//! let report = BackupEngine::new(&store, log).backup(Path::new("notes"), None, true)?;
//! println!("recorded {}", report.generation_id);
//! # Ok::<(), snapvault::error::VaultError>(())
//! ```
//!
//! ## Error Handling
//!
//! The crate uses a combination of:
//! - `thiserror` for strongly-typed errors
//! - `miette` for rich diagnostic output in CLI
//!
//! All public functions return `Result` types with descriptive error variants.

// Re-export public modules for library usage
pub mod backup;
pub mod cli;
pub mod commands;
pub mod error;
pub mod generation;
pub mod manifest;
pub mod restore;
pub mod retention;

// Internal modules
mod diff;
mod lock;
mod logging;
mod scan;

pub use diff::StateComparison;
pub use logging::Logger;
