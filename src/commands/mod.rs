//! Implementation of snapvault subcommands.
//!
//! `mod.rs` is a thin dispatcher: it resolves paths against the working
//! directory, opens the [`ManifestStore`], and hands off to the engine that
//! owns each command's logic.

use std::path::{Path, PathBuf};

use crate::backup::BackupEngine;
use crate::cli::{Cli, Commands};
use crate::error::Result;
use crate::generation::{BackupGeneration, unix_nanos_now};
use crate::logging::Logger;
use crate::manifest::ManifestStore;
use crate::restore::RestoreEngine;
use crate::retention::{RetentionPolicy, RetentionRule};

#[cfg(test)]
mod tests;

const NANOS_PER_DAY: u128 = 86_400 * 1_000_000_000;

/// Execute commands based on the parsed CLI arguments.
pub fn execute(cli: &Cli) -> Result<()> {
    execute_with_dir(cli, None)
}

/// Execute commands with an explicit working directory.
///
/// Relative paths (the backup dir, a backup root, a restore destination)
/// resolve against `working_dir` when given, the process working directory
/// otherwise. Integration tests use this to run commands against temporary
/// trees without touching the process-wide current directory.
pub fn execute_with_dir(cli: &Cli, working_dir: Option<&Path>) -> Result<()> {
    let quiet = cli.global_opts().quiet();
    let verbose = if quiet {
        0
    } else {
        cli.global_opts().verbose()
    };
    let log = Logger::new(verbose, quiet);

    // With no explicit working directory, normalize against the process
    // CWD so errors and logs report one canonical-looking backup path.
    let backup_dir = match working_dir {
        Some(dir) => resolve(cli.global_opts().backup_dir(), Some(dir)),
        None => cli.global_opts().get_backup_dir(),
    };
    let store = ManifestStore::open(backup_dir, cli.global_opts().lock_timeout())?;

    match cli.command() {
        Commands::Backup { root, name, full } => {
            let root = resolve(root, working_dir);
            let report = BackupEngine::new(&store, log).backup(&root, name.as_deref(), !full)?;
            log.info(format!(
                "Recorded {} generation '{}': {} file{} stored, {} tombstoned, {} unchanged ({} bytes copied)",
                report.kind,
                report.generation_id,
                report.files_recorded,
                if report.files_recorded == 1 { "" } else { "s" },
                report.tombstones,
                report.unchanged,
                report.bytes_copied,
            ));
            Ok(())
        }
        Commands::Restore { name, destination } => {
            let destination = destination.as_deref().map(|dest| resolve(dest, working_dir));
            let report = RestoreEngine::new(&store, log).restore(name, destination.as_deref())?;
            log.info(format!(
                "Restored '{}' to {}: {} file{}, {} bytes, {} generation{} replayed",
                report.generation_id,
                report.destination.display(),
                report.files_restored,
                if report.files_restored == 1 { "" } else { "s" },
                report.bytes_restored,
                report.generations_applied,
                if report.generations_applied == 1 { "" } else { "s" },
            ));
            Ok(())
        }
        Commands::List { root } => {
            let root = match root {
                Some(path) => Some(root_filter(path, working_dir)?),
                None => None,
            };
            let generations = store.list(root.as_deref())?;
            print_generation_table(&generations);
            Ok(())
        }
        Commands::Compare { base, target } => {
            let comparison = store.compare(base, target)?;
            for path in &comparison.added {
                println!("A {path}");
            }
            for path in &comparison.removed {
                println!("D {path}");
            }
            for path in &comparison.modified {
                println!("M {path}");
            }
            log.info(format!(
                "'{base}' -> '{target}': {} added, {} removed, {} modified, {} unchanged",
                comparison.added.len(),
                comparison.removed.len(),
                comparison.modified.len(),
                comparison.unchanged,
            ));
            Ok(())
        }
        Commands::Cleanup {
            keep_days,
            keep_count,
            dry_run,
        } => {
            let rule = RetentionRule {
                keep_count: *keep_count,
                keep_days: *keep_days,
            };
            let report = RetentionPolicy::new(&store, log).cleanup(rule, *dry_run)?;
            if report.dry_run {
                log.info(format!(
                    "Would delete {} generation{} ({} bytes)",
                    report.generations_deleted,
                    if report.generations_deleted == 1 { "" } else { "s" },
                    report.bytes_reclaimed,
                ));
            } else {
                log.info(format!(
                    "Deleted {} generation{}, reclaimed {} bytes",
                    report.generations_deleted,
                    if report.generations_deleted == 1 { "" } else { "s" },
                    report.bytes_reclaimed,
                ));
            }
            Ok(())
        }
    }
}

fn resolve(path: &Path, working_dir: Option<&Path>) -> PathBuf {
    match working_dir {
        Some(dir) if path.is_relative() => dir.join(path),
        _ => path.to_path_buf(),
    }
}

/// Turn a `--root` filter into the canonical form generations record.
///
/// Generations store canonicalized roots, so the filter must canonicalize
/// too or an alias like `./notes` would never match.
fn root_filter(path: &Path, working_dir: Option<&Path>) -> Result<String> {
    let path = resolve(path, working_dir);
    let canonical = path
        .canonicalize()
        .map_err(|source| crate::error::VaultError::Io { path, source })?;
    canonical
        .to_str()
        .map(str::to_string)
        .ok_or_else(|| crate::error::VaultError::InvalidUtf8Path(canonical))
}

/// Print generations newest first to stdout, one line per generation.
fn print_generation_table(generations: &[BackupGeneration]) {
    if generations.is_empty() {
        println!("No generations recorded.");
        return;
    }
    let now = unix_nanos_now();
    for generation in generations.iter().rev() {
        let age_days = now.saturating_sub(generation.created_at_nanos) / NANOS_PER_DAY;
        match generation.kind.parent() {
            Some(parent) => println!(
                "{}  {:>4}d  {:11}  {} files  parent={}  {}",
                generation.id,
                age_days,
                generation.kind.label(),
                generation.live_file_count(),
                parent,
                generation.root,
            ),
            None => println!(
                "{}  {:>4}d  {:11}  {} files  {}",
                generation.id,
                age_days,
                generation.kind.label(),
                generation.live_file_count(),
                generation.root,
            ),
        }
    }
}
