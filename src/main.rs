//! # snapvault CLI
//!
//! The command-line interface for snapvault, a content-versioned backup
//! tool that snapshots directory trees into restorable generations using
//! BLAKE3-based change detection.
//!
//! ## Commands
//!
//! - **backup**: Record a new generation of a directory tree
//! - **restore**: Rebuild a generation exactly, verified, via atomic swap
//! - **list**: Show recorded generations, newest first
//! - **compare**: Diff the effective states of two generations
//! - **cleanup**: Delete old generations without breaking any chain
//!
//! ## Quick Start
//!
//! ```bash
//! # First backup of a tree is a full snapshot
//! snapvault backup ~/notes
//!
//! # Later backups store only what changed
//! snapvault backup ~/notes
//!
//! # Bring back any generation, exactly as recorded
//! snapvault restore gen-01761234567890123456 --destination /tmp/notes
//!
//! # Trim history, keeping the newest 10 generations and 30 days
//! snapvault cleanup
//! ```
//!
//! ## Environment Variables
//!
//! - `SNAPVAULT_BACKUP_DIR`: Override the backup directory (default: ./backups)
//! - `SNAPVAULT_LOCK_TIMEOUT_SECS`: Manifest lock wait before giving up
//! - `SNAPVAULT_VERBOSE`: Enable verbose output
//! - `SNAPVAULT_QUIET`: Silence all output except errors
//!
//! See individual commands for more environment variables.

use std::io::IsTerminal;

use snapvault::cli::Cli;

fn main() -> miette::Result<()> {
    // Install miette's fancy panic and error report handler
    miette::set_panic_hook();

    // Configure miette handler based on terminal capabilities
    // This provides better error formatting for both TTY and non-TTY environments
    if std::io::stderr().is_terminal() {
        miette::set_hook(Box::new(|_| {
            Box::new(
                miette::GraphicalReportHandler::new()
                    .with_theme(miette::GraphicalTheme::unicode_nocolor())
                    .with_context_lines(3),
            )
        }))?;
    } else {
        // Use a simpler handler for non-TTY environments (CI, logs, etc.)
        miette::set_hook(Box::new(|_| {
            Box::new(
                miette::GraphicalReportHandler::new()
                    .with_theme(miette::GraphicalTheme::none())
                    .with_context_lines(0),
            )
        }))?;
    }

    // Parse command line arguments
    let cli = Cli::parse_args();

    // Execute the appropriate command
    let result = snapvault::commands::execute(&cli);

    // Convert our error type to miette's Result
    result.map_err(Into::into)
}
