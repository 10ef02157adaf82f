use std::fs;
use std::path::PathBuf;

use tempfile::TempDir;

use super::*;
use crate::cli::Cli;
use crate::error::VaultError;

fn setup_tree() -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    let tree = temp_dir.path().join("notes");
    fs::create_dir(&tree).unwrap();
    fs::write(tree.join("a.md"), "alpha").unwrap();
    fs::write(tree.join("b.md"), "bravo").unwrap();
    temp_dir
}

fn backup_cli(root: &str) -> Cli {
    Cli::builder()
        .backup_dir("vault")
        .quiet(true)
        .command(Commands::Backup {
            root: PathBuf::from(root),
            name: None,
            full: false,
        })
        .build()
        .unwrap()
}

#[test]
fn test_backup_command_creates_manifest() {
    let temp_dir = setup_tree();

    execute_with_dir(&backup_cli("notes"), Some(temp_dir.path())).unwrap();

    let manifest = temp_dir.path().join("vault").join("snapvault.manifest");
    assert!(manifest.exists());
}

#[test]
fn test_relative_paths_resolve_against_working_dir() {
    let temp_dir = setup_tree();

    execute_with_dir(&backup_cli("notes"), Some(temp_dir.path())).unwrap();

    // Nothing lands relative to the process working directory
    assert!(temp_dir.path().join("vault").is_dir());
    assert!(!Path::new("vault").exists());
}

#[test]
fn test_backup_then_restore_roundtrip() {
    let temp_dir = setup_tree();

    execute_with_dir(&backup_cli("notes"), Some(temp_dir.path())).unwrap();

    let store = ManifestStore::open(
        temp_dir.path().join("vault"),
        std::time::Duration::from_secs(1),
    )
    .unwrap();
    let generations = store.list(None).unwrap();
    assert_eq!(generations.len(), 1);

    let restore = Cli::builder()
        .backup_dir("vault")
        .quiet(true)
        .command(Commands::Restore {
            name: generations[0].id.clone(),
            destination: Some(PathBuf::from("out")),
        })
        .build()
        .unwrap();
    execute_with_dir(&restore, Some(temp_dir.path())).unwrap();

    let out = temp_dir.path().join("out");
    assert_eq!(fs::read_to_string(out.join("a.md")).unwrap(), "alpha");
    assert_eq!(fs::read_to_string(out.join("b.md")).unwrap(), "bravo");
}

#[test]
fn test_restore_unknown_generation_fails() {
    let temp_dir = setup_tree();

    execute_with_dir(&backup_cli("notes"), Some(temp_dir.path())).unwrap();

    let restore = Cli::builder()
        .backup_dir("vault")
        .quiet(true)
        .command(Commands::Restore {
            name: "no-such-generation".to_string(),
            destination: Some(PathBuf::from("out")),
        })
        .build()
        .unwrap();
    let err = execute_with_dir(&restore, Some(temp_dir.path())).unwrap_err();
    assert!(matches!(err, VaultError::ChainResolution { .. }));
}

#[test]
fn test_compare_command_runs_against_recorded_generations() {
    let temp_dir = setup_tree();

    execute_with_dir(&backup_cli("notes"), Some(temp_dir.path())).unwrap();
    fs::write(temp_dir.path().join("notes/a.md"), "alpha v2").unwrap();
    execute_with_dir(&backup_cli("notes"), Some(temp_dir.path())).unwrap();

    let store = ManifestStore::open(
        temp_dir.path().join("vault"),
        std::time::Duration::from_secs(1),
    )
    .unwrap();
    let generations = store.list(None).unwrap();
    assert_eq!(generations.len(), 2);

    let compare = Cli::builder()
        .backup_dir("vault")
        .quiet(true)
        .command(Commands::Compare {
            base: generations[0].id.clone(),
            target: generations[1].id.clone(),
        })
        .build()
        .unwrap();
    execute_with_dir(&compare, Some(temp_dir.path())).unwrap();

    let comparison = store
        .compare(&generations[0].id, &generations[1].id)
        .unwrap();
    assert_eq!(comparison.modified, vec!["a.md".to_string()]);
    assert_eq!(comparison.unchanged, 1);

    let ghost = Cli::builder()
        .backup_dir("vault")
        .quiet(true)
        .command(Commands::Compare {
            base: generations[0].id.clone(),
            target: "no-such-generation".to_string(),
        })
        .build()
        .unwrap();
    let err = execute_with_dir(&ghost, Some(temp_dir.path())).unwrap_err();
    assert!(matches!(err, VaultError::ChainResolution { .. }));
}

#[test]
fn test_cleanup_command_is_noop_on_fresh_history() {
    let temp_dir = setup_tree();

    execute_with_dir(&backup_cli("notes"), Some(temp_dir.path())).unwrap();

    let cleanup = Cli::builder()
        .backup_dir("vault")
        .quiet(true)
        .command(Commands::Cleanup {
            keep_days: 30,
            keep_count: 10,
            dry_run: false,
        })
        .build()
        .unwrap();
    execute_with_dir(&cleanup, Some(temp_dir.path())).unwrap();

    let store = ManifestStore::open(
        temp_dir.path().join("vault"),
        std::time::Duration::from_secs(1),
    )
    .unwrap();
    assert_eq!(store.list(None).unwrap().len(), 1);
}

#[test]
fn test_list_root_filter_canonicalizes() {
    let temp_dir = setup_tree();

    execute_with_dir(&backup_cli("notes"), Some(temp_dir.path())).unwrap();

    // An uncanonical alias of the root still matches its generations
    let filter = root_filter(Path::new("./notes"), Some(temp_dir.path())).unwrap();
    let store = ManifestStore::open(
        temp_dir.path().join("vault"),
        std::time::Duration::from_secs(1),
    )
    .unwrap();
    assert_eq!(store.list(Some(&filter)).unwrap().len(), 1);
}

#[test]
fn test_list_root_filter_missing_path_fails() {
    let temp_dir = TempDir::new().unwrap();
    let err = root_filter(Path::new("absent"), Some(temp_dir.path())).unwrap_err();
    assert!(matches!(err, VaultError::Io { .. }));
}
