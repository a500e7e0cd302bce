//! Maintenance operations on an installed product.

use crate::command_runner::CommandRunner;
use crate::config::{Config, state_dir};
use crate::error::Result;
use crate::fs_utils::remove_path;
use crate::wine::Wine;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

/// Index folders under `Data/<account>/`
pub const INDEX_DIRS: &[&str] = &["BibleIndex", "LibraryIndex", "PersonalBookIndex", "LibraryCatalog"];

/// Entries of `Data/*/<sub>/` for each of `subdirs`.
fn index_entries(app_data: &Path, subdirs: &[&str]) -> Vec<PathBuf> {
    let Ok(accounts) = fs::read_dir(app_data.join("Data")) else {
        return Vec::new();
    };
    let mut entries = Vec::new();
    for account in accounts.flatten() {
        for sub in subdirs {
            let Ok(files) = fs::read_dir(account.path().join(sub)) else {
                continue;
            };
            entries.extend(files.flatten().map(|f| f.path()));
        }
    }
    entries.sort();
    entries
}

/// Delete the given entries, logging failures. Returns how many went.
fn remove_entries(entries: &[PathBuf]) -> usize {
    let mut removed = 0;
    for entry in entries {
        match remove_path(entry) {
            Ok(()) => {
                info!("Removed: {}", entry.display());
                removed += 1;
            }
            Err(e) => error!("Error removing {}: {}", entry.display(), e),
        }
    }
    removed
}

/// Remove every search index and the library catalog under `app_data`.
pub fn remove_index_files_in(app_data: &Path) -> usize {
    remove_entries(&index_entries(app_data, INDEX_DIRS))
}

/// Remove only the library catalog under `app_data`.
pub fn remove_library_catalog_in(app_data: &Path) -> usize {
    remove_entries(&index_entries(app_data, &["LibraryCatalog"]))
}

pub fn remove_all_index_files(config: &mut Config) -> Result<usize> {
    let app_data = config.app_data_dir()?;
    let removed = remove_index_files_in(&app_data);
    config
        .frontend()
        .status(&format!("Removed {removed} index files"), None);
    Ok(removed)
}

pub fn remove_library_catalog(config: &mut Config) -> Result<usize> {
    let app_data = config.app_data_dir()?;
    let removed = remove_library_catalog_in(&app_data);
    config
        .frontend()
        .status(&format!("Removed {removed} library catalog files"), None);
    Ok(removed)
}

/// Flip the product's own logging in the registry and remember the choice.
pub fn toggle_product_logging(config: &mut Config, runner: Arc<dyn CommandRunner>) -> Result<bool> {
    let enabled = !config.product_logging();
    let wine = Wine::new(config.wine_env()?, runner);
    wine.set_app_logging(enabled)?;
    config.set_product_logging(enabled);
    let state = if enabled { "enabled" } else { "disabled" };
    let product = config.product()?;
    config
        .frontend()
        .status(&format!("{product} logging {state}"), None);
    Ok(enabled)
}

/// Remove the configuration and the installation after confirmation.
/// Returns false when the user declined.
pub fn uninstall(config: &mut Config) -> Result<bool> {
    let mut paths = vec![config.config_path().to_path_buf(), config.install_dir()?];
    let listing = paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" ");
    let frontend = Arc::clone(config.frontend());
    if !frontend.approve(
        "Are you sure you want to uninstall?",
        Some(&format!("We're about to run:\n\nrm -rf {listing}")),
    )? {
        info!("User refused to uninstall");
        return Ok(false);
    }
    if frontend.approve("Do you also want to clear the logs?", None)? {
        paths.push(state_dir());
    }

    for path in &paths {
        remove_path(path)?;
        info!("Removed {}", path.display());
    }
    frontend.status("Uninstalled", None);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn populate(app_data: &Path) {
        for sub in ["BibleIndex", "LibraryIndex", "LibraryCatalog", "Documents"] {
            let dir = app_data.join("Data/acct1").join(sub);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("file.db"), b"x").unwrap();
        }
        fs::create_dir_all(app_data.join("Data/acct2/PersonalBookIndex/nested")).unwrap();
    }

    #[test]
    fn test_remove_index_files_keeps_other_data() {
        let dir = TempDir::new().unwrap();
        populate(dir.path());

        assert_eq!(remove_index_files_in(dir.path()), 4);
        assert!(dir.path().join("Data/acct1/BibleIndex").is_dir());
        assert!(!dir.path().join("Data/acct1/BibleIndex/file.db").exists());
        assert!(!dir.path().join("Data/acct2/PersonalBookIndex/nested").exists());
        assert!(dir.path().join("Data/acct1/Documents/file.db").exists());
    }

    #[test]
    fn test_remove_library_catalog_only() {
        let dir = TempDir::new().unwrap();
        populate(dir.path());

        assert_eq!(remove_library_catalog_in(dir.path()), 1);
        assert!(!dir.path().join("Data/acct1/LibraryCatalog/file.db").exists());
        assert!(dir.path().join("Data/acct1/LibraryIndex/file.db").exists());
    }

    #[test]
    fn test_missing_data_dir_removes_nothing() {
        let dir = TempDir::new().unwrap();
        assert_eq!(remove_index_files_in(dir.path()), 0);
    }
}
