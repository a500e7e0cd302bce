//! Pre-flight sanity checks for runtime environment
//!
//! This module verifies the system environment before any work starts:
//! - Binaries the install steps shell out to are present
//! - Not running as root (wine prefixes must belong to the desktop user)

use crate::error::{DedetaiError, Result};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Result of environment verification
#[derive(Debug)]
pub struct SanityCheckResult {
    pub missing_binaries: Vec<String>,
    pub is_root: bool,
    pub root_permitted: bool,
}

impl SanityCheckResult {
    /// Returns true if all checks passed
    pub fn is_ok(&self) -> bool {
        self.missing_binaries.is_empty() && (!self.is_root || self.root_permitted)
    }
}

/// Binaries the installer and winetricks cannot work without
pub const REQUIRED_BINARIES: &[&str] = &["curl", "tar", "cabextract", "unzip"];

/// Optional binaries (warn if missing but don't fail)
const OPTIONAL_BINARIES: &[&str] = &["winetricks", "xdg-open"];

pub fn is_executable(path: &Path) -> bool {
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// First executable called `name` in `dirs`.
pub fn find_in_dirs(name: &str, dirs: &[PathBuf]) -> Option<PathBuf> {
    dirs.iter().map(|d| d.join(name)).find(|p| is_executable(p))
}

/// Look up `name` on `$PATH`. Names containing `/` are checked as-is.
pub fn find_in_path(name: &str) -> Option<PathBuf> {
    if name.contains('/') {
        let path = PathBuf::from(name);
        return is_executable(&path).then_some(path);
    }
    let path = std::env::var_os("PATH")?;
    let dirs: Vec<PathBuf> = std::env::split_paths(&path).collect();
    find_in_dirs(name, &dirs)
}

/// Names from `names` that are not on `$PATH`.
pub fn missing_binaries(names: &[&str]) -> Vec<String> {
    names
        .iter()
        .filter(|name| find_in_path(name).is_none())
        .map(|name| name.to_string())
        .collect()
}

/// Check if running as root (EUID 0)
pub fn is_running_as_root() -> bool {
    nix::unistd::geteuid().is_root()
}

/// Perform all sanity checks and return the result
pub fn verify_environment(root_permitted: bool) -> SanityCheckResult {
    for binary in OPTIONAL_BINARIES {
        if find_in_path(binary).is_none() {
            debug!("Optional binary not found: {}", binary);
        }
    }

    SanityCheckResult {
        missing_binaries: missing_binaries(REQUIRED_BINARIES),
        is_root: is_running_as_root(),
        root_permitted,
    }
}

/// Fail with an error naming every missing required binary.
pub fn check_dependencies() -> Result<()> {
    let missing = missing_binaries(REQUIRED_BINARIES);
    if missing.is_empty() {
        info!("All required binaries present");
        return Ok(());
    }
    Err(DedetaiError::install(format!(
        "Missing required binaries: {}. Install them with your package manager and try again.",
        missing.join(", ")
    )))
}

/// Turn a failed check into the error `main` reports.
pub fn ensure_environment(root_permitted: bool) -> Result<()> {
    debug!("Running pre-flight sanity checks (root_permitted={})...", root_permitted);
    let result = verify_environment(root_permitted);
    if result.is_root && root_permitted {
        warn!("Running as root was explicitly permitted");
    }
    if result.is_ok() {
        info!("Pre-flight checks passed");
        return Ok(());
    }

    let mut problems = Vec::new();
    if result.is_root && !result.root_permitted {
        problems.push(
            "Running as root is not supported; the wine prefix must belong to your user \
             (pass --allow-root to override)"
                .to_string(),
        );
    }
    if !result.missing_binaries.is_empty() {
        problems.push(format!(
            "Missing required binaries: {}",
            result.missing_binaries.join(", ")
        ));
    }
    Err(DedetaiError::resource(problems.join("; ")))
}
