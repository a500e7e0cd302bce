//! Backup and restore of the product's user data
//!
//! Only the `Data`, `Documents` and `Users` folders under the product's
//! app data directory are transferred. A run sizes the source, checks the
//! destination filesystem has room, then copies on a worker thread while
//! the calling thread reports progress from the growth of the destination
//! filesystem and watches the interrupt flag.

use crate::config::{Config, ConfigField};
use crate::error::{DedetaiError, Result};
use crate::frontend::FrontEnd;
use crate::fs_utils::{copy_tree, dir_size, remove_path};
use crate::progress::progress_percent;
use crate::types::{BackupMode, Product};
use nix::sys::statvfs::statvfs;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Folders transferred by a backup, relative to the app data directory
pub const DATA_DIRS: &[&str] = &["Data", "Documents", "Users"];

/// How often progress is sampled while copying
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// `<product>-YYYYMMDDTHHMMSS`
pub fn backup_dir_name(product: Product, now: chrono::DateTime<chrono::Local>) -> String {
    format!("{product}-{}", now.format("%Y%m%dT%H%M%S"))
}

/// Filesystem usage of the disk holding a path.
pub trait DiskUsage: Send + Sync {
    fn used_bytes(&self, path: &Path) -> Result<u64>;
    fn available_bytes(&self, path: &Path) -> Result<u64>;
}

/// [`DiskUsage`] backed by `statvfs(3)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatvfsUsage;

impl DiskUsage for StatvfsUsage {
    fn used_bytes(&self, path: &Path) -> Result<u64> {
        let stat = statvfs(path)
            .map_err(|e| DedetaiError::resource(format!("statvfs {}: {e}", path.display())))?;
        let blocks = stat.blocks() as u64;
        let free = stat.blocks_free() as u64;
        Ok(blocks.saturating_sub(free) * stat.fragment_size() as u64)
    }

    fn available_bytes(&self, path: &Path) -> Result<u64> {
        let stat = statvfs(path)
            .map_err(|e| DedetaiError::resource(format!("statvfs {}: {e}", path.display())))?;
        Ok(stat.blocks_available() as u64 * stat.fragment_size() as u64)
    }
}

/// What to copy where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupPlan {
    pub mode: BackupMode,
    pub product: Product,
    /// App data dir (backup) or a backup folder (restore)
    pub source: PathBuf,
    /// Backups root (backup) or app data dir (restore)
    pub destination: PathBuf,
}

/// Outcome of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupReport {
    pub destination: PathBuf,
    pub total_bytes: u64,
    pub bytes_copied: u64,
}

/// Subset of [`DATA_DIRS`] present under `root`.
pub fn existing_data_dirs(root: &Path) -> Vec<&'static str> {
    DATA_DIRS
        .iter()
        .copied()
        .filter(|d| root.join(d).is_dir())
        .collect()
}

/// `<product>-*` folders under `root`, in ascending name order.
pub fn list_backups(root: &Path, product: Product) -> Result<Vec<PathBuf>> {
    let prefix = format!("{product}-");
    let mut backups: Vec<PathBuf> = fs::read_dir(root)?
        .flatten()
        .filter(|e| e.path().is_dir())
        .filter(|e| e.file_name().to_string_lossy().starts_with(&prefix))
        .map(|e| e.path())
        .collect();
    backups.sort();
    Ok(backups)
}

pub struct BackupEngine {
    frontend: Arc<dyn FrontEnd>,
    disk: Arc<dyn DiskUsage>,
    interrupt: Arc<AtomicBool>,
    poll_interval: Duration,
    clock: fn() -> chrono::DateTime<chrono::Local>,
}

impl BackupEngine {
    pub fn new(frontend: Arc<dyn FrontEnd>, interrupt: Arc<AtomicBool>) -> Self {
        Self {
            frontend,
            disk: Arc::new(StatvfsUsage),
            interrupt,
            poll_interval: POLL_INTERVAL,
            clock: chrono::Local::now,
        }
    }

    /// Source of the timestamp in new backup folder names.
    pub fn with_clock(mut self, clock: fn() -> chrono::DateTime<chrono::Local>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_disk(mut self, disk: Arc<dyn DiskUsage>) -> Self {
        self.disk = disk;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Execute `plan`. Nothing at the destination changes unless there is
    /// data to copy.
    pub fn run(&self, plan: &BackupPlan) -> Result<BackupReport> {
        let verb = match plan.mode {
            BackupMode::Backup => "Backing up",
            BackupMode::Restore => "Restoring",
        };

        let present = existing_data_dirs(&plan.source);
        if present.is_empty() {
            return Err(DedetaiError::nothing_to_do(format!(
                "none of {DATA_DIRS:?} found in {}",
                plan.source.display()
            )));
        }

        let total: u64 = present.iter().map(|d| dir_size(&plan.source.join(d))).sum();
        if total == 0 {
            return Err(DedetaiError::nothing_to_do(format!(
                "{} contains no data",
                plan.source.display()
            )));
        }
        info!("{} {} bytes from {}", verb, total, plan.source.display());

        let (destination, created) = self.prepare_destination(plan)?;

        if plan.mode == BackupMode::Restore {
            for dir in DATA_DIRS {
                let target = destination.join(dir);
                if target.exists() {
                    debug!("Removing {}", target.display());
                    remove_path(&target)?;
                }
            }
        }
        let baseline = self.disk.used_bytes(&destination)?;

        let available = self.disk.available_bytes(&destination)?;
        if available < total {
            if created {
                if let Err(e) = fs::remove_dir(&destination) {
                    warn!("Could not remove {}: {}", destination.display(), e);
                }
            }
            return Err(DedetaiError::resource(format!(
                "not enough space at {}: need {} bytes, {} available",
                destination.display(),
                total,
                available
            )));
        }

        let bytes_copied = self.copy_with_progress(plan, &present, &destination, baseline, total, verb)?;
        self.frontend
            .status(&format!("{verb} finished: {}", destination.display()), Some(100));
        Ok(BackupReport {
            destination,
            total_bytes: total,
            bytes_copied,
        })
    }

    fn prepare_destination(&self, plan: &BackupPlan) -> Result<(PathBuf, bool)> {
        match plan.mode {
            BackupMode::Backup => {
                let destination = plan
                    .destination
                    .join(backup_dir_name(plan.product, (self.clock)()));
                create_dir(&plan.destination)?;
                fs::create_dir(&destination).map_err(|e| match e.kind() {
                    ErrorKind::AlreadyExists => DedetaiError::resource(format!(
                        "backup folder {} already exists",
                        destination.display()
                    )),
                    ErrorKind::PermissionDenied => DedetaiError::resource(format!(
                        "permission denied creating {}",
                        destination.display()
                    )),
                    _ => e.into(),
                })?;
                Ok((destination, true))
            }
            BackupMode::Restore => {
                create_dir(&plan.destination)?;
                Ok((plan.destination.clone(), false))
            }
        }
    }

    fn copy_with_progress(
        &self,
        plan: &BackupPlan,
        present: &[&'static str],
        destination: &Path,
        baseline: u64,
        total: u64,
        verb: &str,
    ) -> Result<u64> {
        let cancel = Arc::new(AtomicBool::new(false));
        let worker = {
            let cancel = Arc::clone(&cancel);
            let source = plan.source.clone();
            let destination = destination.to_path_buf();
            let dirs: Vec<&'static str> = present.to_vec();
            thread::spawn(move || -> Result<u64> {
                let mut copied = 0;
                for dir in dirs {
                    copied += copy_tree(&source.join(dir), &destination.join(dir), &cancel)?;
                }
                Ok(copied)
            })
        };

        let mut shown = 0u8;
        loop {
            if self.interrupt.load(Ordering::SeqCst) {
                cancel.store(true, Ordering::SeqCst);
                let _ = worker.join();
                return Err(DedetaiError::cancelled(format!(
                    "{verb} interrupted, {} left as is",
                    destination.display()
                )));
            }
            if worker.is_finished() {
                break;
            }
            let used = self.disk.used_bytes(destination).unwrap_or(baseline);
            shown = shown.max(progress_percent(used.saturating_sub(baseline), total));
            self.frontend.status(&format!("{verb}…"), Some(shown));
            thread::sleep(self.poll_interval);
        }

        worker
            .join()
            .map_err(|_| DedetaiError::general("copy worker panicked"))?
    }
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| match e.kind() {
        ErrorKind::PermissionDenied => {
            DedetaiError::resource(format!("permission denied creating {}", path.display()))
        }
        _ => e.into(),
    })
}

/// Confirm or re-choose the backups folder, then make sure it exists.
pub fn prepare_backup_root(config: &mut Config) -> Result<PathBuf> {
    if let Some(dir) = config.peek(ConfigField::BackupDir) {
        let reuse = config
            .frontend()
            .approve(&format!("Use existing backups folder \"{dir}\"?"), None)?;
        if !reuse {
            config.reset(ConfigField::BackupDir);
        }
    }
    let root = config.backup_dir()?;
    create_dir(&root)?;
    Ok(root)
}

/// Ask which backup to restore, newest first.
pub fn choose_restore_source(config: &mut Config, root: &Path) -> Result<PathBuf> {
    let product = config.product()?;
    let mut backups = list_backups(root, product)?;
    if backups.is_empty() {
        return Err(DedetaiError::nothing_to_do(format!(
            "no {product} backups in {}",
            root.display()
        )));
    }
    backups.reverse();
    let options: Vec<String> = backups.iter().map(|p| p.display().to_string()).collect();
    let frontend = Arc::clone(config.frontend());
    loop {
        let answer = frontend.ask("Which backup should be restored?", &options)?;
        if let Some(index) = options.iter().position(|o| *o == answer) {
            return Ok(backups.swap_remove(index));
        }
        let rejected = DedetaiError::validation(format!("{answer:?} is not a listed backup"));
        warn!("{}", rejected);
        frontend.status(&rejected.to_string(), None);
    }
}

/// Back up the installed product's data into the backups folder.
pub fn backup(config: &mut Config, engine: &BackupEngine) -> Result<BackupReport> {
    let root = prepare_backup_root(config)?;
    let plan = BackupPlan {
        mode: BackupMode::Backup,
        product: config.product()?,
        source: config.app_data_dir()?,
        destination: root,
    };
    engine.run(&plan)
}

/// Restore a chosen backup over the installed product's data.
pub fn restore(config: &mut Config, engine: &BackupEngine) -> Result<BackupReport> {
    let root = prepare_backup_root(config)?;
    let source = choose_restore_source(config, &root)?;
    let plan = BackupPlan {
        mode: BackupMode::Restore,
        product: config.product()?,
        source,
        destination: config.app_data_dir()?,
    };
    engine.run(&plan)
}
