//! Directory tree helpers shared by the backup engine and install steps.

use crate::error::{DedetaiError, Result};
use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::{PermissionsExt, symlink};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Total size in bytes of the regular files under `root`. Symlinks are not followed.
pub fn dir_size(root: &Path) -> u64 {
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                debug!("skipping path during size walk: {}", err);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum()
}

/// Copy the tree at `src` to `dst`, preserving relative layout and symlinks.
///
/// `cancel` is checked before every entry; once set the copy stops and
/// returns [`DedetaiError::Cancelled`], leaving what was copied so far.
/// Returns the number of file bytes copied.
pub fn copy_tree(src: &Path, dst: &Path, cancel: &AtomicBool) -> Result<u64> {
    let mut copied = 0u64;
    for entry in WalkDir::new(src).follow_links(false).sort_by_file_name() {
        if cancel.load(Ordering::SeqCst) {
            return Err(DedetaiError::cancelled(format!("copy of {} interrupted", src.display())));
        }
        let entry = entry.map_err(|e| DedetaiError::resource(format!("cannot read {}: {e}", src.display())))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| DedetaiError::general(e.to_string()))?;
        let target = dst.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            match fs::remove_file(&target) {
                Err(e) if e.kind() != ErrorKind::NotFound => return Err(e.into()),
                _ => {}
            }
            symlink(link, &target)?;
        } else if file_type.is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            copied += fs::copy(entry.path(), &target).map_err(|e| {
                DedetaiError::resource(format!("cannot copy {}: {e}", entry.path().display()))
            })?;
        } else {
            warn!("Skipping special file {}", entry.path().display());
        }
    }
    Ok(copied)
}

/// Mark `path` executable (0755).
pub fn make_executable(path: &Path) -> Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    Ok(())
}

/// Point `link` at `target`, replacing whatever `link` was.
pub fn replace_symlink(target: &Path, link: &Path) -> Result<()> {
    match fs::symlink_metadata(link) {
        Ok(_) => fs::remove_file(link)?,
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    symlink(target, link)?;
    Ok(())
}

/// Remove a file or a whole directory; a missing path is fine.
pub fn remove_path(path: &Path) -> Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    if meta.is_dir() {
        fs::remove_dir_all(path)?;
    } else {
        fs::remove_file(path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn populate(root: &Path) {
        fs::create_dir_all(root.join("Data/abc/LibraryIndex")).unwrap();
        fs::write(root.join("Data/abc/LibraryIndex/index.db"), vec![1u8; 1000]).unwrap();
        fs::create_dir_all(root.join("Documents")).unwrap();
        fs::write(root.join("Documents/notes.txt"), b"hello").unwrap();
        symlink("notes.txt", root.join("Documents/link")).unwrap();
    }

    #[test]
    fn test_dir_size_counts_files_only() {
        let dir = TempDir::new().unwrap();
        populate(dir.path());
        assert_eq!(dir_size(dir.path()), 1005);
        assert_eq!(dir_size(&dir.path().join("missing")), 0);
    }

    #[test]
    fn test_copy_tree_preserves_layout() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        populate(src.path());

        let cancel = AtomicBool::new(false);
        let copied = copy_tree(src.path(), &dst.path().join("out"), &cancel).unwrap();
        assert_eq!(copied, 1005);
        assert_eq!(
            fs::read(dst.path().join("out/Documents/notes.txt")).unwrap(),
            b"hello"
        );
        assert_eq!(
            fs::read_link(dst.path().join("out/Documents/link")).unwrap(),
            Path::new("notes.txt")
        );
    }

    #[test]
    fn test_copy_tree_honours_cancel() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        populate(src.path());

        let cancel = AtomicBool::new(true);
        let err = copy_tree(src.path(), dst.path(), &cancel).unwrap_err();
        assert!(matches!(err, DedetaiError::Cancelled(_)));
    }

    #[test]
    fn test_replace_symlink_relinks() {
        let dir = TempDir::new().unwrap();
        let link = dir.path().join("wine64");
        replace_symlink(Path::new("./a.AppImage"), &link).unwrap();
        replace_symlink(Path::new("./b.AppImage"), &link).unwrap();
        assert_eq!(fs::read_link(&link).unwrap(), Path::new("./b.AppImage"));
    }

    #[test]
    fn test_remove_path_handles_all_kinds() {
        let dir = TempDir::new().unwrap();
        populate(dir.path());
        remove_path(&dir.path().join("Data")).unwrap();
        remove_path(&dir.path().join("Documents/notes.txt")).unwrap();
        remove_path(&dir.path().join("absent")).unwrap();
        assert!(!dir.path().join("Data").exists());
        assert!(!dir.path().join("Documents/notes.txt").exists());
    }
}
