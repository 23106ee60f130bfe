//! Filesystem helpers shared by the advertisement record and the daemon.

use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};

/// Write `contents` to `dir/filename`, or delete that file when `contents`
/// is `None`.
///
/// Writing creates any missing parent directories. Deleting removes the file
/// and then every parent directory that became empty, stopping at `dir`.
/// Nothing is touched if the target does not resolve to a path strictly
/// inside `dir`.
pub fn save_or_delete(contents: Option<&[u8]>, dir: &Path, filename: &str) -> io::Result<()> {
    let target = dir.join(filename);

    match contents {
        Some(bytes) => create_directories_and_file(&target, bytes),
        None => delete_file_and_empty_parents(dir, &target),
    }
}

/// Replace `target` with `bytes`, creating parent directories first.
pub fn create_directories_and_file(target: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Write to a sibling and rename so readers never observe a partial file.
    let tmp = target.with_extension("tmp");
    let result = std::fs::write(&tmp, bytes).and_then(|()| std::fs::rename(&tmp, target));
    if result.is_err() {
        if let Err(e) = std::fs::remove_file(&tmp) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(file = %tmp.display(), error = %e, "Failed to remove temporary file");
            }
        }
    }
    result
}

/// Delete `file`, then walk up deleting empty directories until `dir`.
///
/// A missing `file` is not an error. Walking up stops quietly at the first
/// directory that is not empty.
pub fn delete_file_and_empty_parents(dir: &Path, file: &Path) -> io::Result<()> {
    let dir = normalize(dir);
    let file = normalize(file);

    if !is_strictly_inside(&dir, &file) {
        warn!(
            dir = %dir.display(),
            file = %file.display(),
            "Not an ancestor of the target, not deleting anything"
        );
        return Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            format!("{} is not inside {}", file.display(), dir.display()),
        ));
    }

    match std::fs::remove_file(&file) {
        Ok(()) => debug!(file = %file.display(), "Deleted file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let mut child = file.as_path();
    while let Some(parent) = child.parent() {
        if parent == dir {
            break;
        }

        match std::fs::remove_dir(parent) {
            Ok(()) => debug!(dir = %parent.display(), "Removed empty directory"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => break,
            Err(e) if is_not_empty(&e) => break,
            Err(e) => return Err(e),
        }

        child = parent;
    }

    Ok(())
}

/// True when `path` lies below `dir` (and is not `dir` itself), after
/// lexically resolving `.` and `..` components.
pub fn is_strictly_inside(dir: &Path, path: &Path) -> bool {
    let dir = normalize(dir);
    let path = normalize(path);

    path != dir && path.starts_with(&dir)
}

/// Lexically resolve `.` and `..` without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }

    out
}

fn is_not_empty(e: &io::Error) -> bool {
    e.raw_os_error() == Some(libc::ENOTEMPTY) || e.raw_os_error() == Some(libc::EEXIST)
}
