//! Interrupt-safe file writes and directory locks

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use fs2::FileExt;

pub(crate) const LOCK_FILE: &str = ".sync.lock";

/// Write `bytes` to `dest` through a temp file in the same directory, set
/// `mode` on the temp file, then rename it into place. A crash leaves either
/// the old file or the new one, never a half-written or over-permissive copy.
pub fn write_atomic(dest: &Path, bytes: &[u8], mode: u32) -> io::Result<()> {
    let parent = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".sync-")
        .tempfile_in(parent)?;
    set_mode(tmp.path(), mode)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(unix)]
pub fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
pub fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
pub fn mode_of(path: &Path) -> io::Result<u32> {
    use std::os::unix::fs::PermissionsExt;
    Ok(fs::metadata(path)?.permissions().mode() & 0o777)
}

#[cfg(not(unix))]
pub fn mode_of(_path: &Path) -> io::Result<u32> {
    Ok(0o600)
}

/// Whether a file can be created in `dir` right now.
pub fn is_writable_dir(dir: &Path) -> bool {
    dir.is_dir() && tempfile::tempfile_in(dir).is_ok()
}

/// Held advisory lock on a bundle directory; released on drop.
#[derive(Debug)]
pub struct DirLock {
    file: File,
}

impl Drop for DirLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

fn open_lock_file(dir: &Path) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(dir.join(LOCK_FILE))
}

/// Exclusive lock for writers. Creates `dir` if needed.
pub fn lock_exclusive(dir: &Path) -> io::Result<DirLock> {
    fs::create_dir_all(dir)?;
    let file = open_lock_file(dir)?;
    file.lock_exclusive()?;
    Ok(DirLock { file })
}

/// Shared lock for readers. `None` when the directory is absent or the lock
/// file cannot be created (read-only mounts); readers proceed unlocked then.
pub fn lock_shared(dir: &Path) -> Option<DirLock> {
    if !dir.is_dir() {
        return None;
    }
    let file = open_lock_file(dir).ok()?;
    match file.lock_shared() {
        Ok(()) => Some(DirLock { file }),
        Err(e) => {
            tracing::debug!("Reading {} without a lock: {}", dir.display(), e);
            None
        }
    }
}
