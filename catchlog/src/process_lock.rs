//! Cross-process drain lock.
//!
//! The sync engine keeps a single pass per process; this lock extends that to
//! every `catchlog sync` / `catchlog watch` draining the same queue database.
//! It is an advisory `flock` on a file under `$XDG_RUNTIME_DIR/catchlog`,
//! scoped by the database path and held until the guard is dropped.

use anyhow::{Context, Result};
use std::collections::hash_map::DefaultHasher;
use std::fs::{self, File, OpenOptions};
use std::hash::{Hash, Hasher};
use std::io::{self, Seek, SeekFrom, Write};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

const DRAIN_LOCK_FILE: &str = "catchlog-sync.lock";

/// Held by the process currently allowed to drain the queue.
pub struct DrainGuard {
    file: File,
    path: PathBuf,
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        let _ = unlock_file(&self.file);
        let _ = fs::remove_file(&self.path);
    }
}

/// Take the drain lock for `db_path`, failing if another process holds it.
pub fn acquire_drain_guard(db_path: &Path) -> Result<DrainGuard> {
    match try_acquire_drain_guard(db_path)? {
        Some(guard) => Ok(guard),
        None => anyhow::bail!(
            "another catchlog process is already syncing {}",
            db_path.display()
        ),
    }
}

/// Take the drain lock for `db_path` if it is free.
pub fn try_acquire_drain_guard(db_path: &Path) -> Result<Option<DrainGuard>> {
    let dir = lock_dir();
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create runtime lock directory: {}", dir.display()))?;

    let path = dir.join(scoped_lock_filename(db_path));
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)
        .with_context(|| format!("failed to open lock file: {}", path.display()))?;

    match lock_file_nonblocking(&file) {
        Ok(()) => {
            // Owner pid, for whoever finds a stale-looking lock
            let _ = file.set_len(0);
            let _ = file.seek(SeekFrom::Start(0));
            let _ = writeln!(file, "pid={}", std::process::id());
            let _ = file.flush();

            Ok(Some(DrainGuard { file, path }))
        }
        Err(e) if is_lock_busy(&e) => Ok(None),
        Err(e) => Err(e).with_context(|| format!("failed to lock file: {}", path.display())),
    }
}

fn lock_dir() -> PathBuf {
    let mut dir = match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => std::env::temp_dir(),
    };
    dir.push("catchlog");
    dir
}

fn scoped_lock_filename(db_path: &Path) -> String {
    let mut hasher = DefaultHasher::new();
    db_path.to_string_lossy().hash(&mut hasher);
    format!("{DRAIN_LOCK_FILE}.{:016x}", hasher.finish())
}

fn is_lock_busy(error: &io::Error) -> bool {
    matches!(error.kind(), io::ErrorKind::WouldBlock)
        || matches!(error.raw_os_error(), Some(11) | Some(35))
}

#[cfg(unix)]
fn lock_file_nonblocking(file: &File) -> io::Result<()> {
    const LOCK_EX: i32 = 2;
    const LOCK_NB: i32 = 4;
    // SAFETY: flock is called with a valid file descriptor and constant flags.
    let rc = unsafe { flock(file.as_raw_fd(), LOCK_EX | LOCK_NB) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(unix)]
fn unlock_file(file: &File) -> io::Result<()> {
    const LOCK_UN: i32 = 8;
    // SAFETY: flock is called with a valid file descriptor and constant flags.
    let rc = unsafe { flock(file.as_raw_fd(), LOCK_UN) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(unix)]
unsafe extern "C" {
    fn flock(fd: i32, operation: i32) -> i32;
}

#[cfg(not(unix))]
compile_error!("catchlog drain locks currently require Unix (macOS/Linux)");
