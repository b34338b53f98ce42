//! Advisory file locks guarding the shared storage files.
//!
//! Each data file has a sidecar `<file>.lock` that is locked instead of the
//! data file itself, since writers replace the data file by rename.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;

use crate::error::StorageError;

const RETRY_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LockMode {
    Shared,
    Exclusive,
}

/// Holds a lock until dropped.
pub(crate) struct FileLockGuard {
    file: File,
    lock_path: PathBuf,
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            log::debug!("Failed to unlock {}: {}", self.lock_path.display(), e);
        }
    }
}

impl std::fmt::Debug for FileLockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileLockGuard")
            .field("lock_path", &self.lock_path)
            .finish()
    }
}

/// `/data/email_jobs.json` → `/data/email_jobs.json.lock`
pub(crate) fn lock_path_for(path: &Path) -> PathBuf {
    let mut lock_path = path.to_path_buf();
    match lock_path.extension() {
        Some(ext) => {
            let new_ext = format!("{}.lock", ext.to_string_lossy());
            lock_path.set_extension(new_ext);
        }
        None => {
            lock_path.set_extension("lock");
        }
    }
    lock_path
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Acquires `mode` on `lock_path`, retrying until `timeout` elapses. A lock
/// still contended at the deadline is reported as a storage error so callers
/// can fail over instead of blocking.
pub(crate) fn acquire(
    lock_path: &Path,
    mode: LockMode,
    timeout: Duration,
) -> Result<FileLockGuard, StorageError> {
    if let Some(parent) = lock_path.parent() {
        fs::create_dir_all(parent).map_err(|e| StorageError::CreateDirectory {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)
        .map_err(|e| StorageError::Lock {
            path: lock_path.to_path_buf(),
            source: e,
        })?;

    let deadline = Instant::now() + timeout;
    loop {
        let attempt = match mode {
            LockMode::Shared => FileExt::try_lock_shared(&file),
            LockMode::Exclusive => FileExt::try_lock_exclusive(&file),
        };
        match attempt {
            Ok(()) => {
                return Ok(FileLockGuard {
                    file,
                    lock_path: lock_path.to_path_buf(),
                })
            }
            Err(e) if is_contended(&e) && Instant::now() < deadline => {
                thread::sleep(RETRY_INTERVAL);
            }
            Err(e) => {
                return Err(StorageError::Lock {
                    path: lock_path.to_path_buf(),
                    source: e,
                })
            }
        }
    }
}
