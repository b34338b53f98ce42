//! One JSON document on disk, read under a shared lock and rewritten under an
//! exclusive lock with an atomic rename.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;

use super::lock::{acquire, lock_path_for, LockMode};
use crate::error::StorageError;

pub(crate) struct JsonFile {
    path: PathBuf,
    lock_path: PathBuf,
    /// Serializes writers within this process; the file lock covers others.
    writers: Mutex<()>,
    lock_timeout: Duration,
}

impl JsonFile {
    pub fn new(path: PathBuf, lock_timeout: Duration) -> Self {
        let lock_path = lock_path_for(&path);
        Self {
            path,
            lock_path,
            writers: Mutex::new(()),
            lock_timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current document. Missing and unparseable files read as `None`.
    pub fn read(&self) -> Result<Option<Value>, StorageError> {
        let _guard = acquire(&self.lock_path, LockMode::Shared, self.lock_timeout)?;
        self.load(false)
    }

    /// Read-modify-write under one exclusive lock. `f` receives the current
    /// document and returns the document to store plus a value for the caller.
    pub fn update<R, F>(&self, f: F) -> Result<R, StorageError>
    where
        F: FnOnce(Option<Value>) -> (Value, R),
    {
        let _writer = match self.writers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Writer mutex for {} was poisoned, recovering", self.path.display());
                poisoned.into_inner()
            }
        };
        let _guard = acquire(&self.lock_path, LockMode::Exclusive, self.lock_timeout)?;

        let current = self.load(true)?;
        let (next, result) = f(current);
        self.store(&next)?;
        Ok(result)
    }

    fn load(&self, quarantine: bool) -> Result<Option<Value>, StorageError> {
        let content = match fs::read(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StorageError::ReadFile {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };
        if content.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        match serde_json::from_slice(&content) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                log::warn!(
                    "Corrupt storage file {}: {}; treating as empty",
                    self.path.display(),
                    e
                );
                if quarantine {
                    self.quarantine(&content);
                }
                Ok(None)
            }
        }
    }

    /// Keeps a copy of a corrupt file before it is overwritten.
    fn quarantine(&self, content: &[u8]) {
        let mut corrupt = self.path.clone().into_os_string();
        corrupt.push(".corrupt");
        let corrupt = PathBuf::from(corrupt);
        match fs::write(&corrupt, content) {
            Ok(()) => log::warn!("Saved corrupt contents to {}", corrupt.display()),
            Err(e) => log::warn!("Failed to save corrupt file {}: {}", corrupt.display(), e),
        }
    }

    fn store(&self, value: &Value) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| StorageError::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let payload = serde_json::to_vec_pretty(value)?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, payload).map_err(|e| StorageError::WriteFile {
            path: tmp.clone(),
            source: e,
        })?;
        fs::rename(&tmp, &self.path).map_err(|e| StorageError::WriteFile {
            path: self.path.clone(),
            source: e,
        })
    }
}
