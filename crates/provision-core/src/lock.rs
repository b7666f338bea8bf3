//! Per-namespace exclusive lock.
//!
//! Two runs against the same namespace would race on the conflict check and
//! on the registry write, so an apply-mode run holds an OS file lock on
//! `.provision/locks/<namespace>.lock` for its whole duration. The lock is
//! released when the guard drops, on success and on failure alike.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::error::{ProvisionError, Result};
use crate::paths;

#[derive(Debug)]
pub struct NamespaceLock {
    file: File,
    path: PathBuf,
    namespace: String,
}

impl NamespaceLock {
    /// Try to take the lock without blocking. Contention is `Locked`.
    pub fn acquire(root: &Path, namespace: &str) -> Result<Self> {
        let path = paths::lock_path(root, namespace);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if file.try_lock_exclusive().is_err() {
            return Err(ProvisionError::Locked(namespace.to_string()));
        }

        // Holder pid, for whoever finds a stuck lock file.
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        debug!("acquired lock {}", path.display());

        Ok(Self {
            file,
            path,
            namespace: namespace.to_string(),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

impl Drop for NamespaceLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
        debug!("released lock {}", self.path.display());
    }
}
