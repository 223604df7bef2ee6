//! The database lock.

use std::{
    fs::File,
    path::{Path, PathBuf},
};

use rustix::fs::{FlockOperation, flock};

use crate::Error;

/// An advisory, process-exclusive lock over a database root.
///
/// Held for the duration of one executor run; the first mutation must not
/// happen before the lock is acquired. Dropping the guard releases the lock.
#[derive(Debug)]
pub struct VdbLock {
    file: File,
    path: PathBuf,
}

impl VdbLock {
    /// Acquires the lock file under `root`, blocking until it is free.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock file cannot be created or locked.
    pub(crate) fn acquire(root: &Path) -> Result<Self, Error> {
        let path = root.join(".lock");
        let file = File::create(&path).map_err(|e| Error::io(&path, "creating the lock file", e))?;
        flock(&file, FlockOperation::LockExclusive)
            .map_err(|e| Error::io(&path, "locking the database", e.into()))?;
        log::debug!("acquired database lock at {}", path.display());
        Ok(Self { file, path })
    }
}

impl Drop for VdbLock {
    fn drop(&mut self) {
        if let Err(error) = flock(&self.file, FlockOperation::Unlock) {
            log::warn!("failed to unlock {}: {error}", self.path.display());
        }
    }
}
