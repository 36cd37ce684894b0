// storage/src/lock.rs

//! Single-writer enforcement for a data directory.
//!
//! A flat-file store assumes it is the only writer of its files. The
//! database takes an OS-level exclusive lock on `{path}/.lock` for as long
//! as it is open; the OS releases it if the process dies.

use crate::{StorageError, StorageResult};
use fs2::FileExt;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

pub const LOCK_FILE: &str = ".lock";

/// An exclusive lock on a data directory, released on drop
#[derive(Debug)]
pub struct DataDirLock {
    file: File,
    path: PathBuf,
}

impl DataDirLock {
    /// Lock `data_dir`, creating it if needed. Never blocks: a directory
    /// already locked by another handle fails with `AlreadyLocked`.
    pub fn acquire(data_dir: impl AsRef<Path>) -> StorageResult<Self> {
        let data_dir = data_dir.as_ref();
        let lock_path = data_dir.join(LOCK_FILE);

        if !data_dir.exists() {
            fs::create_dir_all(data_dir)?;
            tracing::debug!("Created data directory {}", data_dir.display());
        }

        let file = File::create(&lock_path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                tracing::info!("Acquired exclusive lock on {}", data_dir.display());
                Ok(Self {
                    file,
                    path: lock_path,
                })
            }
            Err(e) if is_contended(&e) => {
                tracing::error!(
                    "Data directory {} is already locked by another process",
                    data_dir.display()
                );
                Err(StorageError::AlreadyLocked(data_dir.to_path_buf()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

// EWOULDBLOCK is 11 on Linux and 35 on macOS
fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock || matches!(e.raw_os_error(), Some(11) | Some(35))
}

impl Drop for DataDirLock {
    fn drop(&mut self) {
        match FileExt::unlock(&self.file) {
            Ok(()) => tracing::debug!("Released lock {}", self.path.display()),
            Err(e) => tracing::error!("Failed to release lock {}: {}", self.path.display(), e),
        }
    }
}
