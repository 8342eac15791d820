//! Single-writer lock for DuckDB database files.

use crate::error::SinkError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Holds an exclusive lock on `<db>.lock` until dropped.
#[derive(Debug)]
pub struct WriterLock {
    _file: File,
    lock_path: PathBuf,
}

impl WriterLock {
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        debug!("Releasing writer lock: {}", self.lock_path.display());
    }
}

/// `/data/w.duckdb` -> `/data/w.duckdb.lock`, `/data/w` -> `/data/w.lock`.
pub fn lock_path_for(db_path: &Path) -> PathBuf {
    let mut lock_path = db_path.to_path_buf();
    match lock_path.extension() {
        Some(ext) => {
            let ext = format!("{}.lock", ext.to_string_lossy());
            lock_path.set_extension(ext);
        }
        None => {
            lock_path.set_extension("lock");
        }
    }
    lock_path
}

/// Non-blocking. Fails with [`SinkError::Locked`] when another process
/// holds the lock.
pub fn try_lock_writer(db_path: &Path) -> Result<WriterLock, SinkError> {
    let lock_path = lock_path_for(db_path);
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|source| SinkError::LockFailed {
            path: lock_path.clone(),
            source,
        })?;

    // fs2's method, not the std one that exists on newer toolchains.
    match FileExt::try_lock_exclusive(&file) {
        Ok(()) => {
            info!("Acquired writer lock: {}", lock_path.display());
            Ok(WriterLock {
                _file: file,
                lock_path,
            })
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
            Err(SinkError::Locked(db_path.to_path_buf()))
        }
        Err(source) => Err(SinkError::LockFailed {
            path: lock_path,
            source,
        }),
    }
}
