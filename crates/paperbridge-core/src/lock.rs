//! Process-wide single-writer lock for sync passes.
//!
//! A pass holds an exclusive advisory lock on a file next to the ledger for
//! its whole duration, so two passes (a redeploy overlapping a running
//! process, or a re-sync request) never write the ledger concurrently.

use crate::error::ErrorCode;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("sync lock at {} still held after {waited:?}", path.display())]
    Timeout { path: PathBuf, waited: Duration },

    #[error("sync lock I/O error: {0}")]
    Io(#[from] io::Error),
}

impl LockError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Timeout { .. } => ErrorCode::LockContention,
            Self::Io(_) => ErrorCode::LedgerUnavailable,
        }
    }

    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}

/// Lock file path used for a given ledger database.
#[must_use]
pub fn lock_path_for(ledger_path: &Path) -> PathBuf {
    let mut name = ledger_path
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".lock");
    ledger_path.with_file_name(name)
}

/// RAII guard for the exclusive sync lock. Released on drop.
#[derive(Debug)]
pub struct SyncLock {
    file: File,
    path: PathBuf,
}

impl SyncLock {
    /// Acquire the exclusive lock, polling until `timeout` elapses.
    ///
    /// A zero timeout makes a single attempt.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Timeout`] when another holder keeps the lock, or
    /// [`LockError::Io`] when the lock file cannot be opened.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self, LockError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let start = Instant::now();
        loop {
            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(path)?;

            if file.try_lock_exclusive().is_ok() {
                let mut lock = Self {
                    file,
                    path: path.to_path_buf(),
                };
                lock.stamp_owner();
                return Ok(lock);
            }

            if start.elapsed() >= timeout {
                return Err(LockError::Timeout {
                    path: path.to_path_buf(),
                    waited: start.elapsed(),
                });
            }

            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Return the lock file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Explicitly release the lock. Release also happens on drop.
    pub fn release(self) {
        drop(self);
    }

    // Owner stamp is diagnostic only; failing to write it never fails the lock.
    fn stamp_owner(&mut self) {
        let stamp = format!(
            "pid={} acquired_at={}\n",
            std::process::id(),
            chrono::Utc::now().to_rfc3339()
        );
        let written = self
            .file
            .set_len(0)
            .and_then(|()| self.file.seek(SeekFrom::Start(0)))
            .and_then(|_| self.file.write_all(stamp.as_bytes()));
        if let Err(err) = written {
            tracing::debug!(path = %self.path.display(), %err, "could not stamp sync lock owner");
        }
    }
}

impl Drop for SyncLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
