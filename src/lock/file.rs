//! Advisory `flock()` on a fixed path.
//!
//! The lock lives as long as the open file handle: dropping a held
//! [`FileLock`] or the process exiting releases it.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, warn};

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

use super::ExecutionGuard;
use crate::ThesaurusError;

#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    file: Option<File>,
}

impl FileLock {
    #[inline]
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file: None,
        }
    }

    #[inline]
    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    /// Attempt the exclusive lock without blocking.
    ///
    /// Returns `Ok(false)` when another process holds it or when the lock
    /// file cannot be opened at all, so callers skip their work instead of
    /// failing. Other lock errors are returned.
    #[inline]
    pub fn try_acquire(&mut self) -> Result<bool> {
        if self.is_held() {
            return Ok(true);
        }

        let file = match open_lock_file(&self.path) {
            Ok(file) => file,
            Err(e) => {
                warn!(
                    "Cannot open lock file {}: {}; treating lock as held",
                    self.path.display(),
                    e
                );
                return Ok(false);
            }
        };

        match try_lock_exclusive(&file) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                debug!("Lock {} is held by another process", self.path.display());
                return Ok(false);
            }
            Err(e) => {
                return Err(ThesaurusError::Lock(format!(
                    "Failed to lock {}: {}",
                    self.path.display(),
                    e
                ))
                .into());
            }
        }

        if let Err(e) = write_owner(&file) {
            debug!("Could not record lock owner in {}: {}", self.path.display(), e);
        }

        self.file = Some(file);
        Ok(true)
    }

    #[inline]
    pub fn unlock(&mut self) {
        if let Some(file) = self.file.take() {
            unlock(&file);
        }
    }
}

#[async_trait]
impl ExecutionGuard for FileLock {
    async fn acquire(&mut self) -> Result<bool> {
        self.try_acquire()
    }

    async fn release(&mut self) -> Result<()> {
        self.unlock();
        Ok(())
    }

    fn describe(&self) -> String {
        format!("file lock {}", self.path.display())
    }
}

impl Drop for FileLock {
    #[inline]
    fn drop(&mut self) {
        self.unlock();
    }
}

fn open_lock_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
}

/// Record pid and start time for operators inspecting a stuck lock
fn write_owner(mut file: &File) -> io::Result<()> {
    let started = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();

    file.set_len(0)?;
    writeln!(file, "{} {}", std::process::id(), started)?;
    file.flush()
}

#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> io::Result<()> {
    let fd = file.as_raw_fd();
    // SAFETY: `fd` is a valid descriptor owned by `file` for the whole call.
    let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
    if result != 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock
            || err.raw_os_error() == Some(libc::EWOULDBLOCK)
            || err.raw_os_error() == Some(libc::EAGAIN)
        {
            return Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "Lock is held by another process",
            ));
        }
        return Err(err);
    }
    Ok(())
}

#[cfg(unix)]
fn unlock(file: &File) {
    let fd = file.as_raw_fd();
    // SAFETY: `fd` is a valid descriptor owned by `file`; errors are ignored
    // because closing the file releases the lock as well.
    unsafe { libc::flock(fd, libc::LOCK_UN) };
}

#[cfg(not(unix))]
fn try_lock_exclusive(_file: &File) -> io::Result<()> {
    // No advisory locking on this platform; the database backend should be
    // configured instead.
    Ok(())
}

#[cfg(not(unix))]
fn unlock(_file: &File) {}
