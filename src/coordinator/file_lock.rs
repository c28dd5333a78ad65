//! Advisory file lock
//!
//! `flock`-style shared/exclusive locks on a sidecar lock file, with
//! reference counting for holders inside this process and bounded waits.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::utils::Backoff;
use fs2::FileExt;
use parking_lot::Mutex;

use crate::error::{MapKvError, Result};

/// Longest sleep between attempts once spinning is exhausted
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Kind of lock held
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

impl LockMode {
    pub fn as_str(self) -> &'static str {
        match self {
            LockMode::Shared => "shared",
            LockMode::Exclusive => "exclusive",
        }
    }
}

/// In-process holders of the OS-level lock
#[derive(Debug, Default)]
struct Holders {
    shared: usize,
    exclusive: usize,
}

/// Cross-process lock on one file
///
/// OS file locks belong to the open file description, so every thread of
/// this process shares a single lock state. The holder counts make sure the
/// OS lock is only taken by the first holder and released by the last.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    file: File,
    holders: Mutex<Holders>,
}

impl FileLock {
    /// Open (creating if needed) the lock file at `path`
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| MapKvError::io_at(path, e))?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            holders: Mutex::new(Holders::default()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquire a shared lock, waiting at most `timeout` (`None` blocks)
    pub fn shared(&self, timeout: Option<Duration>) -> Result<LockGuard<'_>> {
        self.acquire(LockMode::Shared, timeout)
    }

    /// Acquire an exclusive lock, waiting at most `timeout` (`None` blocks)
    pub fn exclusive(&self, timeout: Option<Duration>) -> Result<LockGuard<'_>> {
        self.acquire(LockMode::Exclusive, timeout)
    }

    fn acquire(&self, mode: LockMode, timeout: Option<Duration>) -> Result<LockGuard<'_>> {
        let mut holders = self.holders.lock();

        match mode {
            LockMode::Shared => {
                // An exclusive or shared lock held here already covers us
                if holders.shared == 0 && holders.exclusive == 0 {
                    self.os_lock(mode, timeout)?;
                }
                holders.shared += 1;
            }
            LockMode::Exclusive => {
                if holders.exclusive == 0 {
                    self.os_lock(mode, timeout)?;
                }
                holders.exclusive += 1;
            }
        }

        Ok(LockGuard { lock: self, mode })
    }

    fn release(&self, mode: LockMode) -> io::Result<()> {
        let mut holders = self.holders.lock();

        match mode {
            LockMode::Shared => {
                holders.shared = holders.shared.saturating_sub(1);
                if holders.shared == 0 && holders.exclusive == 0 {
                    FileExt::unlock(&self.file)?;
                }
            }
            LockMode::Exclusive => {
                holders.exclusive = holders.exclusive.saturating_sub(1);
                if holders.exclusive == 0 {
                    if holders.shared > 0 {
                        // Downgrade; converting away from exclusive never waits
                        FileExt::lock_shared(&self.file)?;
                    } else {
                        FileExt::unlock(&self.file)?;
                    }
                }
            }
        }

        Ok(())
    }

    fn os_lock(&self, mode: LockMode, timeout: Option<Duration>) -> Result<()> {
        let Some(timeout) = timeout else {
            let locked = match mode {
                LockMode::Shared => FileExt::lock_shared(&self.file),
                LockMode::Exclusive => FileExt::lock_exclusive(&self.file),
            };
            return locked.map_err(|e| MapKvError::io_at(&self.path, e));
        };

        let started = Instant::now();
        let backoff = Backoff::new();
        loop {
            let attempt = match mode {
                LockMode::Shared => FileExt::try_lock_shared(&self.file),
                LockMode::Exclusive => FileExt::try_lock_exclusive(&self.file),
            };
            match attempt {
                Ok(()) => return Ok(()),
                Err(e) if is_contended(&e) => {}
                Err(e) => return Err(MapKvError::io_at(&self.path, e)),
            }

            let waited = started.elapsed();
            if waited >= timeout {
                tracing::debug!(path = %self.path.display(), mode = mode.as_str(), ?waited, "lock wait timed out");
                return Err(MapKvError::LockTimeout {
                    operation: mode.as_str(),
                    waited,
                });
            }

            if backoff.is_completed() {
                thread::sleep(POLL_INTERVAL.min(timeout - waited));
            } else {
                backoff.snooze();
            }
        }
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Held lock; released on drop
#[must_use = "the lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct LockGuard<'a> {
    lock: &'a FileLock,
    mode: LockMode,
}

impl LockGuard<'_> {
    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.release(self.mode) {
            tracing::warn!(
                path = %self.lock.path.display(),
                mode = self.mode.as_str(),
                error = %e,
                "failed to release file lock"
            );
        }
    }
}
