//! System-wide named locks.
//!
//! A [`NamedLock`] is an exclusive advisory lock on `<lock_dir>/<name>.lock`.
//! The lock belongs to the open file description, so two acquisitions of the
//! same name exclude each other whether they come from two threads of one
//! build, two builds, or any other process that locks the same file.

use keel_task::TaskError;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// First retry delay while the lock is busy
const MIN_BACKOFF: Duration = Duration::from_millis(1);

/// Upper bound of the retry delay, and so of the cancellation latency
const MAX_BACKOFF: Duration = Duration::from_millis(25);

/// Longest name whose lock file still fits a 255-byte file name
const MAX_NAME_LEN: usize = 250;

/// Named lock errors
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// Name cannot be used as a host lock identifier
    #[error("Invalid lock name '{name}': {reason}")]
    InvalidName {
        /// Offending name
        name: String,
        /// Why it was rejected
        reason: String,
    },

    /// Lock was not acquired within the bound
    #[error("Timed out after {timeout:?} waiting for lock '{name}'")]
    Timeout {
        /// Lock name
        name: String,
        /// Bound that expired
        timeout: Duration,
    },

    /// Wait was cancelled
    #[error("Wait for lock '{name}' cancelled")]
    Cancelled {
        /// Lock name
        name: String,
    },

    /// Host I/O failure
    #[error("Lock '{name}' I/O error: {source}")]
    Io {
        /// Lock name
        name: String,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Host has no supported locking facility
    #[error("Named lock '{name}' is not supported on this platform")]
    Unsupported {
        /// Lock name
        name: String,
    },
}

impl LockError {
    fn io(name: &str, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::Unsupported {
            return Self::Unsupported {
                name: name.to_string(),
            };
        }
        Self::Io {
            name: name.to_string(),
            source,
        }
    }
}

impl From<LockError> for TaskError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::InvalidName { name, reason } => TaskError::Configuration {
                task: crate::mutex::MUTEX_TASK_NAME.to_string(),
                reason: format!("invalid lock name '{}': {}", name, reason),
            },
            LockError::Timeout { name, timeout } => TaskError::Timeout { name, timeout },
            LockError::Cancelled { .. } => TaskError::Cancelled {
                task: crate::mutex::MUTEX_TASK_NAME.to_string(),
            },
            LockError::Io { ref name, .. } | LockError::Unsupported { ref name } => {
                TaskError::Lock {
                    name: name.clone(),
                    message: err.to_string(),
                }
            }
        }
    }
}

/// Check that `name` can be used verbatim as a host lock identifier
///
/// # Errors
///
/// Returns error if the name is blank, too long, a relative path component,
/// or contains a path separator or NUL
pub fn validate_lock_name(name: &str) -> Result<(), LockError> {
    let reason = if name.trim().is_empty() {
        Some("must not be empty")
    } else if name == "." || name == ".." {
        Some("must not be a relative path component")
    } else if name.contains(['/', '\\']) {
        Some("must not contain a path separator")
    } else if name.contains('\0') {
        Some("must not contain NUL")
    } else if name.len() > MAX_NAME_LEN {
        Some("is too long")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(LockError::InvalidName {
            name: name.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

/// Handle to a system-wide named lock
///
/// Holding the handle does not hold the lock; [`NamedLock::acquire`] does.
///
/// # Platform support
///
/// Only Unix hosts have a backend: an exclusive `flock(2)` on the lock file.
/// Everywhere else acquisition fails with [`LockError::Unsupported`]; a
/// Windows backend would need `LockFileEx` on the same file.
#[derive(Debug, Clone)]
pub struct NamedLock {
    name: String,
    path: PathBuf,
}

impl NamedLock {
    /// Handle for the lock `name`, stored under `lock_dir`
    ///
    /// # Errors
    ///
    /// Returns error if the name is not a valid lock identifier
    pub fn new(lock_dir: impl AsRef<Path>, name: impl Into<String>) -> Result<Self, LockError> {
        let name = name.into();
        validate_lock_name(&name)?;
        let path = lock_dir.as_ref().join(format!("{}.lock", name));
        Ok(Self { name, path })
    }

    /// Lock name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lock file path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the lock without waiting
    ///
    /// Returns `None` when someone else holds it.
    ///
    /// # Errors
    ///
    /// Returns error if the lock file cannot be opened or locked
    pub fn try_acquire(&self) -> Result<Option<NamedLockGuard>, LockError> {
        match sys::try_lock(self.open()?).map_err(|e| LockError::io(&self.name, e))? {
            sys::Attempt::Acquired(held) => Ok(Some(self.guard(held))),
            sys::Attempt::Busy(_) => Ok(None),
        }
    }

    /// Take the lock, waiting at most `timeout`
    ///
    /// Polls with bounded exponential backoff and gives up early when
    /// `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` when the bound expires, `Cancelled` when the wait is
    /// cancelled, or an I/O error from the host
    pub fn acquire(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<NamedLockGuard, LockError> {
        let deadline = Instant::now() + timeout;
        let mut backoff = MIN_BACKOFF;
        let mut file = self.open()?;
        let mut attempts = 0u32;

        loop {
            if cancel.is_cancelled() {
                tracing::debug!(lock = %self.name, attempts, "lock wait cancelled");
                return Err(LockError::Cancelled {
                    name: self.name.clone(),
                });
            }

            attempts += 1;
            match sys::try_lock(file).map_err(|e| LockError::io(&self.name, e))? {
                sys::Attempt::Acquired(held) => {
                    tracing::debug!(lock = %self.name, attempts, "lock acquired");
                    return Ok(self.guard(held));
                }
                sys::Attempt::Busy(returned) => file = returned,
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::debug!(lock = %self.name, attempts, ?timeout, "lock wait timed out");
                return Err(LockError::Timeout {
                    name: self.name.clone(),
                    timeout,
                });
            }
            std::thread::sleep(backoff.min(deadline - now));
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    fn open(&self) -> Result<File, LockError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(|e| LockError::io(&self.name, e))?;
        }
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| LockError::io(&self.name, e))
    }

    fn guard(&self, held: sys::Held) -> NamedLockGuard {
        NamedLockGuard {
            name: self.name.clone(),
            held: Some(held),
        }
    }
}

/// A held named lock; released on [`release`](Self::release) or drop
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct NamedLockGuard {
    name: String,
    held: Option<sys::Held>,
}

impl NamedLockGuard {
    /// Lock name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Release the lock, reporting host errors
    ///
    /// # Errors
    ///
    /// Returns error if the host refuses the unlock
    pub fn release(mut self) -> Result<(), LockError> {
        match self.held.take() {
            Some(held) => sys::unlock(held).map_err(|e| LockError::io(&self.name, e)),
            None => Ok(()),
        }
    }
}

impl Drop for NamedLockGuard {
    fn drop(&mut self) {
        if let Some(held) = self.held.take() {
            if let Err(err) = sys::unlock(held) {
                tracing::warn!(lock = %self.name, error = %err, "failed to release lock");
            }
        }
    }
}

impl std::fmt::Debug for NamedLockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedLockGuard")
            .field("name", &self.name)
            .field("held", &self.held.is_some())
            .finish()
    }
}

#[cfg(unix)]
mod sys {
    use nix::errno::Errno;
    use nix::fcntl::{Flock, FlockArg};
    use std::fs::File;
    use std::io;

    pub(super) type Held = Flock<File>;

    pub(super) enum Attempt {
        Acquired(Held),
        Busy(File),
    }

    pub(super) fn try_lock(file: File) -> io::Result<Attempt> {
        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(held) => Ok(Attempt::Acquired(held)),
            Err((file, errno)) if errno == Errno::EWOULDBLOCK => Ok(Attempt::Busy(file)),
            Err((_, errno)) => Err(errno.into()),
        }
    }

    pub(super) fn unlock(held: Held) -> io::Result<()> {
        held.unlock().map(drop).map_err(|(_, errno)| errno.into())
    }
}

#[cfg(not(unix))]
mod sys {
    use std::fs::File;
    use std::io;

    pub(super) type Held = File;

    pub(super) enum Attempt {
        Acquired(Held),
        Busy(File),
    }

    pub(super) fn try_lock(_file: File) -> io::Result<Attempt> {
        Err(io::ErrorKind::Unsupported.into())
    }

    pub(super) fn unlock(_held: Held) -> io::Result<()> {
        Ok(())
    }
}
