//! KEEL Synchronization
//!
//! A system-wide named lock backed by the host's advisory file locking, and
//! the `mutex` task that serializes its nested tasks on it across every
//! branch of a build and every process on the host.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod mutex;
pub mod named_lock;

pub use mutex::{MutexState, NamedMutexTask, sync_module, SYNC_MODULE};
pub use named_lock::{validate_lock_name, LockError, NamedLock, NamedLockGuard};
