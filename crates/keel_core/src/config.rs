//! Engine configuration.
//!
//! Loaded from JSON; every field has a default so an empty object is valid.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default timeout for named locks when a task does not declare one
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 60_000;

/// Reference to a task type inside a task module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskTypeRef {
    /// Module name
    pub module: String,
    /// Fully qualified type name inside the module
    pub type_name: String,
}

impl TaskTypeRef {
    /// Create a new reference
    #[must_use]
    pub fn new(module: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            type_name: type_name.into(),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding the host lock files of named locks
    pub lock_dir: PathBuf,
    /// Lock timeout used when a mutex task declares none (milliseconds)
    pub default_lock_timeout_ms: u64,
    /// Task types to register at start-up; empty registers every known type
    pub task_types: Vec<TaskTypeRef>,
    /// Stop the build (and cancel sibling branches) on the first failure
    pub fail_fast: bool,
}

impl EngineConfig {
    /// Create the default configuration
    #[must_use]
    pub fn new() -> Self {
        Self {
            lock_dir: std::env::temp_dir().join("keel-locks"),
            default_lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            task_types: Vec::new(),
            fail_fast: true,
        }
    }

    /// Parse and validate a JSON configuration
    ///
    /// # Errors
    ///
    /// Returns error if the document is malformed or fails validation
    pub fn from_json_str(json: &str) -> CoreResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or is invalid
    pub fn from_json_file(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| CoreError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_json_str(&json)
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns error on a zero lock timeout or an empty lock directory
    pub fn validate(&self) -> CoreResult<()> {
        if self.default_lock_timeout_ms == 0 {
            return Err(CoreError::Validation {
                field: "default_lock_timeout_ms".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.lock_dir.as_os_str().is_empty() {
            return Err(CoreError::Validation {
                field: "lock_dir".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        for task_type in &self.task_types {
            if task_type.module.is_empty() || task_type.type_name.is_empty() {
                return Err(CoreError::Validation {
                    field: "task_types".to_string(),
                    reason: format!("incomplete entry {:?}", task_type),
                });
            }
        }
        Ok(())
    }

    /// Set the lock directory
    #[must_use]
    pub fn with_lock_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.lock_dir = dir.into();
        self
    }

    /// Set the default lock timeout
    #[must_use]
    pub fn with_default_lock_timeout(mut self, timeout: Duration) -> Self {
        self.default_lock_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Add a task type to register at start-up
    #[must_use]
    pub fn with_task_type(mut self, task_type: TaskTypeRef) -> Self {
        self.task_types.push(task_type);
        self
    }

    /// Enable/disable fail-fast
    #[must_use]
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Default lock timeout as a duration
    #[must_use]
    pub fn default_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.default_lock_timeout_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}
