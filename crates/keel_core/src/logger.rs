//! Build log capability.
//!
//! Engine code only talks to [`BuildLogger`]; where the messages end up is
//! decided by whoever constructs the build. [`TracingLogger`] forwards to
//! `tracing`, [`MemoryLogger`] keeps records for inspection in tests.

use crate::error::CoreError;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// Severity of a build log message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LogLevel {
    /// Engine internals
    Debug,
    /// Detailed progress
    Verbose,
    /// Normal progress
    Info,
    /// Something looks wrong but the build continues
    Warning,
    /// A failure
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Debug => "debug",
            Self::Verbose => "verbose",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

impl FromStr for LogLevel {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "verbose" => Ok(Self::Verbose),
            "info" => Ok(Self::Info),
            "warning" | "warn" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            _ => Err(CoreError::Validation {
                field: "level".to_string(),
                reason: format!("unknown log level '{}'", s),
            }),
        }
    }
}

/// Task or target a message is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribution<'a> {
    /// Message from a task, by logical task name
    Task(&'a str),
    /// Message about a target, by target name
    Target(&'a str),
}

impl fmt::Display for Attribution<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task(name) => write!(f, "[{}]", name),
            Self::Target(name) => write!(f, "{}:", name),
        }
    }
}

/// Diagnostic sink consumed by the engine
///
/// Implementations must be shareable between branches.
pub trait BuildLogger: Send + Sync {
    /// Log a plain message
    fn log(&self, level: LogLevel, message: &str);

    /// Log a message attributed to a task or target
    fn log_attributed(&self, source: Attribution<'_>, level: LogLevel, message: &str) {
        self.log(level, &format!("{} {}", source, message));
    }

    /// Log a formatted message
    fn log_fmt(&self, level: LogLevel, args: fmt::Arguments<'_>) {
        self.log(level, &args.to_string());
    }

    /// Increase display indentation
    fn indent(&self);

    /// Decrease display indentation
    fn outdent(&self);
}

/// Tracks an indentation depth shared by all users of one logger
#[derive(Debug, Default)]
struct Indentation(AtomicUsize);

impl Indentation {
    fn increase(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    fn decrease(&self) {
        // Saturate at zero; an unmatched outdent is harmless.
        let _ = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |depth| {
                depth.checked_sub(1)
            });
    }

    fn depth(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

/// Logger that forwards build messages to `tracing`
#[derive(Debug, Default)]
pub struct TracingLogger {
    indentation: Indentation,
}

impl TracingLogger {
    /// Create a new tracing logger
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl BuildLogger for TracingLogger {
    fn log(&self, level: LogLevel, message: &str) {
        let pad = self.indentation.depth() * 2;
        match level {
            LogLevel::Debug => tracing::trace!(target: "keel::build", "{:pad$}{}", "", message),
            LogLevel::Verbose => tracing::debug!(target: "keel::build", "{:pad$}{}", "", message),
            LogLevel::Info => tracing::info!(target: "keel::build", "{:pad$}{}", "", message),
            LogLevel::Warning => tracing::warn!(target: "keel::build", "{:pad$}{}", "", message),
            LogLevel::Error => tracing::error!(target: "keel::build", "{:pad$}{}", "", message),
        }
    }

    fn indent(&self) {
        self.indentation.increase();
    }

    fn outdent(&self) {
        self.indentation.decrease();
    }
}

/// One message captured by [`MemoryLogger`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Severity
    pub level: LogLevel,
    /// Indentation depth at the time of logging
    pub depth: usize,
    /// Message text, including any attribution prefix
    pub message: String,
}

/// Logger that keeps every message in memory
#[derive(Debug, Default)]
pub struct MemoryLogger {
    indentation: Indentation,
    records: Mutex<Vec<LogRecord>>,
}

impl MemoryLogger {
    /// Create an empty memory logger
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all records so far
    #[must_use]
    pub fn records(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Messages only, in logging order
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.records().into_iter().map(|r| r.message).collect()
    }

    /// Whether any message contains `needle`
    #[must_use]
    pub fn contains(&self, needle: &str) -> bool {
        self.records().iter().any(|r| r.message.contains(needle))
    }
}

impl BuildLogger for MemoryLogger {
    fn log(&self, level: LogLevel, message: &str) {
        let record = LogRecord {
            level,
            depth: self.indentation.depth(),
            message: message.to_string(),
        };
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }

    fn indent(&self) {
        self.indentation.increase();
    }

    fn outdent(&self) {
        self.indentation.decrease();
    }
}
