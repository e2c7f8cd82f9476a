//! KEEL Core Types
//!
//! Shared types for every keel crate: branch identity, source locations,
//! engine configuration and the build-log capability.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod id;
pub mod location;
pub mod logger;

// Re-exports
pub use config::{EngineConfig, TaskTypeRef};
pub use error::{CoreError, CoreResult};
pub use id::BranchId;
pub use location::SourceLocation;
pub use logger::{Attribution, BuildLogger, LogLevel, LogRecord, MemoryLogger, TracingLogger};
