//! KEEL Runtime
//!
//! Orders a project's targets by dependency, runs them on a root branch and
//! provides the built-in task catalog, including the `parallel` container
//! that forks branches.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod registry;
pub mod runner;
pub mod scheduler;
pub mod tasks;

pub use registry::{default_modules, default_registry};
pub use runner::{BuildError, BuildReport, BuildResult, BuildRunner, BuildStatus};
pub use scheduler::{ScheduleDecision, ScheduleError, Scheduler};
pub use tasks::{
    builtin_module, CallTask, EchoPrefix, EchoTask, FailTask, ParallelTask, SleepTask,
    BUILTIN_MODULE,
};
