//! KEEL Task Model
//!
//! Tasks and targets, the per-branch call stack that records which of them
//! are active, and the registry that turns a declared task name into a task
//! instance.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod ancestry;
pub mod context;
pub mod frame;
pub mod plugin;
pub mod project;
pub mod registry;
pub mod stack;
pub mod trait_;

pub use ancestry::Ancestry;
pub use context::ExecutionContext;
pub use frame::{Frame, FrameKind, TargetFrame, TaskFrame};
pub use plugin::{Plugin, PluginCatalog, PluginConsumer, PluginScanner};
pub use project::{Project, ProjectDefinition, Target, TargetDefinition};
pub use registry::{
    InstantiationError, RegistrationError, TaskDescriptor, TaskEntry, TaskModule, TaskRegistry,
};
pub use stack::{CallStack, FrameGuard, StackOwner};
pub use trait_::{DeclaredTask, Task, TaskElement, TaskError, TaskResult};
