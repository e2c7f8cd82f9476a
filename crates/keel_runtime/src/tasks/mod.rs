//! Built-in tasks.

mod call;
mod echo;
mod fail;
mod parallel;
mod sleep;

pub use call::CallTask;
pub use echo::{EchoPrefix, EchoTask};
pub use fail::FailTask;
pub use parallel::ParallelTask;
pub use sleep::SleepTask;

use keel_task::{TaskDescriptor, TaskModule};

/// Name of the module holding the built-in tasks
pub const BUILTIN_MODULE: &str = "keel.builtin";

/// Module with every built-in task
#[must_use]
pub fn builtin_module() -> TaskModule {
    TaskModule::new(BUILTIN_MODULE)
        .with_descriptor(TaskDescriptor::declared::<EchoTask>())
        .with_descriptor(TaskDescriptor::declared::<FailTask>())
        .with_descriptor(TaskDescriptor::declared::<SleepTask>())
        .with_descriptor(TaskDescriptor::declared::<CallTask>())
        .with_descriptor(TaskDescriptor::declared::<ParallelTask>())
}
