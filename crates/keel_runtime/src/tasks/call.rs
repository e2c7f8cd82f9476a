use keel_task::{DeclaredTask, ExecutionContext, Task, TaskElement, TaskRegistry, TaskResult};
use std::any::Any;

/// Runs another target of the project on the current branch
///
/// Only the target's own tasks run; its dependencies are not consulted.
#[derive(Debug, Default)]
pub struct CallTask {
    target: String,
}

impl CallTask {
    /// Call `target`
    #[must_use]
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }

    /// Called target
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }
}

impl Task for CallTask {
    fn name(&self) -> &str {
        Self::TASK_NAME
    }

    fn initialize(&mut self, element: &TaskElement, _registry: &TaskRegistry) -> TaskResult<()> {
        self.target = element.required_attribute("target")?.to_string();
        Ok(())
    }

    fn execute(&self, ctx: &mut ExecutionContext) -> TaskResult<()> {
        ctx.run_target(&self.target)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl DeclaredTask for CallTask {
    const TASK_NAME: &'static str = "call";

    fn construct() -> Result<Self, String> {
        Ok(Self::default())
    }
}
