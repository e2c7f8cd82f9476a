use keel_core::SourceLocation;
use keel_task::{
    DeclaredTask, ExecutionContext, Task, TaskElement, TaskError, TaskRegistry, TaskResult,
};
use std::any::Any;

/// Always fails, with `message` (default "failed")
#[derive(Default)]
pub struct FailTask {
    message: Option<String>,
    location: Option<SourceLocation>,
}

impl FailTask {
    /// Fail with `message`
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            location: None,
        }
    }
}

impl Task for FailTask {
    fn name(&self) -> &str {
        Self::TASK_NAME
    }

    fn initialize(&mut self, element: &TaskElement, _registry: &TaskRegistry) -> TaskResult<()> {
        self.message = element.attribute("message").map(str::to_string);
        self.location = element.location.clone();
        Ok(())
    }

    fn execute(&self, _ctx: &mut ExecutionContext) -> TaskResult<()> {
        let message = self.message.as_deref().unwrap_or("failed");
        Err(TaskError::Failed {
            task: Self::TASK_NAME.to_string(),
            message: match &self.location {
                Some(location) => format!("{} ({})", message, location),
                None => message.to_string(),
            },
        })
    }

    fn location(&self) -> Option<&SourceLocation> {
        self.location.as_ref()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl DeclaredTask for FailTask {
    const TASK_NAME: &'static str = "fail";

    fn construct() -> Result<Self, String> {
        Ok(Self::default())
    }
}
