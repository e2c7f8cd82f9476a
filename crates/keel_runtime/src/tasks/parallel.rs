use keel_core::SourceLocation;
use keel_task::{
    DeclaredTask, ExecutionContext, StackOwner, Task, TaskElement, TaskError, TaskRegistry,
    TaskResult,
};
use std::any::Any;
use std::sync::Arc;

/// Runs each nested task on its own branch
///
/// Every branch gets a fork of the current call stack, so it sees the
/// enclosing frames but none of its siblings'. With `fail_fast`, the first
/// failing branch cancels its siblings. The task completes once every branch
/// has finished.
#[derive(Default)]
pub struct ParallelTask {
    tasks: Vec<Arc<dyn Task>>,
    location: Option<SourceLocation>,
}

impl ParallelTask {
    /// Create an empty container
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a branch
    #[must_use]
    pub fn with_task(mut self, task: Arc<dyn Task>) -> Self {
        self.tasks.push(task);
        self
    }
}

impl Task for ParallelTask {
    fn name(&self) -> &str {
        Self::TASK_NAME
    }

    fn initialize(&mut self, element: &TaskElement, registry: &TaskRegistry) -> TaskResult<()> {
        self.tasks = element
            .children
            .iter()
            .map(|child| registry.instantiate(child))
            .collect::<TaskResult<_>>()?;
        self.location = element.location.clone();
        Ok(())
    }

    fn execute(&self, ctx: &mut ExecutionContext) -> TaskResult<()> {
        let siblings = ctx.cancellation().child_token();
        let fail_fast = ctx.config().fail_fast;
        let parent = ctx.call_stack().branch();

        let results: Vec<TaskResult<()>> = std::thread::scope(|s| {
            let handles: Vec<_> = self
                .tasks
                .iter()
                .map(|task| {
                    let mut branch = ctx.fork().with_cancellation(siblings.clone());
                    let siblings = siblings.clone();
                    s.spawn(move || {
                        tracing::debug!(
                            %parent,
                            branch = %branch.call_stack().branch(),
                            task = task.name(),
                            "branch started"
                        );
                        let result = branch.run_task(task);
                        if result.is_err() && fail_fast {
                            siblings.cancel();
                        }
                        result
                    })
                })
                .collect();

            handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        Err(TaskError::Failed {
                            task: Self::TASK_NAME.to_string(),
                            message: "branch panicked".to_string(),
                        })
                    })
                })
                .collect()
        });

        // Report the failure that caused the others, not a sibling's cancellation.
        let mut errors: Vec<TaskError> = results.into_iter().filter_map(Result::err).collect();
        if errors.is_empty() {
            return Ok(());
        }
        let first = errors
            .iter()
            .position(|err| !err.is_cancellation())
            .unwrap_or(0);
        Err(errors.swap_remove(first).nested_in(Self::TASK_NAME))
    }

    fn location(&self) -> Option<&SourceLocation> {
        self.location.as_ref()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl DeclaredTask for ParallelTask {
    const TASK_NAME: &'static str = "parallel";

    fn construct() -> Result<Self, String> {
        Ok(Self::default())
    }
}
