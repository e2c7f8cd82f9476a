//! Per-branch execution context.

use crate::frame::Frame;
use crate::project::{Project, Target};
use crate::stack::sealed::{StackAccess, Token};
use crate::stack::{CallStack, StackOwner};
use crate::trait_::{Task, TaskError, TaskResult};
use keel_core::{Attribution, BuildLogger, EngineConfig, LogLevel};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything a task can reach while it runs on one branch
///
/// The call stack is owned exclusively; project, configuration, logger and
/// cancellation token are shared by every branch of the build.
pub struct ExecutionContext {
    stack: CallStack,
    project: Arc<Project>,
    config: Arc<EngineConfig>,
    logger: Arc<dyn BuildLogger>,
    cancel: CancellationToken,
}

impl ExecutionContext {
    /// Context for the root branch of a build
    #[must_use]
    pub fn new(
        project: Arc<Project>,
        config: Arc<EngineConfig>,
        logger: Arc<dyn BuildLogger>,
    ) -> Self {
        Self {
            stack: CallStack::new(),
            project,
            config,
            logger,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned cancellation token
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Context for a new branch forked from this one
    ///
    /// Forks the call stack and shares everything else.
    #[must_use]
    pub fn fork(&self) -> Self {
        Self {
            stack: self.stack.fork(),
            project: Arc::clone(&self.project),
            config: Arc::clone(&self.config),
            logger: Arc::clone(&self.logger),
            cancel: self.cancel.clone(),
        }
    }

    /// The project being built
    #[must_use]
    pub fn project(&self) -> &Arc<Project> {
        &self.project
    }

    /// Engine configuration
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Build logger
    #[must_use]
    pub fn logger(&self) -> &Arc<dyn BuildLogger> {
        &self.logger
    }

    /// Build-wide cancellation token
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the build has been cancelled
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fail with [`TaskError::Cancelled`] if the build was cancelled
    ///
    /// # Errors
    ///
    /// Returns error if cancellation was requested
    pub fn check_cancelled(&self, task: &str) -> TaskResult<()> {
        if self.is_cancelled() {
            return Err(TaskError::Cancelled {
                task: task.to_string(),
            });
        }
        Ok(())
    }

    /// Run a task inside its own frame
    ///
    /// # Errors
    ///
    /// Returns the task's error, or `Cancelled` if the build was cancelled
    /// before it started
    pub fn run_task(&mut self, task: &Arc<dyn Task>) -> TaskResult<()> {
        self.check_cancelled(task.name())?;
        let mut scope = self.enter(Frame::task(Arc::clone(task)));
        let result = task.execute(&mut scope);
        if let Err(err) = &result {
            scope
                .logger
                .log_attributed(Attribution::Task(task.name()), LogLevel::Error, &err.to_string());
        }
        result
    }

    /// Run a target of this project by name, without its dependencies
    ///
    /// # Errors
    ///
    /// Returns error if the target does not exist or one of its tasks fails
    pub fn run_target(&mut self, name: &str) -> TaskResult<()> {
        let target = self
            .project
            .target(name)
            .cloned()
            .ok_or_else(|| TaskError::TargetNotFound {
                name: name.to_string(),
            })?;
        self.execute_target(&target)
    }

    /// Run a target's tasks in order inside a target frame
    ///
    /// # Errors
    ///
    /// Returns the first task error
    pub fn execute_target(&mut self, target: &Arc<Target>) -> TaskResult<()> {
        let logger = Arc::clone(&self.logger);
        let mut scope = self.enter(Frame::target(Arc::clone(target)));

        logger.log_attributed(Attribution::Target(target.name()), LogLevel::Info, "");
        logger.indent();
        let result = target
            .tasks()
            .iter()
            .try_for_each(|task| scope.run_task(task));
        logger.outdent();
        result
    }
}

impl StackOwner for ExecutionContext {
    fn call_stack(&self) -> &CallStack {
        &self.stack
    }
}

impl StackAccess for ExecutionContext {
    fn call_stack_mut(&mut self, _token: Token) -> &mut CallStack {
        &mut self.stack
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::MemoryLogger;
    use std::any::Any;
    use std::sync::Mutex;

    /// Records the ancestry it sees when executed
    struct Probe {
        seen: Arc<Mutex<Vec<Vec<String>>>>,
    }

    impl Task for Probe {
        fn name(&self) -> &str {
            "probe"
        }

        fn execute(&self, ctx: &mut ExecutionContext) -> TaskResult<()> {
            let names = ctx
                .call_stack()
                .traverse()
                .map(|f| f.name().to_string())
                .collect();
            self.seen.lock().unwrap().push(names);
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct Boom;

    impl Task for Boom {
        fn name(&self) -> &str {
            "boom"
        }

        fn execute(&self, _ctx: &mut ExecutionContext) -> TaskResult<()> {
            Err(TaskError::Failed {
                task: "boom".to_string(),
                message: "exploded".to_string(),
            })
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn context(project: Project, logger: Arc<MemoryLogger>) -> ExecutionContext {
        ExecutionContext::new(Arc::new(project), Arc::new(EngineConfig::default()), logger)
    }

    #[test]
    fn test_run_target_pushes_frames() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let probe: Arc<dyn Task> = Arc::new(Probe {
            seen: Arc::clone(&seen),
        });
        let mut project = Project::new("p");
        project
            .add_target(Target::new("build").with_task(probe))
            .unwrap();

        let logger = Arc::new(MemoryLogger::new());
        let mut ctx = context(project, Arc::clone(&logger));
        ctx.run_target("BUILD").unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![vec!["probe".to_string(), "build".to_string()]]
        );
        assert!(ctx.call_stack().is_empty());
        assert!(logger.contains("build:"));
    }

    #[test]
    fn test_failure_pops_and_logs() {
        let mut project = Project::new("p");
        project
            .add_target(Target::new("t").with_task(Arc::new(Boom)))
            .unwrap();
        let logger = Arc::new(MemoryLogger::new());
        let mut ctx = context(project, Arc::clone(&logger));

        let err = ctx.run_target("t").unwrap_err();
        assert!(matches!(err, TaskError::Failed { .. }));
        assert!(ctx.call_stack().is_empty());
        assert!(logger.contains("[boom] <boom> failed: exploded"));
    }

    #[test]
    fn test_missing_target() {
        let mut ctx = context(Project::new("p"), Arc::new(MemoryLogger::new()));
        let err = ctx.run_target("ghost").unwrap_err();
        assert_eq!(
            err,
            TaskError::TargetNotFound {
                name: "ghost".to_string()
            }
        );
    }

    #[test]
    fn test_cancelled_before_start() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let probe: Arc<dyn Task> = Arc::new(Probe {
            seen: Arc::clone(&seen),
        });
        let mut ctx = context(Project::new("p"), Arc::new(MemoryLogger::new()));
        ctx.cancellation().cancel();

        let err = ctx.run_task(&probe).unwrap_err();
        assert!(err.is_cancellation());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_fork_shares_token_but_not_stack() {
        let target = Arc::new(Target::new("build"));
        let mut ctx = context(Project::new("p"), Arc::new(MemoryLogger::new()));
        let scope = ctx.enter(Frame::target(target));

        let child = scope.fork();
        assert_eq!(child.call_stack().depth(), 1);
        assert_eq!(child.call_stack().parent_branch(), Some(scope.call_stack().branch()));

        scope.cancellation().cancel();
        assert!(child.is_cancelled());
    }
}
