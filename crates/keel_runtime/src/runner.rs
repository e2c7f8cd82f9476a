//! Build runner.
//!
//! Plans the requested targets together with everything they depend on,
//! then runs them one at a time on the build's root branch. Parallel work
//! only happens inside a `parallel` task, which forks branches of its own.

use crate::scheduler::{ScheduleDecision, ScheduleError, Scheduler};
use keel_core::{BuildLogger, CoreError, EngineConfig, LogLevel};
use keel_task::{ExecutionContext, Project, StackOwner, TaskError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Build result type
pub type BuildResult<T> = Result<T, BuildError>;

/// Build errors
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// Requested or depended-on target does not exist
    #[error("Target '{name}' does not exist in project '{project}'")]
    TargetNotFound {
        /// Target name
        name: String,
        /// Project name
        project: String,
    },

    /// No target requested and the project declares no default
    #[error("No target requested and project '{project}' has no default target")]
    NoDefaultTarget {
        /// Project name
        project: String,
    },

    /// Target dependencies form a cycle
    #[error(transparent)]
    Cycle(#[from] ScheduleError),

    /// A target failed
    #[error("Target '{target}' failed: {source}")]
    TargetFailed {
        /// Failed target
        target: String,
        /// Task failure
        #[source]
        source: TaskError,
    },

    /// Task error outside any target
    #[error(transparent)]
    Task(#[from] TaskError),

    /// Configuration error
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Overall outcome of a build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
    /// Every planned target completed
    Success,
    /// At least one target failed
    Failed,
    /// The build was cancelled
    Cancelled,
}

/// What happened to each planned target
#[derive(Debug)]
pub struct BuildReport {
    /// Overall outcome
    pub status: BuildStatus,
    /// Completed targets, in run order
    pub completed: Vec<String>,
    /// Failed targets with their errors, in run order
    pub failed: Vec<(String, TaskError)>,
    /// Targets that never ran
    pub skipped: Vec<String>,
    /// Wall-clock duration
    pub elapsed: Duration,
}

impl BuildReport {
    /// Whether every planned target completed
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == BuildStatus::Success
    }
}

/// Runs targets of one project
pub struct BuildRunner {
    project: Arc<Project>,
    config: Arc<EngineConfig>,
    logger: Arc<dyn BuildLogger>,
    cancel: CancellationToken,
}

impl BuildRunner {
    /// Create a runner
    #[must_use]
    pub fn new(
        project: Arc<Project>,
        config: Arc<EngineConfig>,
        logger: Arc<dyn BuildLogger>,
    ) -> Self {
        Self {
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

    /// Token that cancels this runner's builds
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The project being built
    #[must_use]
    pub fn project(&self) -> &Arc<Project> {
        &self.project
    }

    /// Schedule `targets` (or the default target) and their dependencies
    ///
    /// # Errors
    ///
    /// Returns error if a target is unknown, no target can be chosen, or the
    /// dependencies form a cycle
    pub fn plan(&self, targets: &[&str]) -> BuildResult<Scheduler> {
        let requested: Vec<&str> = if targets.is_empty() {
            let default = self
                .project
                .default_target()
                .ok_or_else(|| BuildError::NoDefaultTarget {
                    project: self.project.name().to_string(),
                })?;
            vec![default]
        } else {
            targets.to_vec()
        };

        let mut scheduler = Scheduler::new();
        let mut visiting = Vec::new();
        for name in requested {
            self.schedule(name, &mut scheduler, &mut visiting)?;
        }
        Ok(scheduler)
    }

    /// Add `name` after its dependencies, depth first
    fn schedule(
        &self,
        name: &str,
        scheduler: &mut Scheduler,
        visiting: &mut Vec<String>,
    ) -> BuildResult<()> {
        let target = self
            .project
            .target(name)
            .ok_or_else(|| BuildError::TargetNotFound {
                name: name.to_string(),
                project: self.project.name().to_string(),
            })?;

        let id = target.name().to_lowercase();
        if visiting.contains(&id) {
            return Err(ScheduleError::Cycle {
                target: target.name().to_string(),
            }
            .into());
        }
        if scheduler.contains(target.name()) {
            return Ok(());
        }

        visiting.push(id);
        for dep in target.depends() {
            self.schedule(dep, scheduler, visiting)?;
        }
        visiting.pop();

        scheduler.add_target(target.name(), target.depends())?;
        Ok(())
    }

    /// Run targets and report per-target outcomes
    ///
    /// Failures are recorded in the report; with `fail_fast` the first one
    /// stops the build.
    ///
    /// # Errors
    ///
    /// Returns error only if planning fails
    pub fn execute(&self, targets: &[&str]) -> BuildResult<BuildReport> {
        let mut scheduler = self.plan(targets)?;
        let start = Instant::now();
        let mut ctx = ExecutionContext::new(
            Arc::clone(&self.project),
            Arc::clone(&self.config),
            Arc::clone(&self.logger),
        )
        .with_cancellation(self.cancel.clone());

        tracing::info!(
            project = %self.project.name(),
            targets = scheduler.len(),
            branch = %ctx.call_stack().branch(),
            "build started"
        );

        let mut completed = Vec::new();
        let mut failed = Vec::new();

        while let ScheduleDecision::Run(name) = scheduler.decide() {
            let Some(target) = self.project.target(&name).cloned() else {
                scheduler.mark_failed(&name);
                continue;
            };

            match ctx.execute_target(&target) {
                Ok(()) => {
                    scheduler.mark_complete(&name);
                    completed.push(name);
                }
                Err(err) => {
                    tracing::warn!(target_name = %name, error = %err, "target failed");
                    scheduler.mark_failed(&name);
                    let stop = self.config.fail_fast || err.is_cancellation();
                    failed.push((name, err));
                    if stop {
                        break;
                    }
                }
            }
        }

        let status = if self.cancel.is_cancelled() {
            BuildStatus::Cancelled
        } else if failed.is_empty() {
            BuildStatus::Success
        } else {
            BuildStatus::Failed
        };

        let report = BuildReport {
            status,
            completed,
            failed,
            skipped: scheduler.pending(),
            elapsed: start.elapsed(),
        };

        let summary = match report.status {
            BuildStatus::Success => "BUILD SUCCEEDED",
            BuildStatus::Failed => "BUILD FAILED",
            BuildStatus::Cancelled => "BUILD CANCELLED",
        };
        let level = if report.is_success() { LogLevel::Info } else { LogLevel::Error };
        self.logger.log(level, summary);
        self.logger.log_fmt(
            LogLevel::Info,
            format_args!("Total time: {:.2} seconds", report.elapsed.as_secs_f64()),
        );
        tracing::info!(
            project = %self.project.name(),
            status = ?report.status,
            completed = report.completed.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "build finished"
        );

        Ok(report)
    }

    /// Run targets, failing on the first failed target
    ///
    /// # Errors
    ///
    /// Returns error if planning fails or a target fails
    pub fn run(&self, targets: &[&str]) -> BuildResult<BuildReport> {
        let mut report = self.execute(targets)?;
        if report.failed.is_empty() {
            return Ok(report);
        }
        let (target, source) = report.failed.remove(0);
        Err(BuildError::TargetFailed { target, source })
    }
}
