//! The `mutex` task.
//!
//! Runs its nested tasks while holding a system-wide named lock. Before
//! waiting for the lock it walks its own branch's ancestry: if an enclosing
//! `mutex` with the same name is already active on this branch, waiting could
//! never succeed, so it fails at once with a deadlock error.
//!
//! Only the branch's own ancestry is inspected. Two concurrent branches that
//! each wait for a lock the other holds are not detected; they run into the
//! timeout instead.

use crate::named_lock::{LockError, NamedLock};
use keel_core::{Attribution, BranchId, BuildLogger, LogLevel, SourceLocation};
use keel_task::{
    DeclaredTask, ExecutionContext, StackOwner, Task, TaskDescriptor, TaskElement, TaskError,
    TaskModule, TaskRegistry, TaskResult,
};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Logical name of the mutex task
pub const MUTEX_TASK_NAME: &str = "mutex";

/// Name of the module holding the synchronization tasks
pub const SYNC_MODULE: &str = "keel.sync";

/// Module with the synchronization tasks
#[must_use]
pub fn sync_module() -> TaskModule {
    TaskModule::new(SYNC_MODULE).with_descriptor(TaskDescriptor::declared::<NamedMutexTask>())
}

/// Execution states of one mutex invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutexState {
    /// Not started
    Idle,
    /// Looking for an enclosing mutex of the same name
    CheckingAncestry,
    /// An enclosing mutex already uses the name (terminal)
    DeadlockDetected,
    /// Waiting for the named lock
    Waiting,
    /// Lock not acquired in time (terminal)
    TimedOut,
    /// Lock held, nested tasks running
    Holding,
    /// Lock released (terminal)
    Released,
}

impl fmt::Display for MutexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::CheckingAncestry => "checking-ancestry",
            Self::DeadlockDetected => "deadlock-detected",
            Self::Waiting => "waiting",
            Self::TimedOut => "timed-out",
            Self::Holding => "holding",
            Self::Released => "released",
        };
        f.write_str(s)
    }
}

/// Serializes its nested tasks on a system-wide named lock
pub struct NamedMutexTask {
    name: String,
    timeout: Duration,
    tasks: Vec<Arc<dyn Task>>,
    lock: Option<NamedLock>,
    location: Option<SourceLocation>,
}

impl NamedMutexTask {
    /// Mutex over `lock_dir`, with no nested tasks yet
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the name is not a valid lock name or
    /// the timeout is zero
    pub fn new(
        lock_dir: impl AsRef<std::path::Path>,
        name: impl Into<String>,
        timeout: Duration,
    ) -> TaskResult<Self> {
        let name = name.into();
        if timeout.is_zero() {
            return Err(configuration("timeout must be positive"));
        }
        let lock = NamedLock::new(lock_dir, name.clone())?;
        Ok(Self {
            name,
            timeout,
            tasks: Vec::new(),
            lock: Some(lock),
            location: None,
        })
    }

    /// Append a nested task
    #[must_use]
    pub fn with_task(mut self, task: Arc<dyn Task>) -> Self {
        self.tasks.push(task);
        self
    }

    /// Lock name
    #[must_use]
    pub fn lock_name(&self) -> &str {
        &self.name
    }

    /// Acquisition bound
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Nested tasks in declaration order
    #[must_use]
    pub fn tasks(&self) -> &[Arc<dyn Task>] {
        &self.tasks
    }

    fn transition(&self, branch: BranchId, state: MutexState) {
        tracing::debug!(lock = %self.name, %branch, %state, "mutex transition");
    }

    /// Fail if an enclosing mutex on this branch already uses the name
    fn check_ancestry(&self, ctx: &ExecutionContext) -> TaskResult<()> {
        let key = self.name.to_lowercase();
        let holder = ctx
            .call_stack()
            .traverse()
            .ancestors()
            .tasks_of::<NamedMutexTask>()
            .find(|ancestor| {
                !std::ptr::eq(*ancestor, self) && ancestor.name.to_lowercase() == key
            });

        match holder {
            Some(_) => Err(TaskError::Deadlock {
                name: self.name.clone(),
                ancestry: ctx.call_stack().traverse().describe(),
            }),
            None => Ok(()),
        }
    }

    /// Report the release, then surface the nested failure before any
    /// release failure
    fn finish(
        &self,
        branch: BranchId,
        logger: &dyn BuildLogger,
        nested: TaskResult<()>,
        released: Result<(), LockError>,
    ) -> TaskResult<()> {
        match &released {
            Ok(()) => {
                self.transition(branch, MutexState::Released);
                logger.log_attributed(
                    Attribution::Task(MUTEX_TASK_NAME),
                    LogLevel::Verbose,
                    &format!("released lock '{}'", self.name),
                );
            }
            Err(err) => {
                tracing::warn!(lock = %self.name, %branch, error = %err, "failed to release lock");
            }
        }

        nested.map_err(|err| err.nested_in(MUTEX_TASK_NAME))?;
        released.map_err(TaskError::from)
    }

    /// Run the nested tasks in order, stopping at the first failure
    fn run_nested(&self, ctx: &mut ExecutionContext) -> TaskResult<()> {
        for task in &self.tasks {
            ctx.check_cancelled(MUTEX_TASK_NAME)?;
            ctx.run_task(task)?;
        }
        Ok(())
    }
}

fn configuration(reason: impl Into<String>) -> TaskError {
    TaskError::Configuration {
        task: MUTEX_TASK_NAME.to_string(),
        reason: reason.into(),
    }
}

fn parse_timeout(raw: &str) -> TaskResult<Duration> {
    let millis: u64 = raw
        .trim()
        .parse()
        .map_err(|_| configuration(format!("timeout '{}' is not a number of milliseconds", raw)))?;
    if millis == 0 {
        return Err(configuration("timeout must be positive"));
    }
    Ok(Duration::from_millis(millis))
}

impl Task for NamedMutexTask {
    fn name(&self) -> &str {
        MUTEX_TASK_NAME
    }

    fn initialize(&mut self, element: &TaskElement, registry: &TaskRegistry) -> TaskResult<()> {
        let name = element.required_attribute("name")?;
        let timeout = match element.attribute("timeout") {
            Some(raw) => parse_timeout(raw)?,
            None => registry.config().default_lock_timeout(),
        };
        if timeout.is_zero() {
            return Err(configuration("timeout must be positive"));
        }

        self.lock = Some(NamedLock::new(&registry.config().lock_dir, name)?);
        self.name = name.to_string();
        self.timeout = timeout;
        self.tasks = element
            .children
            .iter()
            .map(|child| registry.instantiate(child))
            .collect::<TaskResult<_>>()?;
        self.location = element.location.clone();
        Ok(())
    }

    fn execute(&self, ctx: &mut ExecutionContext) -> TaskResult<()> {
        let lock = self
            .lock
            .as_ref()
            .ok_or_else(|| configuration("mutex executed before initialization"))?;
        let branch = ctx.call_stack().branch();

        self.transition(branch, MutexState::CheckingAncestry);
        if let Err(err) = self.check_ancestry(ctx) {
            self.transition(branch, MutexState::DeadlockDetected);
            return Err(err);
        }

        self.transition(branch, MutexState::Waiting);
        let guard = match lock.acquire(self.timeout, ctx.cancellation()) {
            Ok(guard) => guard,
            Err(err) => {
                if matches!(err, LockError::Timeout { .. }) {
                    self.transition(branch, MutexState::TimedOut);
                }
                return Err(err.into());
            }
        };

        self.transition(branch, MutexState::Holding);
        let logger = Arc::clone(ctx.logger());
        logger.log_attributed(
            Attribution::Task(MUTEX_TASK_NAME),
            LogLevel::Verbose,
            &format!("acquired lock '{}'", self.name),
        );

        logger.indent();
        let nested = self.run_nested(ctx);
        logger.outdent();

        self.finish(branch, &*logger, nested, guard.release())
    }

    fn location(&self) -> Option<&SourceLocation> {
        self.location.as_ref()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl DeclaredTask for NamedMutexTask {
    const TASK_NAME: &'static str = MUTEX_TASK_NAME;

    fn construct() -> Result<Self, String> {
        Ok(Self {
            name: String::new(),
            timeout: Duration::ZERO,
            tasks: Vec::new(),
            lock: None,
            location: None,
        })
    }
}

impl fmt::Debug for NamedMutexTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedMutexTask")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("tasks", &self.tasks.len())
            .finish()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use keel_core::{EngineConfig, MemoryLogger};
    use keel_task::Project;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;
    use tempfile::TempDir;

    struct Count(Arc<AtomicUsize>);

    impl Task for Count {
        fn name(&self) -> &str {
            "count"
        }

        fn execute(&self, _ctx: &mut ExecutionContext) -> TaskResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct Fail;

    impl Task for Fail {
        fn name(&self) -> &str {
            "fail"
        }

        fn execute(&self, _ctx: &mut ExecutionContext) -> TaskResult<()> {
            Err(TaskError::Failed {
                task: "fail".to_string(),
                message: "nested failure".to_string(),
            })
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn context(logger: Arc<MemoryLogger>) -> ExecutionContext {
        ExecutionContext::new(
            Arc::new(Project::new("test")),
            Arc::new(EngineConfig::default()),
            logger,
        )
    }

    fn registry(dir: &TempDir) -> TaskRegistry {
        let config = EngineConfig::default().with_lock_dir(dir.path());
        let mut registry = TaskRegistry::new(Arc::new(config));
        registry.register_module(&sync_module()).unwrap();
        registry
    }

    fn mutex(dir: &TempDir, name: &str, timeout: Duration) -> NamedMutexTask {
        NamedMutexTask::new(dir.path(), name, timeout).unwrap()
    }

    #[test]
    fn test_runs_nested_once_and_releases() {
        let dir = TempDir::new().unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let task: Arc<dyn Task> = Arc::new(
            mutex(&dir, "build-lock", Duration::from_secs(2))
                .with_task(Arc::new(Count(Arc::clone(&runs)))),
        );
        let logger = Arc::new(MemoryLogger::new());
        let mut ctx = context(Arc::clone(&logger));

        let start = Instant::now();
        ctx.run_task(&task).unwrap();
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(logger.contains("acquired lock 'build-lock'"));
        assert!(logger.contains("released lock 'build-lock'"));

        let probe = NamedLock::new(dir.path(), "build-lock").unwrap();
        assert!(probe.try_acquire().unwrap().is_some());
    }

    #[test]
    fn test_release_after_nested_failure() {
        let dir = TempDir::new().unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let task: Arc<dyn Task> = Arc::new(
            mutex(&dir, "build-lock", Duration::from_secs(2))
                .with_task(Arc::new(Fail))
                .with_task(Arc::new(Count(Arc::clone(&runs)))),
        );
        let logger = Arc::new(MemoryLogger::new());
        let mut ctx = context(Arc::clone(&logger));

        let err = ctx.run_task(&task).unwrap_err();
        assert!(matches!(err, TaskError::Nested { ref task, .. } if task == MUTEX_TASK_NAME));
        assert!(matches!(err.root_cause(), TaskError::Failed { .. }));
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        let released = logger
            .messages()
            .iter()
            .filter(|m| m.contains("released lock 'build-lock'"))
            .count();
        assert_eq!(released, 1);

        let probe = NamedLock::new(dir.path(), "build-lock").unwrap();
        assert!(probe.try_acquire().unwrap().is_some());
    }

    #[test]
    fn test_self_deadlock_through_intermediate() {
        let dir = TempDir::new().unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let inner = mutex(&dir, "LOCKA", Duration::from_secs(30))
            .with_task(Arc::new(Count(Arc::clone(&runs))));
        let middle = mutex(&dir, "lockB", Duration::from_secs(30)).with_task(Arc::new(inner));
        let outer: Arc<dyn Task> =
            Arc::new(mutex(&dir, "lockA", Duration::from_secs(30)).with_task(Arc::new(middle)));
        let mut ctx = context(Arc::new(MemoryLogger::new()));

        let start = Instant::now();
        let err = ctx.run_task(&outer).unwrap_err();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        match err.root_cause() {
            TaskError::Deadlock { name, ancestry } => {
                assert_eq!(name, "LOCKA");
                assert_eq!(ancestry.len(), 3);
            }
            other => panic!("expected deadlock, got {other:?}"),
        }
        assert!(ctx.call_stack().is_empty());
        assert!(dir.path().join("lockA.lock").exists());
        assert!(!dir.path().join("LOCKA.lock").exists(), "inner mutex touched its lock");
    }

    #[test]
    fn test_self_deadlock_ignores_non_ascii_case() {
        let dir = TempDir::new().unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let inner = mutex(&dir, "ÄLOCK", Duration::from_secs(30))
            .with_task(Arc::new(Count(Arc::clone(&runs))));
        let outer: Arc<dyn Task> =
            Arc::new(mutex(&dir, "älock", Duration::from_secs(30)).with_task(Arc::new(inner)));
        let mut ctx = context(Arc::new(MemoryLogger::new()));

        let start = Instant::now();
        let err = ctx.run_task(&outer).unwrap_err();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(matches!(err.root_cause(), TaskError::Deadlock { name, .. } if name == "ÄLOCK"));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(!dir.path().join("ÄLOCK.lock").exists());
    }

    fn release_failure() -> LockError {
        LockError::Io {
            name: "build-lock".to_string(),
            source: std::io::Error::other("unlock refused"),
        }
    }

    #[test]
    fn test_failed_release_is_not_reported_as_released() {
        let dir = TempDir::new().unwrap();
        let task = mutex(&dir, "build-lock", Duration::from_secs(1));
        let logger = MemoryLogger::new();

        let err = task
            .finish(BranchId::new(), &logger, Ok(()), Err(release_failure()))
            .unwrap_err();
        assert!(matches!(err, TaskError::Lock { ref name, .. } if name == "build-lock"));
        assert!(!logger.contains("released lock"));
    }

    #[test]
    fn test_nested_failure_wins_over_failed_release() {
        let dir = TempDir::new().unwrap();
        let task = mutex(&dir, "build-lock", Duration::from_secs(1));
        let logger = MemoryLogger::new();
        let nested = Err(TaskError::Failed {
            task: "fail".to_string(),
            message: "broken".to_string(),
        });

        let err = task
            .finish(BranchId::new(), &logger, nested, Err(release_failure()))
            .unwrap_err();
        assert!(matches!(err, TaskError::Nested { ref task, .. } if task == MUTEX_TASK_NAME));
        assert!(matches!(err.root_cause(), TaskError::Failed { .. }));
        assert!(!logger.contains("released lock"));
    }

    #[test]
    fn test_different_names_nest() {
        let dir = TempDir::new().unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let inner = mutex(&dir, "b", Duration::from_secs(1))
            .with_task(Arc::new(Count(Arc::clone(&runs))));
        let outer: Arc<dyn Task> =
            Arc::new(mutex(&dir, "a", Duration::from_secs(1)).with_task(Arc::new(inner)));
        let mut ctx = context(Arc::new(MemoryLogger::new()));

        ctx.run_task(&outer).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_timeout_under_contention() {
        let dir = TempDir::new().unwrap();
        let _held = NamedLock::new(dir.path(), "build-lock")
            .unwrap()
            .try_acquire()
            .unwrap()
            .unwrap();
        let task: Arc<dyn Task> = Arc::new(mutex(&dir, "build-lock", Duration::from_millis(300)));
        let mut ctx = context(Arc::new(MemoryLogger::new()));

        let start = Instant::now();
        let err = ctx.run_task(&task).unwrap_err();
        let elapsed = start.elapsed();

        assert!(matches!(
            err,
            TaskError::Timeout { ref name, timeout }
                if name == "build-lock" && timeout == Duration::from_millis(300)
        ));
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_secs(3));
    }

    #[test]
    fn test_initialize_from_element() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let element = TaskElement::new("MUTEX")
            .with_attribute("name", "db")
            .with_attribute("timeout", "1500")
            .with_child(TaskElement::new("mutex").with_attribute("name", "inner"));

        let task = registry.instantiate(&element).unwrap();
        let mutex = task.as_any().downcast_ref::<NamedMutexTask>().unwrap();
        assert_eq!(mutex.lock_name(), "db");
        assert_eq!(mutex.timeout(), Duration::from_millis(1500));
        assert_eq!(mutex.tasks().len(), 1);

        let inner = mutex.tasks()[0].as_any().downcast_ref::<NamedMutexTask>().unwrap();
        assert_eq!(inner.timeout(), registry.config().default_lock_timeout());
    }

    #[test]
    fn test_initialize_rejects_bad_declarations() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);

        let cases = [
            TaskElement::new("mutex"),
            TaskElement::new("mutex").with_attribute("name", ""),
            TaskElement::new("mutex").with_attribute("name", "a/b"),
            TaskElement::new("mutex")
                .with_attribute("name", "x")
                .with_attribute("timeout", "0"),
            TaskElement::new("mutex")
                .with_attribute("name", "x")
                .with_attribute("timeout", "soon"),
        ];
        for element in cases {
            let err = registry.instantiate(&element).err();
            assert!(
                matches!(err, Some(TaskError::Configuration { .. })),
                "{element:?} should be rejected, got {err:?}"
            );
        }
    }

    #[test]
    fn test_uninitialized_mutex_fails() {
        let task: Arc<dyn Task> = Arc::new(NamedMutexTask::construct().unwrap());
        let mut ctx = context(Arc::new(MemoryLogger::new()));
        assert!(matches!(
            ctx.run_task(&task),
            Err(TaskError::Configuration { .. })
        ));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(MutexState::CheckingAncestry.to_string(), "checking-ancestry");
        assert_eq!(MutexState::Released.to_string(), "released");
    }
}
