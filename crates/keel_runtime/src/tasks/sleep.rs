use keel_task::{
    DeclaredTask, ExecutionContext, Task, TaskElement, TaskError, TaskRegistry, TaskResult,
};
use std::any::Any;
use std::time::{Duration, Instant};

/// Longest uninterrupted nap between cancellation checks
const SLICE: Duration = Duration::from_millis(10);

/// Blocks the branch for `duration` milliseconds; stops early on cancellation
#[derive(Debug, Default)]
pub struct SleepTask {
    duration: Duration,
}

impl SleepTask {
    /// Sleep for `duration`
    #[must_use]
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

impl Task for SleepTask {
    fn name(&self) -> &str {
        Self::TASK_NAME
    }

    fn initialize(&mut self, element: &TaskElement, _registry: &TaskRegistry) -> TaskResult<()> {
        let raw = element.required_attribute("duration")?;
        let millis: u64 = raw.trim().parse().map_err(|_| TaskError::Configuration {
            task: Self::TASK_NAME.to_string(),
            reason: format!("duration '{}' is not a number of milliseconds", raw),
        })?;
        self.duration = Duration::from_millis(millis);
        Ok(())
    }

    fn execute(&self, ctx: &mut ExecutionContext) -> TaskResult<()> {
        let deadline = Instant::now() + self.duration;
        loop {
            ctx.check_cancelled(Self::TASK_NAME)?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            std::thread::sleep(SLICE.min(deadline - now));
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl DeclaredTask for SleepTask {
    const TASK_NAME: &'static str = "sleep";

    fn construct() -> Result<Self, String> {
        Ok(Self::default())
    }
}
