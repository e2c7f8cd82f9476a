use keel_core::{Attribution, LogLevel, SourceLocation};
use keel_task::{
    DeclaredTask, ExecutionContext, Plugin, PluginConsumer, Task, TaskElement, TaskError,
    TaskRegistry, TaskResult,
};
use std::any::Any;
use std::sync::Arc;

/// Writes a message to the build log
///
/// Attributes: `message` (default empty), `level` (default `info`).
/// Accepts [`EchoPrefix`] plugins.
#[derive(Default)]
pub struct EchoTask {
    message: String,
    level: Option<LogLevel>,
    prefixes: Vec<String>,
    location: Option<SourceLocation>,
}

impl EchoTask {
    /// Echo `message` at `info`
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    /// Log at `level` instead
    #[must_use]
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = Some(level);
        self
    }

    /// Text that will be logged, plugins applied
    #[must_use]
    pub fn rendered(&self) -> String {
        let mut out = self.prefixes.concat();
        out.push_str(&self.message);
        out
    }
}

impl Task for EchoTask {
    fn name(&self) -> &str {
        Self::TASK_NAME
    }

    fn initialize(&mut self, element: &TaskElement, _registry: &TaskRegistry) -> TaskResult<()> {
        self.message = element.attribute("message").unwrap_or_default().to_string();
        self.level = element
            .attribute("level")
            .map(str::parse)
            .transpose()
            .map_err(|err: keel_core::CoreError| TaskError::Configuration {
                task: Self::TASK_NAME.to_string(),
                reason: err.to_string(),
            })?;
        self.location = element.location.clone();
        Ok(())
    }

    fn execute(&self, ctx: &mut ExecutionContext) -> TaskResult<()> {
        ctx.logger().log_attributed(
            Attribution::Task(Self::TASK_NAME),
            self.level.unwrap_or(LogLevel::Info),
            &self.rendered(),
        );
        Ok(())
    }

    fn location(&self) -> Option<&SourceLocation> {
        self.location.as_ref()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_plugin_consumer(&mut self) -> Option<&mut dyn PluginConsumer> {
        Some(self)
    }
}

impl PluginConsumer for EchoTask {
    fn accepts(&self, plugin: &dyn Plugin) -> bool {
        plugin.as_any().is::<EchoPrefix>()
    }

    fn attach_plugin(&mut self, plugin: Arc<dyn Plugin>) {
        if let Some(prefix) = plugin.as_any().downcast_ref::<EchoPrefix>() {
            self.prefixes.push(prefix.prefix.clone());
        }
    }
}

impl DeclaredTask for EchoTask {
    const TASK_NAME: &'static str = "echo";

    fn construct() -> Result<Self, String> {
        Ok(Self::default())
    }
}

/// Plugin that prefixes every `echo` message
#[derive(Debug, Clone)]
pub struct EchoPrefix {
    prefix: String,
}

impl EchoPrefix {
    /// Create a prefix plugin
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Plugin for EchoPrefix {
    fn name(&self) -> &str {
        "echo-prefix"
    }

    fn extends(&self) -> &str {
        EchoTask::TASK_NAME
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
