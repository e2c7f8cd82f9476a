//! Task trait, task declarations and task errors.

use crate::context::ExecutionContext;
use crate::plugin::PluginConsumer;
use crate::registry::{InstantiationError, RegistrationError, TaskRegistry};
use indexmap::IndexMap;
use keel_core::SourceLocation;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::time::Duration;

/// Task result type
pub type TaskResult<T> = Result<T, TaskError>;

/// Errors raised while initializing or executing tasks
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// Declaration is invalid; raised before execution
    #[error("Invalid configuration for <{task}>: {reason}")]
    Configuration {
        /// Task name
        task: String,
        /// What is wrong
        reason: String,
    },

    /// A lock with the same name is already held further up this branch
    #[error(
        "Deadlock: lock '{name}' is already taken by an ancestor on this branch ({})",
        .ancestry.join(" <- ")
    )]
    Deadlock {
        /// Lock name
        name: String,
        /// Active frames, innermost first
        ancestry: Vec<String>,
    },

    /// Named lock was not acquired in time
    #[error("Timed out after {timeout:?} waiting for lock '{name}'")]
    Timeout {
        /// Lock name
        name: String,
        /// Configured bound
        timeout: Duration,
    },

    /// Build was cancelled
    #[error("<{task}> cancelled")]
    Cancelled {
        /// Task that observed the cancellation
        task: String,
    },

    /// A task nested inside another failed
    #[error("<{task}> failed in nested task: {source}")]
    Nested {
        /// Enclosing task
        task: String,
        /// Nested failure
        #[source]
        source: Box<TaskError>,
    },

    /// Task reported a failure
    #[error("<{task}> failed: {message}")]
    Failed {
        /// Task name
        task: String,
        /// Failure message
        message: String,
    },

    /// Referenced target does not exist
    #[error("Target '{name}' does not exist in this project")]
    TargetNotFound {
        /// Target name
        name: String,
    },

    /// Host lock facility reported an error
    #[error("Lock '{name}' failed: {message}")]
    Lock {
        /// Lock name
        name: String,
        /// Host error message
        message: String,
    },

    /// Task type could not be registered or resolved
    #[error(transparent)]
    Registration(#[from] RegistrationError),

    /// Task could not be constructed
    #[error(transparent)]
    Instantiation(#[from] InstantiationError),
}

impl TaskError {
    /// Whether this error (or the innermost nested one) is a cancellation
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        match self {
            Self::Cancelled { .. } => true,
            Self::Nested { source, .. } => source.is_cancellation(),
            _ => false,
        }
    }

    /// Innermost error of a chain of nested failures
    #[must_use]
    pub fn root_cause(&self) -> &TaskError {
        match self {
            Self::Nested { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Wrap as a nested failure of `task`
    #[must_use]
    pub fn nested_in(self, task: impl Into<String>) -> Self {
        Self::Nested {
            task: task.into(),
            source: Box::new(self),
        }
    }
}

/// Structured declaration of one task
///
/// Script parsing happens elsewhere; this is what it produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskElement {
    /// Logical task name
    pub task: String,
    /// Attributes in declaration order
    #[serde(default)]
    pub attributes: IndexMap<String, String>,
    /// Nested task declarations
    #[serde(default)]
    pub children: Vec<TaskElement>,
    /// Where the declaration came from
    #[serde(default)]
    pub location: Option<SourceLocation>,
}

impl TaskElement {
    /// Create an element with no attributes or children
    #[must_use]
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            attributes: IndexMap::new(),
            children: Vec::new(),
            location: None,
        }
    }

    /// Add an attribute
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Add a nested element
    #[must_use]
    pub fn with_child(mut self, child: TaskElement) -> Self {
        self.children.push(child);
        self
    }

    /// Set the declaration location
    #[must_use]
    pub fn with_location(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    /// Look up an attribute
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Look up an attribute that must be present
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the attribute is missing
    pub fn required_attribute(&self, name: &str) -> TaskResult<&str> {
        self.attribute(name).ok_or_else(|| TaskError::Configuration {
            task: self.task.clone(),
            reason: format!("missing required attribute '{}'", name),
        })
    }
}

/// A unit of build work
///
/// Instances are created by the [`TaskRegistry`], initialized from their
/// declaration and then shared read-only (`Arc<dyn Task>`) by every frame
/// that refers to them.
pub trait Task: Send + Sync + 'static {
    /// Logical task name
    fn name(&self) -> &str;

    /// Run the task on the branch owning `ctx`
    ///
    /// # Errors
    ///
    /// Returns error if the task fails
    fn execute(&self, ctx: &mut ExecutionContext) -> TaskResult<()>;

    /// Configure the task from its declaration
    ///
    /// Containers use `registry` to build their children.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the declaration is invalid
    fn initialize(&mut self, _element: &TaskElement, _registry: &TaskRegistry) -> TaskResult<()> {
        Ok(())
    }

    /// Where the task was declared
    fn location(&self) -> Option<&SourceLocation> {
        None
    }

    /// Access to the concrete type, for ancestry inspection
    fn as_any(&self) -> &dyn Any;

    /// Optional plugin consumer capability
    fn as_plugin_consumer(&mut self) -> Option<&mut dyn PluginConsumer> {
        None
    }
}

/// A task type that declares its own logical name
pub trait DeclaredTask: Task + Sized {
    /// Logical name used as the registry key
    const TASK_NAME: &'static str;

    /// Construct an uninitialized instance
    ///
    /// # Errors
    ///
    /// Returns a reason when the instance cannot be constructed
    fn construct() -> Result<Self, String>;
}
