//! Call stack frames.
//!
//! A frame records one active task or target invocation. Frames are
//! immutable: the payload is shared through an `Arc`, so forking a call stack
//! copies references, never tasks or targets.

use crate::project::Target;
use crate::trait_::Task;
use keel_core::SourceLocation;
use std::fmt;
use std::sync::Arc;

/// Kind of invocation a frame records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Task invocation
    Task,
    /// Target invocation
    Target,
}

/// Frame for an active task
#[derive(Clone)]
pub struct TaskFrame {
    task: Arc<dyn Task>,
    location: Option<SourceLocation>,
}

impl TaskFrame {
    /// The running task
    #[must_use]
    pub fn task(&self) -> &Arc<dyn Task> {
        &self.task
    }
}

/// Frame for an active target
#[derive(Clone)]
pub struct TargetFrame {
    target: Arc<Target>,
    location: Option<SourceLocation>,
}

impl TargetFrame {
    /// The running target
    #[must_use]
    pub fn target(&self) -> &Arc<Target> {
        &self.target
    }
}

/// One entry of a [`CallStack`](crate::CallStack)
#[derive(Clone)]
pub enum Frame {
    /// A task is running
    Task(TaskFrame),
    /// A target is running
    Target(TargetFrame),
}

impl Frame {
    /// Frame for a task, located where the task was declared
    #[must_use]
    pub fn task(task: Arc<dyn Task>) -> Self {
        let location = task.location().cloned();
        Self::Task(TaskFrame { task, location })
    }

    /// Frame for a target, located where the target was declared
    #[must_use]
    pub fn target(target: Arc<Target>) -> Self {
        let location = target.location().cloned();
        Self::Target(TargetFrame { target, location })
    }

    /// Override the source location
    #[must_use]
    pub fn with_location(mut self, location: SourceLocation) -> Self {
        match &mut self {
            Self::Task(frame) => frame.location = Some(location),
            Self::Target(frame) => frame.location = Some(location),
        }
        self
    }

    /// Invocation kind
    #[must_use]
    pub const fn kind(&self) -> FrameKind {
        match self {
            Self::Task(_) => FrameKind::Task,
            Self::Target(_) => FrameKind::Target,
        }
    }

    /// Task or target name
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Task(frame) => frame.task.name(),
            Self::Target(frame) => frame.target.name(),
        }
    }

    /// Source location, if known
    #[must_use]
    pub fn location(&self) -> Option<&SourceLocation> {
        match self {
            Self::Task(frame) => frame.location.as_ref(),
            Self::Target(frame) => frame.location.as_ref(),
        }
    }

    /// The task, for task frames
    #[must_use]
    pub fn as_task(&self) -> Option<&Arc<dyn Task>> {
        match self {
            Self::Task(frame) => Some(&frame.task),
            Self::Target(_) => None,
        }
    }

    /// The target, for target frames
    #[must_use]
    pub fn as_target(&self) -> Option<&Arc<Target>> {
        match self {
            Self::Task(_) => None,
            Self::Target(frame) => Some(&frame.target),
        }
    }

    /// The task as a concrete type, if this is a frame for a `T`
    #[must_use]
    pub fn downcast_task<T: Task>(&self) -> Option<&T> {
        self.as_task()
            .and_then(|task| task.as_any().downcast_ref::<T>())
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task(frame) => write!(f, "task <{}>", frame.task.name())?,
            Self::Target(frame) => write!(f, "target '{}'", frame.target.name())?,
        }
        if let Some(location) = self.location() {
            write!(f, " at {}", location)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("kind", &self.kind())
            .field("name", &self.name())
            .field("location", &self.location())
            .finish()
    }
}
