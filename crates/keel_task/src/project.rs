//! Targets and projects.
//!
//! A [`Project`] is built from an already-structured [`ProjectDefinition`]
//! by instantiating every task declaration through the registry.

use crate::registry::TaskRegistry;
use crate::trait_::{Task, TaskElement, TaskError, TaskResult};
use indexmap::IndexMap;
use keel_core::{CoreError, CoreResult, SourceLocation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A named, ordered list of tasks with dependencies on other targets
pub struct Target {
    name: String,
    description: Option<String>,
    depends: Vec<String>,
    tasks: Vec<Arc<dyn Task>>,
    location: Option<SourceLocation>,
}

impl Target {
    /// Create an empty target
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            depends: Vec::new(),
            tasks: Vec::new(),
            location: None,
        }
    }

    /// Set the description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add a dependency
    #[must_use]
    pub fn with_dependency(mut self, target: impl Into<String>) -> Self {
        self.depends.push(target.into());
        self
    }

    /// Append a task
    #[must_use]
    pub fn with_task(mut self, task: Arc<dyn Task>) -> Self {
        self.tasks.push(task);
        self
    }

    /// Set the declaration location
    #[must_use]
    pub fn with_location(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    /// Target name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Description, if any
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Names of targets that must run first
    #[must_use]
    pub fn depends(&self) -> &[String] {
        &self.depends
    }

    /// Tasks in declaration order
    #[must_use]
    pub fn tasks(&self) -> &[Arc<dyn Task>] {
        &self.tasks
    }

    /// Where the target was declared
    #[must_use]
    pub fn location(&self) -> Option<&SourceLocation> {
        self.location.as_ref()
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tasks: Vec<&str> = self.tasks.iter().map(|t| t.name()).collect();
        f.debug_struct("Target")
            .field("name", &self.name)
            .field("depends", &self.depends)
            .field("tasks", &tasks)
            .finish()
    }
}

/// A set of targets; lookups are case-insensitive
#[derive(Debug)]
pub struct Project {
    name: String,
    default_target: Option<String>,
    targets: IndexMap<String, Arc<Target>>,
}

impl Project {
    /// Create an empty project
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default_target: None,
            targets: IndexMap::new(),
        }
    }

    /// Set the target run when none is requested
    #[must_use]
    pub fn with_default_target(mut self, target: impl Into<String>) -> Self {
        self.default_target = Some(target.into());
        self
    }

    /// Add a target
    ///
    /// # Errors
    ///
    /// Returns error if a target with the same name already exists
    pub fn add_target(&mut self, target: Target) -> TaskResult<Arc<Target>> {
        let key = target.name().to_lowercase();
        if self.targets.contains_key(&key) {
            return Err(TaskError::Configuration {
                task: "project".to_string(),
                reason: format!("duplicate target '{}'", target.name()),
            });
        }
        let target = Arc::new(target);
        self.targets.insert(key, Arc::clone(&target));
        Ok(target)
    }

    /// Project name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Default target name
    #[must_use]
    pub fn default_target(&self) -> Option<&str> {
        self.default_target.as_deref()
    }

    /// Look up a target
    #[must_use]
    pub fn target(&self, name: &str) -> Option<&Arc<Target>> {
        self.targets.get(&name.to_lowercase())
    }

    /// All targets in declaration order
    pub fn targets(&self) -> impl Iterator<Item = &Arc<Target>> {
        self.targets.values()
    }

    /// Build a project, instantiating every task through `registry`
    ///
    /// # Errors
    ///
    /// Returns error if a task is unknown or fails to initialize, or a target
    /// name is duplicated
    pub fn from_definition(
        definition: &ProjectDefinition,
        registry: &TaskRegistry,
    ) -> TaskResult<Self> {
        let mut project = Self::new(definition.name.clone());
        project.default_target = definition.default.clone();

        for target_def in &definition.targets {
            let mut target = Target::new(target_def.name.clone());
            target.description = target_def.description.clone();
            target.depends = target_def.depends.clone();
            target.location = target_def.location.clone();
            for element in &target_def.tasks {
                target.tasks.push(registry.instantiate(element)?);
            }
            project.add_target(target)?;
        }

        tracing::debug!(
            project = %project.name,
            targets = project.targets.len(),
            "project built"
        );
        Ok(project)
    }
}

/// Serialized form of a target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDefinition {
    /// Target name
    pub name: String,
    /// Description
    #[serde(default)]
    pub description: Option<String>,
    /// Targets that must run first
    #[serde(default)]
    pub depends: Vec<String>,
    /// Task declarations
    #[serde(default)]
    pub tasks: Vec<TaskElement>,
    /// Declaration location
    #[serde(default)]
    pub location: Option<SourceLocation>,
}

/// Serialized form of a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectDefinition {
    /// Project name
    pub name: String,
    /// Default target
    #[serde(default)]
    pub default: Option<String>,
    /// Targets
    #[serde(default)]
    pub targets: Vec<TargetDefinition>,
}

impl ProjectDefinition {
    /// Decode a JSON project definition
    ///
    /// # Errors
    ///
    /// Returns error if the document is malformed
    pub fn from_json_str(json: &str) -> CoreResult<Self> {
        serde_json::from_str(json).map_err(CoreError::from)
    }
}
