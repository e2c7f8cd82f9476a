//! Task registry: logical task names to constructible task types.
//!
//! Task types are grouped into [`TaskModule`]s, explicit lists of
//! [`TaskDescriptor`]s. Registering a type records a [`TaskEntry`] and
//! resolves its logical name once; nothing is constructed until
//! [`TaskRegistry::create`] is called.

use crate::plugin::PluginScanner;
use crate::trait_::{DeclaredTask, Task, TaskElement, TaskResult};
use indexmap::IndexMap;
use keel_core::EngineConfig;
use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::Arc;

/// Constructor of uninitialized task instances
pub type TaskConstructor = Arc<dyn Fn() -> Result<Box<dyn Task>, String> + Send + Sync>;

/// Resolver of a type's declared logical name
pub type NameResolver = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// Error registering or looking up a task type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistrationError {
    /// Module is not known
    #[error("Task module not found: {module}")]
    ModuleNotFound {
        /// Module name
        module: String,
    },

    /// Type is not part of the module
    #[error("Task type {type_name} not found in module {module}")]
    TypeNotFound {
        /// Module name
        module: String,
        /// Requested type
        type_name: String,
    },

    /// Type does not declare a logical task name
    #[error("Task type {type_name} does not declare a task name")]
    MissingName {
        /// Offending type
        type_name: String,
    },

    /// Logical name already taken (names compare case-insensitively)
    #[error("Task name '{name}' of {type_name} is already registered by {existing}")]
    DuplicateName {
        /// Resolved name
        name: String,
        /// Type being registered
        type_name: String,
        /// Type that owns the name
        existing: String,
    },

    /// No task registered under this name
    #[error("Unknown task: <{name}>")]
    UnknownTask {
        /// Requested name
        name: String,
    },
}

/// Error constructing a task instance
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InstantiationError {
    /// Type has no constructor
    #[error("Task type {type_name} cannot be constructed")]
    NoConstructor {
        /// Offending type
        type_name: String,
    },

    /// Constructor reported a failure
    #[error("Constructing {type_name} failed: {reason}")]
    ConstructorFailed {
        /// Offending type
        type_name: String,
        /// Constructor message
        reason: String,
    },
}

/// How to build and name one task type
#[derive(Clone)]
pub struct TaskDescriptor {
    type_name: String,
    constructor: Option<TaskConstructor>,
    name_resolver: Option<NameResolver>,
}

impl TaskDescriptor {
    /// Descriptor with a constructor and no declared name yet
    #[must_use]
    pub fn new(
        type_name: impl Into<String>,
        constructor: impl Fn() -> Result<Box<dyn Task>, String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            constructor: Some(Arc::new(constructor)),
            name_resolver: None,
        }
    }

    /// Descriptor for a type that cannot be constructed
    #[must_use]
    pub fn abstract_type(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            constructor: None,
            name_resolver: None,
        }
    }

    /// Descriptor for a [`DeclaredTask`] type
    #[must_use]
    pub fn declared<T: DeclaredTask>() -> Self {
        Self::new(std::any::type_name::<T>(), || {
            T::construct().map(|task| Box::new(task) as Box<dyn Task>)
        })
        .with_name(T::TASK_NAME)
    }

    /// Declare a fixed logical name
    #[must_use]
    pub fn with_name(self, name: &'static str) -> Self {
        self.with_name_resolver(move || Some(name.to_string()))
    }

    /// Declare the logical name through a resolver
    #[must_use]
    pub fn with_name_resolver(
        mut self,
        resolver: impl Fn() -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.name_resolver = Some(Arc::new(resolver));
        self
    }

    /// Fully qualified type name
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }
}

impl fmt::Debug for TaskDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDescriptor")
            .field("type_name", &self.type_name)
            .field("constructible", &self.constructor.is_some())
            .field("named", &self.name_resolver.is_some())
            .finish()
    }
}

/// A named group of task types
#[derive(Debug, Clone)]
pub struct TaskModule {
    name: String,
    descriptors: IndexMap<String, TaskDescriptor>,
}

impl TaskModule {
    /// Create an empty module
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            descriptors: IndexMap::new(),
        }
    }

    /// Add a task type
    #[must_use]
    pub fn with_descriptor(mut self, descriptor: TaskDescriptor) -> Self {
        self.descriptors
            .insert(descriptor.type_name.clone(), descriptor);
        self
    }

    /// Module name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a type by fully qualified name
    #[must_use]
    pub fn descriptor(&self, type_name: &str) -> Option<&TaskDescriptor> {
        self.descriptors.get(type_name)
    }

    /// Qualified names of all types, in declaration order
    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.descriptors.keys().map(String::as_str)
    }
}

/// A registered task type
pub struct TaskEntry {
    module: String,
    descriptor: TaskDescriptor,
    name: OnceCell<String>,
}

impl TaskEntry {
    fn new(module: &str, descriptor: TaskDescriptor) -> Self {
        Self {
            module: module.to_string(),
            descriptor,
            name: OnceCell::new(),
        }
    }

    /// Source module
    #[must_use]
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Fully qualified type name
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.descriptor.type_name
    }

    /// Declared logical name, resolved on first call and cached
    ///
    /// # Errors
    ///
    /// Returns error if the type declares no (or an empty) name
    pub fn resolve_name(&self) -> Result<&str, RegistrationError> {
        self.name
            .get_or_try_init(|| {
                self.descriptor
                    .name_resolver
                    .as_ref()
                    .and_then(|resolve| resolve())
                    .map(|name| name.trim().to_string())
                    .filter(|name| !name.is_empty())
                    .ok_or_else(|| RegistrationError::MissingName {
                        type_name: self.type_name().to_string(),
                    })
            })
            .map(String::as_str)
    }
}

impl fmt::Debug for TaskEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskEntry")
            .field("module", &self.module)
            .field("type_name", &self.type_name())
            .field("name", &self.name.get())
            .finish()
    }
}

/// Registry of task types, keyed by lower-cased logical name
///
/// Populated once at start-up, then shared read-only.
pub struct TaskRegistry {
    entries: IndexMap<String, Arc<TaskEntry>>,
    config: Arc<EngineConfig>,
    scanner: Option<Arc<dyn PluginScanner>>,
}

impl TaskRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self {
            entries: IndexMap::new(),
            config,
            scanner: None,
        }
    }

    /// Attach plugins to plugin-consuming tasks through `scanner`
    #[must_use]
    pub fn with_plugin_scanner(mut self, scanner: Arc<dyn PluginScanner>) -> Self {
        self.scanner = Some(scanner);
        self
    }

    /// Engine configuration handed to task initialization
    #[must_use]
    pub fn config(&self) -> &Arc<EngineConfig> {
        &self.config
    }

    /// Register a task type of `module`
    ///
    /// Resolves the logical name but constructs nothing.
    ///
    /// # Errors
    ///
    /// Returns error if the type is not in the module, declares no name, or
    /// its name is already registered
    pub fn register(
        &mut self,
        module: &TaskModule,
        type_name: &str,
    ) -> Result<Arc<TaskEntry>, RegistrationError> {
        let descriptor = module
            .descriptor(type_name)
            .ok_or_else(|| RegistrationError::TypeNotFound {
                module: module.name().to_string(),
                type_name: type_name.to_string(),
            })?;

        let entry = Arc::new(TaskEntry::new(module.name(), descriptor.clone()));
        let name = entry.resolve_name()?;
        let key = name.to_lowercase();

        if let Some(existing) = self.entries.get(&key) {
            return Err(RegistrationError::DuplicateName {
                name: name.to_string(),
                type_name: type_name.to_string(),
                existing: existing.type_name().to_string(),
            });
        }

        tracing::debug!(task = name, module = module.name(), type_name, "registered task type");
        self.entries.insert(key, Arc::clone(&entry));
        Ok(entry)
    }

    /// Register every type of `module`
    ///
    /// # Errors
    ///
    /// Returns the first registration error
    pub fn register_module(&mut self, module: &TaskModule) -> Result<(), RegistrationError> {
        for type_name in module.type_names() {
            self.register(module, type_name)?;
        }
        Ok(())
    }

    /// Populate from the configured type list, or from every module when the
    /// configuration lists none
    ///
    /// # Errors
    ///
    /// Returns error if a configured module or type is unknown, or on any
    /// registration error
    pub fn register_modules(&mut self, modules: &[TaskModule]) -> Result<(), RegistrationError> {
        let config = Arc::clone(&self.config);
        if config.task_types.is_empty() {
            return modules
                .iter()
                .try_for_each(|module| self.register_module(module));
        }

        for task_type in &config.task_types {
            let module = modules
                .iter()
                .find(|m| m.name() == task_type.module)
                .ok_or_else(|| RegistrationError::ModuleNotFound {
                    module: task_type.module.clone(),
                })?;
            self.register(module, &task_type.type_name)?;
        }
        Ok(())
    }

    /// Logical name of a registered type
    ///
    /// # Errors
    ///
    /// Returns error if the type declares no name
    pub fn resolve_name<'a>(&self, entry: &'a TaskEntry) -> Result<&'a str, RegistrationError> {
        entry.resolve_name()
    }

    /// Look up an entry by logical name, ignoring case
    #[must_use]
    pub fn entry(&self, name: &str) -> Option<Arc<TaskEntry>> {
        self.entries.get(&name.to_lowercase()).cloned()
    }

    /// Construct a fresh task instance
    ///
    /// Plugin-consuming instances get their plugins attached before return.
    ///
    /// # Errors
    ///
    /// Returns error if the type has no constructor or construction fails
    pub fn create(&self, entry: &TaskEntry) -> Result<Box<dyn Task>, InstantiationError> {
        let constructor = entry
            .descriptor
            .constructor
            .as_ref()
            .ok_or_else(|| InstantiationError::NoConstructor {
                type_name: entry.type_name().to_string(),
            })?;

        let mut task = constructor().map_err(|reason| InstantiationError::ConstructorFailed {
            type_name: entry.type_name().to_string(),
            reason,
        })?;

        if let Some(scanner) = &self.scanner {
            let task_name = entry.name.get().map_or(entry.type_name(), String::as_str);
            if let Some(consumer) = task.as_plugin_consumer() {
                scanner.attach_plugins(task_name, consumer);
            }
        }

        Ok(task)
    }

    /// Construct and initialize the task declared by `element`
    ///
    /// # Errors
    ///
    /// Returns error if the task name is unknown, construction fails, or the
    /// declaration is rejected by the task
    pub fn instantiate(&self, element: &TaskElement) -> TaskResult<Arc<dyn Task>> {
        let entry = self
            .entry(&element.task)
            .ok_or_else(|| RegistrationError::UnknownTask {
                name: element.task.clone(),
            })?;
        let mut task = self.create(&entry)?;
        task.initialize(element, self)?;
        Ok(Arc::from(task))
    }

    /// Whether a task name is registered
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_lowercase())
    }

    /// Registered logical names, in registration order
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.entries
            .values()
            .filter_map(|entry| entry.name.get().cloned())
            .collect()
    }

    /// All entries, in registration order
    pub fn entries(&self) -> impl Iterator<Item = &Arc<TaskEntry>> {
        self.entries.values()
    }

    /// Number of registered types
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("entries", &self.entries)
            .field("plugins", &self.scanner.is_some())
            .finish()
    }
}
