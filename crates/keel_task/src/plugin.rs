//! Optional plugin capability of tasks.
//!
//! A task that wants plugins exposes a [`PluginConsumer`] through
//! [`Task::as_plugin_consumer`](crate::Task::as_plugin_consumer). Right after
//! constructing it, the registry hands the consumer to its
//! [`PluginScanner`], which attaches whatever plugins match.

use std::any::Any;
use std::sync::Arc;

/// An extension attached to tasks of one logical name
pub trait Plugin: Send + Sync + 'static {
    /// Plugin name
    fn name(&self) -> &str;

    /// Logical name of the task this plugin extends
    fn extends(&self) -> &str;

    /// Access to the concrete type
    fn as_any(&self) -> &dyn Any;
}

/// Task capability: accepts plugins
pub trait PluginConsumer {
    /// Whether this consumer understands `plugin`
    fn accepts(&self, _plugin: &dyn Plugin) -> bool {
        true
    }

    /// Attach an accepted plugin
    fn attach_plugin(&mut self, plugin: Arc<dyn Plugin>);
}

/// Collaborator that attaches plugins to freshly constructed tasks
pub trait PluginScanner: Send + Sync {
    /// Attach every plugin compatible with the task named `task_name`
    fn attach_plugins(&self, task_name: &str, consumer: &mut dyn PluginConsumer);
}

/// Fixed list of plugins, matched by extended task name
#[derive(Default)]
pub struct PluginCatalog {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginCatalog {
    /// Create an empty catalog
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plugin
    #[must_use]
    pub fn with_plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Number of plugins
    #[must_use]
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Whether the catalog is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

impl PluginScanner for PluginCatalog {
    fn attach_plugins(&self, task_name: &str, consumer: &mut dyn PluginConsumer) {
        let key = task_name.to_lowercase();
        for plugin in &self.plugins {
            if plugin.extends().to_lowercase() == key && consumer.accepts(plugin.as_ref()) {
                tracing::debug!(plugin = plugin.name(), task = task_name, "attaching plugin");
                consumer.attach_plugin(Arc::clone(plugin));
            }
        }
    }
}
