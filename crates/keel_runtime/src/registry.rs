//! Default registry assembly.

use crate::tasks::builtin_module;
use keel_core::EngineConfig;
use keel_sync::sync_module;
use keel_task::{PluginScanner, RegistrationError, TaskModule, TaskRegistry};
use std::sync::Arc;

/// Every module shipped with the engine
#[must_use]
pub fn default_modules() -> Vec<TaskModule> {
    vec![builtin_module(), sync_module()]
}

/// Registry populated from `config` with the shipped modules
///
/// `config.task_types` selects individual types; when empty, every shipped
/// task is registered.
///
/// # Errors
///
/// Returns error if a configured type is unknown or two types claim the same
/// name
pub fn default_registry(
    config: Arc<EngineConfig>,
    scanner: Option<Arc<dyn PluginScanner>>,
) -> Result<TaskRegistry, RegistrationError> {
    let mut registry = TaskRegistry::new(config);
    if let Some(scanner) = scanner {
        registry = registry.with_plugin_scanner(scanner);
    }
    registry.register_modules(&default_modules())?;
    tracing::debug!(tasks = ?registry.names(), "task registry ready");
    Ok(registry)
}
