//! Plugin trait definition and descriptive metadata.

use crate::host::Host;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The capability every plugin object conforms to.
///
/// Instances are created by the host's injector from the constructors a
/// module exports, and are owned by their module's table entry: a plugin
/// instance never outlives its module's unload.
///
/// # Lifecycle
///
/// `Constructed -> Enabled -> Disabled(terminal)`. [`Plugin::enabled`] is
/// invoked exactly once per instance immediately after successful
/// construction; an error is caught and logged by the host and does not
/// roll back construction. [`Plugin::disabled`] is invoked exactly once
/// during unload. There is no re-entry and no resume from disabled.
pub trait Plugin: Send + Sync + 'static {
    /// Descriptive information about this plugin.
    fn info(&self) -> PluginInfo;

    /// Called once after construction, while the plugin's module is live.
    fn enabled(&self, host: &Arc<dyn Host>) -> Result<(), PluginError>;

    /// Called once during unload, before the module's table entry is removed.
    fn disabled(&self, host: &Arc<dyn Host>) -> Result<(), PluginError>;
}

/// Descriptive plugin metadata surfaced through the host's plugin listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Plugin name
    pub name: String,
    /// Plugin version
    pub version: String,
    /// Plugin description
    pub description: Option<String>,
    /// Plugin author
    pub author: Option<String>,
}

impl PluginInfo {
    /// Create new plugin info
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: None,
            author: None,
        }
    }

    /// Set description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set author
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }
}

/// Errors that can occur during plugin construction and lifecycle calls.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// A constructor was invoked and failed
    #[error("Plugin construction failed: {0}")]
    ConstructionFailed(String),
    /// An injected argument did not have the expected type
    #[error("Plugin dependency error: {0}")]
    DependencyError(String),
    /// Error occurred during an enable/disable call
    #[error("Plugin execution error: {0}")]
    ExecutionError(String),
    /// Runtime error such as panic or system failure
    #[error("Plugin runtime error: {0}")]
    Runtime(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plugin_info_builders() {
        let info = PluginInfo::new("chat_filter", "1.2.0")
            .with_description("Filters chat messages")
            .with_author("keystone");

        assert_eq!(info.name, "chat_filter");
        assert_eq!(info.version, "1.2.0");
        assert_eq!(info.description.as_deref(), Some("Filters chat messages"));
        assert_eq!(info.author.as_deref(), Some("keystone"));
    }

    #[test]
    fn plugin_error_display() {
        let error = PluginError::ConstructionFailed("missing argument".to_string());
        let message = format!("{}", error);
        assert!(message.contains("Plugin construction failed"));
        assert!(message.contains("missing argument"));
    }
}
