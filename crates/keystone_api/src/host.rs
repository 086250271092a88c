//! Collaborator traits the runtime hands into plugin code.

use crate::plugin::Plugin;
use std::sync::Arc;

/// The application a plugin is injected into.
///
/// The host is passed to every lifecycle call and can be requested as a
/// constructor parameter with [`crate::ParamSpec::Host`]. The runtime only
/// consumes the command service itself (during teardown); everything else a
/// concrete host exposes is between the host application and its plugins.
pub trait Host: Send + Sync {
    /// Command registration service, consumed when plugins are torn down.
    fn commands(&self) -> Arc<dyn CommandService>;
}

/// Command registration collaborator.
///
/// Command registration itself lives in the host application; the runtime
/// only calls [`CommandService::unload_commands`] while disabling a plugin
/// so nothing it registered survives its module.
pub trait CommandService: Send + Sync {
    /// Deregisters every command the given plugin registered.
    fn unload_commands(&self, plugin: &dyn Plugin);
}

/// Command service for hosts without a command subsystem.
pub struct NoopCommandService;

impl CommandService for NoopCommandService {
    fn unload_commands(&self, _plugin: &dyn Plugin) {}
}
