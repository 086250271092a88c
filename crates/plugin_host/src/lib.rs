//! Plugin host for discovering, loading, wiring, and unloading modules.
//!
//! This crate provides infrastructure for running independently compiled
//! extension modules inside a host application without the host's build
//! knowing about them in advance. It handles the complete lifecycle:
//! static manifest inspection, reference path resolution, dependency
//! resolution, module loading, constructor injection, enable/disable
//! transitions, and cascading unload over the dependency graph.
//!
//! The entry point is [`PluginManager`]:
//!
//! ```rust,no_run
//! use plugin_host::{HostConfig, PluginManager};
//! use keystone_api::{Host, CommandService, NoopCommandService};
//! use std::sync::Arc;
//!
//! struct App;
//!
//! impl Host for App {
//!     fn commands(&self) -> Arc<dyn CommandService> {
//!         Arc::new(NoopCommandService)
//!     }
//! }
//!
//! # fn main() -> Result<(), plugin_host::HostError> {
//! let manager = PluginManager::new(Arc::new(App), HostConfig::default());
//! let report = manager.discover_plugins("plugins")?;
//! println!("enabled {} plugins", report.plugins_enabled);
//! manager.unload_all();
//! # Ok(())
//! # }
//! ```

mod error;
mod inject;
mod inspect;
mod manager;
mod paths;
mod registry;
mod resolver;
mod runtime;


pub use error::HostError;
pub use inspect::{inspect_module, is_module_file, MODULE_EXTENSION};
pub use manager::{DiscoveryReport, LoadedPlugin, PluginManager, PluginState};
pub use paths::{DepsManifest, SearchPaths};
pub use registry::TypedReferenceRegistry;
pub use runtime::{HostConfig, LoadedExports, ModuleRuntime, NativeRuntime};

/// Re-export commonly used types for plugin development
pub use keystone_api::{
    CommandService, Host, ModuleExports, ModuleManifest, ModuleReference, Plugin, PluginError,
    PluginInfo,
};
pub use libloading::Library;
