//! # Keystone Plugin Contract
//!
//! This crate defines everything a compiled module and the host runtime
//! agree on: the [`Plugin`] trait and its lifecycle, the embedded module
//! manifest that can be inspected without executing the module, the export
//! table a module hands to the loader, and the collaborator traits
//! ([`Host`], [`CommandService`]) the runtime passes into plugin code.
//!
//! ## Module Lifecycle
//!
//! 1. **Inspection** - the host reads the embedded [`ModuleManifest`]
//! 2. **Resolution** - declared references are located and loaded
//! 3. **Loading** - the module's export table is taken over by the host
//! 4. **Injection** - plugin constructors are satisfied and invoked
//! 5. **Enable/Disable** - lifecycle calls with the host handle
//!
//! Plugin authors normally interact with this crate through the
//! [`keystone_module!`] macro, which emits the manifest and the entry
//! points the loader looks up.

pub mod exports;
pub mod host;
pub mod macros;
pub mod manifest;
pub mod plugin;

// Re-exports for convenience
pub use exports::{
    BuiltPlugin, ConstructorSpec, ModuleExports, ParamSpec, PluginExport, ReferenceExport,
    ResolvedParam,
};
pub use host::{CommandService, Host, NoopCommandService};
pub use manifest::{ModuleManifest, ModuleReference};
pub use plugin::{Plugin, PluginError, PluginInfo};

/// Version information for ABI compatibility
pub const ABI_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the host capability module. A compiled module that never
/// references this name cannot contain plugins and is ignored by discovery.
pub const HOST_MODULE_NAME: &str = env!("CARGO_PKG_NAME");

/// Symbol exported by [`keystone_module!`] carrying the module's ABI version.
pub const ABI_VERSION_SYMBOL: &[u8] = b"keystone_abi_version";

/// Symbol exported by [`keystone_module!`] producing the module's export table.
pub const MODULE_EXPORTS_SYMBOL: &[u8] = b"keystone_module_exports";
