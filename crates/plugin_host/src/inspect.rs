//! Static inspection of candidate module files.
//!
//! Reads the embedded manifest out of a compiled module without executing
//! any of its code, so a module can be interrogated for dependency-graph
//! purposes before the cost and risk of actually loading it is paid.

use crate::error::HostError;
use keystone_api::ModuleManifest;
use std::path::Path;
use tracing::debug;

/// Platform-specific extension for compiled module files.
#[cfg(target_os = "windows")]
pub const MODULE_EXTENSION: &str = "dll";

/// Platform-specific extension for compiled module files.
#[cfg(target_os = "macos")]
pub const MODULE_EXTENSION: &str = "dylib";

/// Platform-specific extension for compiled module files.
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
pub const MODULE_EXTENSION: &str = "so";

/// Whether `path` has the platform module extension.
pub fn is_module_file(path: &Path) -> bool {
    path.extension()
        .map(|extension| extension.to_string_lossy().to_lowercase() == MODULE_EXTENSION)
        .unwrap_or(false)
}

/// Reads the declared name and references of the module at `path`.
///
/// Fails with [`HostError::NotAModule`] when the file cannot be read or
/// carries no readable manifest. That is the normal outcome for unrelated
/// binaries swept up by a directory scan; callers log it at debug level.
pub fn inspect_module(path: &Path) -> Result<ModuleManifest, HostError> {
    let bytes = std::fs::read(path).map_err(|e| {
        debug!("Could not read candidate module {}: {}", path.display(), e);
        HostError::NotAModule(path.to_path_buf())
    })?;

    ModuleManifest::from_embedded(&bytes).ok_or_else(|| HostError::NotAModule(path.to_path_buf()))
}
