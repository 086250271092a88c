//! Module loading runtimes.

use crate::error::HostError;
use keystone_api::{ModuleExports, ModuleManifest, ABI_VERSION};
use libloading::{Library, Symbol};
use std::path::Path;
use tracing::warn;

/// Configuration for module loading safety checks.
///
/// These flags allow hosts to override safety validations when they
/// understand the risks.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct HostConfig {
    /// Ignore contract version differences between module and host.
    /// WARNING: This may cause crashes due to ABI incompatibilities.
    pub allow_abi_mismatch: bool,

    /// Require exact version matching including patch digits.
    /// When false, only major.minor must match (ignoring patch).
    pub strict_versioning: bool,

    /// Reference names the host application satisfies itself. Pre-seeded
    /// into the module name cache alongside the host capability name, so
    /// modules referencing them resolve without a file search.
    #[serde(default)]
    pub provided_references: Vec<String>,
}

/// Executes a module whose dependency set has fully resolved and hands its
/// export table to the host.
///
/// The production implementation is [`NativeRuntime`]; tests substitute an
/// in-memory runtime so discovery and unload can be exercised without
/// compiling real libraries.
pub trait ModuleRuntime: Send + Sync {
    fn load(&self, path: &Path, manifest: &ModuleManifest) -> Result<LoadedExports, HostError>;
}

/// A module's export table plus whatever must stay alive behind it.
pub struct LoadedExports {
    pub exports: ModuleExports,
    /// Keeps the backing library mapped for as long as the exports live.
    _library: Option<Library>,
}

impl LoadedExports {
    /// Exports with no backing library (in-memory runtimes).
    pub fn new(exports: ModuleExports) -> Self {
        Self {
            exports,
            _library: None,
        }
    }

    /// Exports backed by a loaded library.
    pub fn with_library(exports: ModuleExports, library: Library) -> Self {
        Self {
            exports,
            _library: Some(library),
        }
    }
}

/// Loads modules as native dynamic libraries.
pub struct NativeRuntime {
    config: HostConfig,
}

impl NativeRuntime {
    pub fn new(config: HostConfig) -> Self {
        Self { config }
    }
}

impl ModuleRuntime for NativeRuntime {
    fn load(&self, path: &Path, manifest: &ModuleManifest) -> Result<LoadedExports, HostError> {
        // Load the dynamic library
        let library = unsafe {
            Library::new(path).map_err(|e| {
                HostError::LoadFailure(format!("Failed to load library {}: {}", path.display(), e))
            })?
        };

        // Look for the ABI version function
        let abi_version: Symbol<unsafe extern "C" fn() -> *const std::os::raw::c_char> = unsafe {
            library.get(keystone_api::ABI_VERSION_SYMBOL).map_err(|e| {
                HostError::LoadFailure(format!(
                    "Module \"{}\" does not export 'keystone_abi_version': {}",
                    manifest.name, e
                ))
            })?
        };

        let version_pointer = unsafe { abi_version() };
        if version_pointer.is_null() {
            return Err(HostError::LoadFailure(format!(
                "Module \"{}\" returned a null ABI version string",
                manifest.name
            )));
        }
        let module_version = unsafe { std::ffi::CStr::from_ptr(version_pointer) }
            .to_string_lossy()
            .to_string();

        // Validate compatibility before any module code beyond the version
        // export runs.
        validate_abi(&self.config, &module_version, ABI_VERSION)?;

        // Look for the module entry function
        let module_exports: Symbol<unsafe extern "C" fn() -> *mut ModuleExports> = unsafe {
            library.get(keystone_api::MODULE_EXPORTS_SYMBOL).map_err(|e| {
                HostError::LoadFailure(format!(
                    "Module \"{}\" does not export 'keystone_module_exports': {}",
                    manifest.name, e
                ))
            })?
        };

        let exports_pointer = unsafe { module_exports() };
        if exports_pointer.is_null() {
            return Err(HostError::LoadFailure(format!(
                "Module \"{}\" returned no export table",
                manifest.name
            )));
        }

        let exports = *unsafe { Box::from_raw(exports_pointer) };
        Ok(LoadedExports::with_library(exports, library))
    }
}

/// Validates a module's contract version against the host's.
///
/// Relaxed matching (major.minor, ignoring patch) by default; exact
/// matching under `strict_versioning`; bypassed with a warning under
/// `allow_abi_mismatch`.
pub(crate) fn validate_abi(
    config: &HostConfig,
    module_version: &str,
    expected_version: &str,
) -> Result<(), HostError> {
    let compatible = if config.strict_versioning {
        module_version == expected_version
    } else {
        versions_major_minor_compatible(module_version, expected_version)
    };

    if compatible {
        return Ok(());
    }

    if config.allow_abi_mismatch {
        warn!(
            "Loading module with ABI version mismatch (override enabled): module v{} != host v{}",
            module_version, expected_version
        );
        return Ok(());
    }

    Err(HostError::AbiMismatch(format!(
        "module compiled against keystone_api v{}, but the host uses v{}. \
        Recompile the module against the correct version, or use allow_abi_mismatch \
        to override (NOT RECOMMENDED).",
        module_version, expected_version
    )))
}

/// Checks if two version strings are compatible using major.minor comparison.
/// Ignores patch versions (e.g., "0.11.2" is compatible with "0.11.0").
fn versions_major_minor_compatible(module_version: &str, expected_version: &str) -> bool {
    let parse_major_minor = |version: &str| -> Option<(u32, u32)> {
        let parts: Vec<&str> = version.split('.').collect();
        if parts.len() >= 2 {
            if let (Ok(major), Ok(minor)) = (parts[0].parse::<u32>(), parts[1].parse::<u32>()) {
                return Some((major, minor));
            }
        }
        None
    };

    match (
        parse_major_minor(module_version),
        parse_major_minor(expected_version),
    ) {
        (Some((module_major, module_minor)), Some((expected_major, expected_minor))) => {
            module_major == expected_major && module_minor == expected_minor
        }
        _ => {
            // If we can't parse the versions, fall back to exact comparison
            module_version == expected_version
        }
    }
}
