//! Reference path resolution.
//!
//! Given a declared module reference, finds a concrete file on disk using a
//! prioritized search: a sidecar dependency manifest first, then a fixed
//! set of well-known directories. Every directory probe is validated by
//! re-inspecting the candidate: a file whose name matches but whose
//! internal declared name differs is rejected.

use crate::error::HostError;
use crate::inspect::{self, MODULE_EXTENSION};
use keystone_api::ModuleReference;
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Directory containing the host's own executing binary.
static HOST_DIR: Lazy<Option<PathBuf>> = Lazy::new(|| {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
});

/// Sidecar manifest a module may ship describing its own runtime dependency
/// graph: `<module stem>.deps.json` next to the module file, mapping
/// reference names to paths relative to the module's directory.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DepsManifest {
    #[serde(default)]
    pub dependencies: HashMap<String, PathBuf>,
}

impl DepsManifest {
    /// Loads the sidecar for the module at `module_path`, if it ships one.
    pub fn for_module(module_path: &Path) -> Option<DepsManifest> {
        let sidecar = module_path.with_extension("deps.json");
        let bytes = std::fs::read(&sidecar).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                warn!(
                    "Ignoring malformed dependency manifest {}: {}",
                    sidecar.display(),
                    e
                );
                None
            }
        }
    }

    fn lookup(&self, name: &str) -> Option<&PathBuf> {
        self.dependencies
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, path)| path)
    }
}

/// Search context for resolving one candidate module's references.
#[derive(Debug, Clone, Default)]
pub struct SearchPaths {
    /// Root directory the candidate module was found in.
    pub root: PathBuf,
    /// Directory of the module declaring the reference.
    pub requesting_dir: Option<PathBuf>,
    /// Root of the most recent discovery pass.
    pub last_discovery_dir: Option<PathBuf>,
    /// Sidecar dependency manifest of the requesting module, if any.
    pub deps: Option<DepsManifest>,
}

impl SearchPaths {
    /// Search context for the candidate module file at `file`.
    pub fn for_candidate(file: &Path, last_discovery_dir: Option<PathBuf>) -> SearchPaths {
        let dir = file.parent().map(Path::to_path_buf).unwrap_or_default();
        SearchPaths {
            root: dir.clone(),
            requesting_dir: Some(dir),
            last_discovery_dir,
            deps: DepsManifest::for_module(file),
        }
    }
}

/// Produces a file path for `reference`, or fails with
/// [`HostError::ReferenceNotFound`] once the search order is exhausted.
pub fn resolve_reference(
    reference: &ModuleReference,
    search: &SearchPaths,
) -> Result<PathBuf, HostError> {
    // 1. Dependency-manifest-driven resolution relative to the root.
    if let Some(deps) = &search.deps {
        if let Some(relative) = deps.lookup(&reference.name) {
            let candidate = search.root.join(relative);
            if candidate.is_file() {
                return Ok(candidate);
            }
            debug!(
                "Dependency manifest names {} for \"{}\" but the file is missing",
                candidate.display(),
                reference.name
            );
        }
    }

    // 2..5. Probe the well-known directories; first validated match wins.
    let file_name = format!("{}.{}", reference.name, MODULE_EXTENSION);
    let directories = [
        Some(search.root.as_path()),
        search.last_discovery_dir.as_deref(),
        HOST_DIR.as_deref(),
        search.requesting_dir.as_deref(),
    ];

    for directory in directories.into_iter().flatten() {
        let candidate = directory.join(&file_name);
        if declared_name_matches(&candidate, &reference.name) {
            return Ok(candidate);
        }
    }

    Err(HostError::ReferenceNotFound(reference.to_string()))
}

fn declared_name_matches(candidate: &Path, expected: &str) -> bool {
    if !candidate.is_file() {
        return false;
    }
    match inspect::inspect_module(candidate) {
        Ok(manifest) => manifest.name.eq_ignore_ascii_case(expected),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_api::ModuleManifest;
    use std::fs;
    use tempfile::TempDir;

    fn write_module(dir: &Path, file_stem: &str, declared_name: &str) -> PathBuf {
        let manifest = ModuleManifest {
            name: declared_name.to_string(),
            version: "1.0.0".to_string(),
            references: Vec::new(),
        };
        let path = dir.join(format!("{}.{}", file_stem, MODULE_EXTENSION));
        fs::write(&path, manifest.embedded_bytes()).unwrap();
        path
    }

    #[test]
    fn resolves_from_the_root_directory() {
        let root = TempDir::new().unwrap();
        let expected = write_module(root.path(), "perm_core", "perm_core");

        let search = SearchPaths {
            root: root.path().to_path_buf(),
            ..Default::default()
        };
        let found = resolve_reference(&ModuleReference::named("perm_core"), &search).unwrap();
        assert_eq!(found, expected);
    }

    #[test]
    fn name_matching_is_case_insensitive() {
        let root = TempDir::new().unwrap();
        write_module(root.path(), "Perm_Core", "PERM_CORE");

        let search = SearchPaths {
            root: root.path().to_path_buf(),
            ..Default::default()
        };
        // The file name probe uses the declared casing of the reference.
        assert!(resolve_reference(&ModuleReference::named("Perm_Core"), &search).is_ok());
    }

    #[test]
    fn rejects_candidates_whose_declared_name_differs() {
        let root = TempDir::new().unwrap();
        let fallback = TempDir::new().unwrap();
        // Right file name, wrong internal declared name.
        write_module(root.path(), "perm_core", "something_else");
        let expected = write_module(fallback.path(), "perm_core", "perm_core");

        let search = SearchPaths {
            root: root.path().to_path_buf(),
            last_discovery_dir: Some(fallback.path().to_path_buf()),
            ..Default::default()
        };
        let found = resolve_reference(&ModuleReference::named("perm_core"), &search).unwrap();
        assert_eq!(found, expected);
    }

    #[test]
    fn dependency_manifest_wins_over_directory_probes() {
        let root = TempDir::new().unwrap();
        let libs = root.path().join("libs");
        fs::create_dir(&libs).unwrap();

        // Both a manifest-declared copy and a root-level copy exist.
        let declared = write_module(&libs, "perm_core", "perm_core");
        write_module(root.path(), "perm_core", "perm_core");

        let mut dependencies = HashMap::new();
        dependencies.insert(
            "perm_core".to_string(),
            PathBuf::from(format!("libs/perm_core.{}", MODULE_EXTENSION)),
        );
        let search = SearchPaths {
            root: root.path().to_path_buf(),
            deps: Some(DepsManifest { dependencies }),
            ..Default::default()
        };

        let found = resolve_reference(&ModuleReference::named("perm_core"), &search).unwrap();
        assert_eq!(found, declared);
    }

    #[test]
    fn sidecar_manifest_is_loaded_from_disk() {
        let root = TempDir::new().unwrap();
        let module = write_module(root.path(), "chat_filter", "chat_filter");
        fs::write(
            root.path().join("chat_filter.deps.json"),
            format!(r#"{{"dependencies":{{"perm_core":"libs/perm_core.{}"}}}}"#, MODULE_EXTENSION),
        )
        .unwrap();

        let search = SearchPaths::for_candidate(&module, None);
        let deps = search.deps.expect("sidecar should load");
        assert!(deps.lookup("PERM_CORE").is_some());
    }

    #[test]
    fn exhausting_the_search_order_is_a_resolution_failure() {
        let root = TempDir::new().unwrap();
        let search = SearchPaths {
            root: root.path().to_path_buf(),
            ..Default::default()
        };

        let result = resolve_reference(&ModuleReference::named("missing"), &search);
        assert!(matches!(result, Err(HostError::ReferenceNotFound(_))));
    }
}
