//! Dependency resolution for candidate modules.
//!
//! For each declared reference, an already loaded or known module is reused
//! with no file search; everything else must resolve to a path before any
//! loading happens. A single unresolvable reference fails the whole
//! candidate, which the discovery pass reports and skips without aborting
//! the run.

use crate::error::HostError;
use crate::paths::{self, SearchPaths};
use keystone_api::{ModuleManifest, ModuleReference};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::warn;

/// A reference that must be loaded before its dependent, plus where from.
pub(crate) struct PendingReference {
    pub reference: ModuleReference,
    pub path: PathBuf,
}

/// Outcome of resolving one candidate's declared references.
pub(crate) struct ResolvedReferences {
    /// Lowercased names of references satisfied by already known modules.
    pub satisfied: Vec<String>,
    /// References that resolved to files and still need loading.
    pub pending: Vec<PendingReference>,
}

impl ResolvedReferences {
    /// Lowercased names of every resolved reference, known and pending.
    pub fn names(&self) -> Vec<String> {
        let mut names = self.satisfied.clone();
        names.extend(self.pending.iter().map(|p| p.reference.name.to_lowercase()));
        names
    }
}

/// Resolves every declared reference of `manifest`, or fails with
/// [`HostError::UnresolvedDependency`] naming the first reference that
/// could not be located.
pub(crate) fn resolve_references(
    manifest: &ModuleManifest,
    search: &SearchPaths,
    is_known: &dyn Fn(&str) -> bool,
) -> Result<ResolvedReferences, HostError> {
    let mut resolved = ResolvedReferences {
        satisfied: Vec::new(),
        pending: Vec::new(),
    };
    let mut seen: HashSet<String> = HashSet::new();

    for reference in manifest.references() {
        let key = reference.name.to_lowercase();
        if !seen.insert(key.clone()) {
            // Same name declared twice; first declaration wins.
            if reference.version.is_some() {
                warn!(
                    "Module \"{}\" declares \"{}\" more than once; using the first declaration",
                    manifest.name, reference
                );
            }
            continue;
        }

        if is_known(&key) {
            resolved.satisfied.push(key);
            continue;
        }

        match paths::resolve_reference(&reference, search) {
            Ok(path) => resolved.pending.push(PendingReference { reference, path }),
            Err(_) => {
                warn!(
                    "Module \"{}\" requires \"{}\" but it could not be found.",
                    manifest.name, reference
                );
                return Err(HostError::UnresolvedDependency {
                    module: manifest.name.clone(),
                    reference: reference.to_string(),
                });
            }
        }
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspect::MODULE_EXTENSION;
    use std::fs;
    use tempfile::TempDir;

    fn manifest(name: &str, references: &[&str]) -> ModuleManifest {
        ModuleManifest {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            references: references.iter().map(|r| r.to_string()).collect(),
        }
    }

    fn write_module(dir: &std::path::Path, name: &str) {
        let path = dir.join(format!("{}.{}", name, MODULE_EXTENSION));
        fs::write(&path, manifest(name, &[]).embedded_bytes()).unwrap();
    }

    #[test]
    fn known_references_are_reused_without_a_file_search() {
        // No module file exists anywhere; the reference still resolves
        // because the name is already known to the process.
        let root = TempDir::new().unwrap();
        let search = SearchPaths {
            root: root.path().to_path_buf(),
            ..Default::default()
        };

        let candidate = manifest("chat_filter", &["keystone_api"]);
        let resolved =
            resolve_references(&candidate, &search, &|name| name == "keystone_api").unwrap();

        assert_eq!(resolved.satisfied, vec!["keystone_api".to_string()]);
        assert!(resolved.pending.is_empty());
    }

    #[test]
    fn unknown_references_resolve_to_paths_before_any_loading() {
        let root = TempDir::new().unwrap();
        write_module(root.path(), "perm_core");
        let search = SearchPaths {
            root: root.path().to_path_buf(),
            ..Default::default()
        };

        let candidate = manifest("chat_filter", &["keystone_api", "perm_core"]);
        let resolved =
            resolve_references(&candidate, &search, &|name| name == "keystone_api").unwrap();

        assert_eq!(resolved.pending.len(), 1);
        assert_eq!(resolved.pending[0].reference.name, "perm_core");
        let names = resolved.names();
        assert!(names.contains(&"keystone_api".to_string()));
        assert!(names.contains(&"perm_core".to_string()));
    }

    #[test]
    fn one_missing_reference_fails_the_whole_candidate() {
        let root = TempDir::new().unwrap();
        write_module(root.path(), "perm_core");
        let search = SearchPaths {
            root: root.path().to_path_buf(),
            ..Default::default()
        };

        let candidate = manifest("chat_filter", &["perm_core", "missing"]);
        let result = resolve_references(&candidate, &search, &|_| false);

        assert!(matches!(
            result,
            Err(HostError::UnresolvedDependency { module, reference })
                if module == "chat_filter" && reference == "missing"
        ));
    }

    #[test]
    fn duplicate_declarations_use_the_first_version() {
        let root = TempDir::new().unwrap();
        write_module(root.path(), "perm_core");
        let search = SearchPaths {
            root: root.path().to_path_buf(),
            ..Default::default()
        };

        let candidate = manifest("chat_filter", &["perm_core@1.0", "perm_core@2.0"]);
        let resolved = resolve_references(&candidate, &search, &|_| false).unwrap();

        assert_eq!(resolved.pending.len(), 1);
        assert_eq!(resolved.pending[0].reference.version.as_deref(), Some("1.0"));
    }
}
