//! Error types for the plugin host.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    /// Discovery was pointed at a path that does not exist
    #[error("Plugin directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    /// The file carries no readable module manifest
    #[error("Not a module: {0}")]
    NotAModule(PathBuf),

    /// A declared reference could not be located on disk
    #[error("Reference \"{0}\" could not be located")]
    ReferenceNotFound(String),

    /// A candidate module's dependency set could not be completed
    #[error("Module \"{module}\" requires \"{reference}\" but it could not be found")]
    UnresolvedDependency { module: String, reference: String },

    /// The module was found and resolved but failed to load
    #[error("Module loading error: {0}")]
    LoadFailure(String),

    /// The module was compiled against an incompatible contract version
    #[error("Module ABI mismatch: {0}")]
    AbiMismatch(String),

    /// A plugin type's constructor failed or could not be satisfied
    #[error("Plugin construction failed for {type_name}: {reason}")]
    ConstructionFailure { type_name: String, reason: String },

    /// The typed reference registry already holds this type
    #[error("Type reference already set: {0}")]
    DuplicateReference(String),

    /// Unloading was requested for a module with no tracked state
    #[error("No loaded module named \"{0}\"")]
    UnloadTargetNotFound(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolved_dependency_names_both_modules() {
        let error = HostError::UnresolvedDependency {
            module: "chat_filter".to_string(),
            reference: "perm_core".to_string(),
        };
        let message = format!("{}", error);
        assert!(message.contains("chat_filter"));
        assert!(message.contains("perm_core"));
    }
}
