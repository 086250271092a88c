//! The embedded module manifest.
//!
//! Every compiled module carries a small JSON manifest inside its binary,
//! preceded by a marker byte sequence. The host locates the marker by
//! scanning the file's bytes and parses the JSON that follows, which lets it
//! interrogate a module's name and declared references without executing any
//! of its code.

use serde::{Deserialize, Serialize};
use std::fmt;

// The marker is kept in two halves; only the `keystone_module!` expansion
// emits the joined sequence, so a scan of a module binary finds exactly the
// manifest the macro embedded.
const MARKER_HEAD: &str = "KSMOD\u{1}";
const MARKER_TAIL: &str = "manifest:";

fn marker() -> Vec<u8> {
    let mut marker = Vec::with_capacity(MARKER_HEAD.len() + MARKER_TAIL.len());
    marker.extend_from_slice(MARKER_HEAD.as_bytes());
    marker.extend_from_slice(MARKER_TAIL.as_bytes());
    marker
}

/// A module's static manifest: declared name and external references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleManifest {
    /// Declared module name. Identity is this name, case-insensitive.
    pub name: String,
    /// Module version string.
    #[serde(default)]
    pub version: String,
    /// Declared external references, as `"name"` or `"name@version"` entries.
    #[serde(default)]
    pub references: Vec<String>,
}

impl ModuleManifest {
    /// Parses the first readable manifest embedded in `bytes`.
    ///
    /// Binary content before the marker and after the JSON value is expected
    /// and ignored. Returns `None` when no marker is followed by a parseable
    /// manifest with a non-empty name.
    pub fn from_embedded(bytes: &[u8]) -> Option<ModuleManifest> {
        let marker = marker();
        let mut from = 0;
        while let Some(at) = find(bytes, &marker, from) {
            let payload = &bytes[at + marker.len()..];
            let mut deserializer = serde_json::Deserializer::from_slice(payload);
            if let Ok(manifest) = ModuleManifest::deserialize(&mut deserializer) {
                if !manifest.name.is_empty() {
                    return Some(manifest);
                }
            }
            from = at + marker.len();
        }
        None
    }

    /// The marker-prefixed byte form of this manifest, as a module binary
    /// carries it. Used by tooling and tests to fabricate module files.
    pub fn embedded_bytes(&self) -> Vec<u8> {
        let mut bytes = marker();
        let payload =
            serde_json::to_vec(self).expect("module manifest serialization cannot fail");
        bytes.extend_from_slice(&payload);
        bytes
    }

    /// Declared references with any `@version` suffixes parsed out.
    pub fn references(&self) -> Vec<ModuleReference> {
        self.references.iter().map(|r| ModuleReference::parse(r)).collect()
    }

    /// Whether this manifest declares a reference to `name` (case-insensitive).
    pub fn references_module(&self, name: &str) -> bool {
        self.references().iter().any(|r| r.matches_name(name))
    }
}

/// One declared external module reference: a name and an optional version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleReference {
    pub name: String,
    pub version: Option<String>,
}

impl ModuleReference {
    /// Parses a declared reference entry of the form `name` or `name@version`.
    pub fn parse(entry: &str) -> Self {
        match entry.split_once('@') {
            Some((name, version)) if !version.is_empty() => Self {
                name: name.trim().to_string(),
                version: Some(version.trim().to_string()),
            },
            _ => Self {
                name: entry.trim().to_string(),
                version: None,
            },
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
        }
    }

    /// Case-insensitive name comparison.
    pub fn matches_name(&self, other: &str) -> bool {
        self.name.eq_ignore_ascii_case(other)
    }
}

impl fmt::Display for ModuleReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}@{}", self.name, version),
            None => write!(f, "{}", self.name),
        }
    }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || haystack.len() < from + needle.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|at| at + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(name: &str, references: &[&str]) -> ModuleManifest {
        ModuleManifest {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            references: references.iter().map(|r| r.to_string()).collect(),
        }
    }

    #[test]
    fn embedded_manifest_survives_surrounding_binary() {
        let mut bytes = vec![0x7f, b'E', b'L', b'F', 0, 1, 2, 3];
        bytes.extend_from_slice(&manifest("chat_filter", &["keystone_api", "perm@0.2"]).embedded_bytes());
        bytes.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);

        let parsed = ModuleManifest::from_embedded(&bytes).expect("manifest should parse");
        assert_eq!(parsed.name, "chat_filter");
        assert_eq!(parsed.references.len(), 2);
    }

    #[test]
    fn bare_marker_without_payload_is_skipped() {
        // A stray marker (no JSON behind it) must not mask a later real one.
        let mut bytes = marker();
        bytes.extend_from_slice(b"garbage");
        bytes.extend_from_slice(&manifest("real", &[]).embedded_bytes());

        let parsed = ModuleManifest::from_embedded(&bytes).expect("manifest should parse");
        assert_eq!(parsed.name, "real");
    }

    #[test]
    fn unmarked_bytes_are_not_a_manifest() {
        assert!(ModuleManifest::from_embedded(b"just some text").is_none());
        assert!(ModuleManifest::from_embedded(&[]).is_none());
    }

    #[test]
    fn reference_parsing_splits_versions() {
        let reference = ModuleReference::parse("perm_core@0.2.1");
        assert_eq!(reference.name, "perm_core");
        assert_eq!(reference.version.as_deref(), Some("0.2.1"));

        let bare = ModuleReference::parse("perm_core");
        assert_eq!(bare.name, "perm_core");
        assert!(bare.version.is_none());

        assert_eq!(format!("{}", reference), "perm_core@0.2.1");
        assert_eq!(format!("{}", bare), "perm_core");
    }

    #[test]
    fn references_module_is_case_insensitive() {
        let manifest = manifest("a", &["Keystone_API", "other@1.0"]);
        assert!(manifest.references_module("keystone_api"));
        assert!(manifest.references_module("OTHER"));
        assert!(!manifest.references_module("missing"));
    }
}
