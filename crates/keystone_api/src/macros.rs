//! Macros for module development

/// Declares a compiled Keystone module.
///
/// Embeds the statically inspectable manifest and emits the `#[no_mangle]`
/// entry points the host loader looks up: the ABI version export checked
/// before any module code runs, and the export-table entry with panic
/// protection at the FFI boundary.
///
/// The marker literals must match the halves in `manifest.rs`; a test in
/// this crate asserts they do.
///
/// # Example
///
/// ```rust,ignore
/// use keystone_api::{ConstructorSpec, ModuleExports, PluginExport};
///
/// fn exports() -> ModuleExports {
///     ModuleExports::new().with_plugin(
///         PluginExport::of::<ChatFilter>()
///             .with_constructor(ConstructorSpec::nullary(ChatFilter::new)),
///     )
/// }
///
/// keystone_api::keystone_module! {
///     name: "chat_filter",
///     version: "0.1.0",
///     references: ["perm_core@0.2"],
///     exports: exports,
/// }
/// ```
#[macro_export]
macro_rules! keystone_module {
    (
        name: $name:literal,
        version: $version:literal,
        references: [$($reference:literal),* $(,)?],
        exports: $exports:path $(,)?
    ) => {
        /// Embedded manifest, read by the host without loading the library.
        #[used]
        #[no_mangle]
        pub static KEYSTONE_MODULE_MANIFEST: &str = concat!(
            "KSMOD\u{1}",
            "manifest:",
            r#"{"name":""#, $name,
            r#"","version":""#, $version,
            r#"","references":["keystone_api""#,
            $( ",\"", $reference, "\"", )*
            "]}"
        );

        /// ABI version export - checked by the host before the module entry runs.
        #[no_mangle]
        pub unsafe extern "C" fn keystone_abi_version() -> *const std::os::raw::c_char {
            let version = std::ffi::CString::new($crate::ABI_VERSION)
                .unwrap_or_else(|_| std::ffi::CString::new("invalid_version").unwrap());

            // Leak the CString to ensure it remains valid for the caller
            version.into_raw()
        }

        /// Module entry with panic protection - required export.
        #[no_mangle]
        pub unsafe extern "C" fn keystone_module_exports() -> *mut $crate::ModuleExports {
            // Critical: catch panics at the FFI boundary to prevent UB
            match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                Box::into_raw(Box::new($exports()))
            })) {
                Ok(exports) => exports,
                Err(panic_info) => {
                    eprintln!("Module export table construction panicked: {:?}", panic_info);
                    std::ptr::null_mut()
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::{ConstructorSpec, Host, ModuleExports, ModuleManifest, Plugin, PluginError,
        PluginExport, PluginInfo, HOST_MODULE_NAME};
    use std::sync::Arc;

    struct Probe;

    impl Plugin for Probe {
        fn info(&self) -> PluginInfo {
            PluginInfo::new("probe", "0.0.0")
        }

        fn enabled(&self, _host: &Arc<dyn Host>) -> Result<(), PluginError> {
            Ok(())
        }

        fn disabled(&self, _host: &Arc<dyn Host>) -> Result<(), PluginError> {
            Ok(())
        }
    }

    fn exports() -> ModuleExports {
        ModuleExports::new().with_plugin(
            PluginExport::of::<Probe>().with_constructor(ConstructorSpec::nullary(|| Probe)),
        )
    }

    crate::keystone_module! {
        name: "probe_module",
        version: "0.3.1",
        references: ["extra_lib@1.0"],
        exports: exports,
    }

    #[test]
    fn embedded_manifest_matches_the_declaration() {
        let manifest = ModuleManifest::from_embedded(KEYSTONE_MODULE_MANIFEST.as_bytes())
            .expect("the macro-embedded manifest should parse");

        assert_eq!(manifest.name, "probe_module");
        assert_eq!(manifest.version, "0.3.1");
        // The host capability reference is baked in ahead of declared ones.
        assert!(manifest.references_module(HOST_MODULE_NAME));
        let references = manifest.references();
        assert!(references.iter().any(|r| {
            r.name == "extra_lib" && r.version.as_deref() == Some("1.0")
        }));
    }

    #[test]
    fn abi_version_export_round_trips() {
        let pointer = unsafe { keystone_abi_version() };
        assert!(!pointer.is_null());
        let version = unsafe { std::ffi::CStr::from_ptr(pointer) }
            .to_string_lossy()
            .to_string();
        assert_eq!(version, crate::ABI_VERSION);
        // Reclaim the leaked CString.
        drop(unsafe { std::ffi::CString::from_raw(pointer as *mut _) });
    }

    #[test]
    fn module_entry_returns_the_export_table() {
        let pointer = unsafe { keystone_module_exports() };
        assert!(!pointer.is_null());
        let exports = *unsafe { Box::from_raw(pointer) };
        assert_eq!(exports.plugins.len(), 1);
        assert!(exports.plugins[0].constructors[0].is_nullary());
    }
}
