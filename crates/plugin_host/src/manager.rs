//! Plugin manager: discovery, loading, lifecycle, and cascading unload.

use crate::error::HostError;
use crate::inject;
use crate::inspect;
use crate::paths::SearchPaths;
use crate::registry::TypedReferenceRegistry;
use crate::resolver;
use crate::runtime::{HostConfig, LoadedExports, ModuleRuntime, NativeRuntime};
use dashmap::DashMap;
use keystone_api::{
    BuiltPlugin, Host, ModuleManifest, Plugin, PluginExport, PluginInfo, HOST_MODULE_NAME,
};
use std::any::{Any, TypeId};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

/// Lifecycle state of one plugin instance.
///
/// `Constructed -> Enabled -> Disabled(terminal)`; there is no re-entry and
/// no resume from disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    Constructed,
    Enabled,
    Disabled,
}

/// One instantiated plugin, owned by its module's table entry.
pub(crate) struct PluginInstance {
    pub plugin: Arc<dyn Plugin>,
    /// The same object under its concrete type, for injection into later
    /// constructors.
    pub instance: Arc<dyn Any + Send + Sync>,
    pub type_id: TypeId,
    pub type_name: String,
    pub state: PluginState,
}

impl PluginInstance {
    pub(crate) fn new(export: &PluginExport, built: BuiltPlugin) -> Self {
        Self {
            plugin: built.plugin,
            instance: built.instance,
            type_id: export.type_id,
            type_name: export.type_name.to_string(),
            state: PluginState::Constructed,
        }
    }
}

/// Record of a module the runtime has loaded into the plugin set.
pub(crate) struct LoadedModule {
    pub manifest: ModuleManifest,
    #[allow(dead_code)]
    pub origin_dir: PathBuf,
    pub plugins: Vec<PluginInstance>,
    /// Lowercased names of loaded modules this module depends on, from
    /// reference resolution plus injected cross-module values. Always a
    /// subset of the loaded-module table's keys.
    pub dependencies: BTreeSet<String>,
    /// Keeps the backing library mapped until every instance is gone.
    _exports: LoadedExports,
}

/// A view of one loaded plugin, as reported by
/// [`PluginManager::get_loaded_plugins`].
pub struct LoadedPlugin {
    pub plugin: Arc<dyn Plugin>,
    pub info: PluginInfo,
    pub enabled: bool,
    /// Type names of the plugins exported by this plugin's dependency
    /// modules.
    pub dependencies: Vec<String>,
}

/// Summary of one discovery pass.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub files_processed: usize,
    pub modules_loaded: Vec<String>,
    pub plugins_found: usize,
    pub plugins_enabled: usize,
}

/// A module loaded this pass, waiting for plugin extraction.
struct PendingModule {
    manifest: ModuleManifest,
    origin_dir: PathBuf,
    exports: LoadedExports,
    /// Lowercased names of every resolved reference.
    resolved: Vec<String>,
}

/// Cache entry for a module name known to the process.
struct KnownModule {
    /// Pre-seeded by configuration rather than loaded from disk.
    seeded: bool,
    /// Keepalive for loaded modules that never joined the plugin set.
    exports: Option<LoadedExports>,
}

struct ManagerState {
    /// The loaded-module table, keyed by lowercased module name. Single
    /// source of truth for what may safely be unloaded.
    modules: HashMap<String, LoadedModule>,
    /// Root of the most recent discovery pass.
    last_discovery_dir: Option<PathBuf>,
}

/// Plugin manager for discovering, loading, wiring, and unloading modules.
///
/// The `PluginManager` handles the complete lifecycle of plugins including:
/// - Discovery of module files in a directory tree
/// - Static manifest inspection and dependency resolution
/// - Module loading and constructor injection
/// - Enable/disable lifecycle transitions
/// - Cascading unload over the dependency graph
/// - Error handling and isolation between plugins
pub struct PluginManager {
    host: Arc<dyn Host>,
    runtime: Arc<dyn ModuleRuntime>,
    /// Every module name known to the process, loaded or pre-seeded.
    known_modules: DashMap<String, KnownModule>,
    references: TypedReferenceRegistry,
    /// The plugin lock: load and unload never interleave.
    state: Mutex<ManagerState>,
}

impl PluginManager {
    /// Creates a manager that loads modules as native dynamic libraries.
    pub fn new(host: Arc<dyn Host>, config: HostConfig) -> Self {
        let runtime = Arc::new(NativeRuntime::new(config.clone()));
        Self::with_runtime(host, config, runtime)
    }

    /// Creates a manager backed by a custom [`ModuleRuntime`].
    pub fn with_runtime(
        host: Arc<dyn Host>,
        config: HostConfig,
        runtime: Arc<dyn ModuleRuntime>,
    ) -> Self {
        let known_modules = DashMap::new();
        // The host satisfies references to its own contract and to anything
        // the embedding application declares as provided.
        known_modules.insert(
            HOST_MODULE_NAME.to_lowercase(),
            KnownModule {
                seeded: true,
                exports: None,
            },
        );
        for provided in &config.provided_references {
            known_modules.insert(
                provided.to_lowercase(),
                KnownModule {
                    seeded: true,
                    exports: None,
                },
            );
        }

        Self {
            host,
            runtime,
            known_modules,
            references: TypedReferenceRegistry::new(),
            state: Mutex::new(ManagerState {
                modules: HashMap::new(),
                last_discovery_dir: None,
            }),
        }
    }

    /// Scans `directory` recursively for module files, loads every candidate
    /// whose dependency set resolves, instantiates its plugins, and enables
    /// them.
    ///
    /// Per-candidate failures (wrong format, unresolved references, load or
    /// construction errors) are logged and skipped; they never abort the
    /// pass. Fails only when `directory` does not exist.
    pub fn discover_plugins(&self, directory: impl AsRef<Path>) -> Result<DiscoveryReport, HostError> {
        let dir = directory.as_ref();
        if !dir.is_dir() {
            return Err(HostError::DirectoryNotFound(dir.to_path_buf()));
        }

        info!("Loading modules from: {}", dir.display());

        let files = collect_module_files(dir)?;
        let mut report = DiscoveryReport::default();
        let mut batch: Vec<(String, PendingModule)> = Vec::new();

        let enabled_keys = {
            let mut state = self.lock();
            state.last_discovery_dir = Some(dir.to_path_buf());

            for file in &files {
                report.files_processed += 1;
                match self.process_file(&mut state, &mut batch, file) {
                    Ok(()) => {}
                    Err(HostError::NotAModule(path)) => {
                        debug!("File is not a module ({})", path.display());
                    }
                    Err(e) => {
                        error!("Failed loading \"{}\": {}", file.display(), e);
                    }
                }
            }

            info!(
                "Loaded {} modules from {} processed files.",
                batch.len(),
                report.files_processed
            );

            // Plugin extraction in load order: dependencies first, each
            // module seeing the instances of everything before it.
            let mut keys = Vec::with_capacity(batch.len());
            for (key, pending) in batch {
                report.modules_loaded.push(pending.manifest.name.clone());
                self.extract_plugins(&mut state, &key, pending);
                keys.push(key);
            }

            report.plugins_found = keys
                .iter()
                .filter_map(|key| state.modules.get(key))
                .map(|module| module.plugins.len())
                .sum();
            info!("Found {} plugins", report.plugins_found);
            keys
        };

        report.plugins_enabled = self.enable_batch(&enabled_keys);
        info!("Enabled {} plugins!", report.plugins_enabled);

        Ok(report)
    }

    /// Unloads `name` together with every module that depends on it,
    /// directly or transitively. Unknown targets are logged, not fatal.
    pub fn unload_module(&self, name: &str) {
        let mut state = self.lock();
        let key = name.to_lowercase();

        if !state.modules.contains_key(&key) {
            error!(
                "{}",
                HostError::UnloadTargetNotFound(name.to_string())
            );
            return;
        }

        for module_key in cascade_order(&state.modules, &key) {
            self.teardown_module(&mut state, &module_key);
        }
    }

    /// Unloads every loaded module and clears the non-seeded name cache.
    pub fn unload_all(&self) {
        let mut state = self.lock();
        info!("Unloading {} modules", state.modules.len());

        while let Some(key) = state.modules.keys().next().cloned() {
            for module_key in cascade_order(&state.modules, &key) {
                self.teardown_module(&mut state, &module_key);
            }
        }

        // Cached references that never joined the plugin set are released
        // too; configuration-seeded names survive.
        self.known_modules.retain(|_, known| known.seeded);
    }

    /// Registers a host-owned singleton for type `T`. Fails if `T` is
    /// already registered.
    pub fn set_reference<T: Send + Sync + 'static>(&self, value: T) -> Result<(), HostError> {
        self.references.set(value)
    }

    /// Looks up the singleton registered for type `T`.
    pub fn try_get_reference<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.references.get::<T>()
    }

    /// Reports every loaded plugin with its info, enabled flag, and the
    /// plugin type names of its module's dependencies.
    pub fn get_loaded_plugins(&self) -> Vec<LoadedPlugin> {
        let state = self.lock();
        let mut loaded = Vec::new();

        for module in state.modules.values() {
            let dependencies: Vec<String> = module
                .dependencies
                .iter()
                .filter_map(|dependency| state.modules.get(dependency))
                .flat_map(|dependency| {
                    dependency.plugins.iter().map(|p| p.type_name.clone())
                })
                .collect();

            for instance in &module.plugins {
                loaded.push(LoadedPlugin {
                    plugin: instance.plugin.clone(),
                    info: instance.plugin.info(),
                    enabled: instance.state == PluginState::Enabled,
                    dependencies: dependencies.clone(),
                });
            }
        }

        loaded
    }

    /// Gets the number of currently loaded modules.
    pub fn module_count(&self) -> usize {
        self.lock().modules.len()
    }

    /// Gets the number of plugin instances across all loaded modules.
    pub fn plugin_count(&self) -> usize {
        self.lock().modules.values().map(|m| m.plugins.len()).sum()
    }

    /// Checks if a module with the given name is loaded.
    pub fn is_module_loaded(&self, name: &str) -> bool {
        self.lock().modules.contains_key(&name.to_lowercase())
    }

    /// Gets the declared names of the loaded modules.
    pub fn module_names(&self) -> Vec<String> {
        self.lock()
            .modules
            .values()
            .map(|module| module.manifest.name.clone())
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn name_is_known(&self, state: &ManagerState, key: &str) -> bool {
        state.modules.contains_key(key) || self.known_modules.contains_key(key)
    }

    /// Processes one candidate file: inspect, filter, resolve, load.
    fn process_file(
        &self,
        state: &mut ManagerState,
        batch: &mut Vec<(String, PendingModule)>,
        file: &Path,
    ) -> Result<(), HostError> {
        let manifest = inspect::inspect_module(file)?;
        let key = manifest.name.to_lowercase();

        if self.name_is_known(state, &key) {
            debug!("Module \"{}\" is already loaded", manifest.name);
            return Ok(());
        }

        // Modules that never reference the host cannot contain plugins;
        // this is the filter that keeps unrelated libraries found by the
        // scan out of the plugin set.
        if !manifest.references_module(HOST_MODULE_NAME) {
            debug!(
                "Skipping \"{}\": no reference to {}",
                manifest.name, HOST_MODULE_NAME
            );
            return Ok(());
        }

        let mut in_progress = BTreeSet::new();
        self.load_with_dependencies(state, batch, file, manifest, &mut in_progress)
    }

    /// Loads `manifest`'s module after resolving and loading everything it
    /// references. `in_progress` guards cyclic reference declarations.
    fn load_with_dependencies(
        &self,
        state: &mut ManagerState,
        batch: &mut Vec<(String, PendingModule)>,
        file: &Path,
        manifest: ModuleManifest,
        in_progress: &mut BTreeSet<String>,
    ) -> Result<(), HostError> {
        let key = manifest.name.to_lowercase();
        if self.name_is_known(state, &key) {
            return Ok(());
        }
        if !in_progress.insert(key.clone()) {
            warn!(
                "Cyclic reference involving \"{}\"; the outer load will finish it",
                manifest.name
            );
            return Ok(());
        }

        let search = SearchPaths::for_candidate(file, state.last_discovery_dir.clone());
        let resolved = {
            let is_known = |name: &str| {
                state.modules.contains_key(name)
                    || self.known_modules.contains_key(name)
                    || in_progress.contains(name)
            };
            resolver::resolve_references(&manifest, &search, &is_known)?
        };
        let resolved_names = resolved.names();

        // Every newly found reference loads before the module itself.
        for dependency in resolved.pending {
            let dependency_key = dependency.reference.name.to_lowercase();
            if self.name_is_known(state, &dependency_key) || in_progress.contains(&dependency_key)
            {
                continue;
            }
            let dependency_manifest =
                inspect::inspect_module(&dependency.path).map_err(|e| {
                    HostError::LoadFailure(format!(
                        "Failed to load reference \"{}\" from {}: {}",
                        dependency.reference,
                        dependency.path.display(),
                        e
                    ))
                })?;
            self.load_with_dependencies(
                state,
                batch,
                &dependency.path,
                dependency_manifest,
                in_progress,
            )?;
        }

        let exports = self.runtime.load(file, &manifest)?;
        let origin_dir = file.parent().map(Path::to_path_buf).unwrap_or_default();

        if manifest.references_module(HOST_MODULE_NAME) {
            self.known_modules.insert(
                key.clone(),
                KnownModule {
                    seeded: false,
                    exports: None,
                },
            );
            debug!("Loaded module \"{}\" from {}", manifest.name, file.display());
            batch.push((
                key,
                PendingModule {
                    manifest,
                    origin_dir,
                    exports,
                    resolved: resolved_names,
                },
            ));
        } else {
            // Cached by name only; a reference that never mentions the host
            // stays out of the plugin set.
            debug!("Loaded reference \"{}\" (not plugin-capable)", manifest.name);
            self.known_modules.insert(
                key,
                KnownModule {
                    seeded: false,
                    exports: Some(exports),
                },
            );
        }

        Ok(())
    }

    /// Registers a pending module's exported references, instantiates its
    /// plugins, and inserts its table entry.
    fn extract_plugins(&self, state: &mut ManagerState, key: &str, pending: PendingModule) {
        let PendingModule {
            manifest,
            origin_dir,
            exports,
            resolved,
        } = pending;

        // Exported references register first so injection can see them.
        for reference in &exports.exports.references {
            if let Err(e) = self.references.insert(
                reference.type_id,
                reference.build(),
                reference.type_name.to_string(),
                Some(key.to_string()),
            ) {
                warn!(
                    "Module \"{}\" could not register reference {}: {}",
                    manifest.name, reference.type_name, e
                );
            }
        }

        let outcome = inject::instantiate_plugins(
            key,
            &exports.exports,
            &self.host,
            &self.references,
            &state.modules,
        );

        if outcome.plugins.is_empty() {
            // Nothing instantiable; the module stays cached but out of the
            // plugin set.
            debug!("Module \"{}\" yielded no plugin instances", manifest.name);
            if let Some(mut known) = self.known_modules.get_mut(key) {
                known.exports = Some(exports);
            }
            return;
        }

        let mut dependencies: BTreeSet<String> = resolved
            .into_iter()
            .filter(|name| state.modules.contains_key(name))
            .collect();
        for provider in outcome.induced_dependencies {
            if state.modules.contains_key(&provider) {
                dependencies.insert(provider);
            }
        }

        state.modules.insert(
            key.to_string(),
            LoadedModule {
                manifest,
                origin_dir,
                plugins: outcome.plugins,
                dependencies,
                _exports: exports,
            },
        );
    }

    /// Drives the `Constructed -> Enabled` transition for every new
    /// instance. Runs outside the plugin lock so enable code can call back
    /// into the registry.
    fn enable_batch(&self, keys: &[String]) -> usize {
        let mut to_enable: Vec<Arc<dyn Plugin>> = Vec::new();
        {
            let mut state = self.lock();
            for key in keys {
                if let Some(module) = state.modules.get_mut(key) {
                    for instance in &mut module.plugins {
                        if instance.state == PluginState::Constructed {
                            instance.state = PluginState::Enabled;
                            to_enable.push(instance.plugin.clone());
                        }
                    }
                }
            }
        }

        let mut enabled = 0;
        for plugin in to_enable {
            match plugin.enabled(&self.host) {
                Ok(()) => enabled += 1,
                Err(e) => {
                    error!("Error occurred while enabling plugin: {}", e);
                }
            }
        }
        enabled
    }

    /// Tears down one module: registry entries it owns, then each plugin
    /// instance, then the table entry itself.
    fn teardown_module(&self, state: &mut ManagerState, key: &str) {
        let removed = self.references.remove_owned_by(key);
        if removed > 0 {
            debug!("Removed {} typed reference(s) owned by \"{}\"", removed, key);
        }

        let (display_name, empty) = {
            let Some(module) = state.modules.get_mut(key) else {
                error!("{}", HostError::UnloadTargetNotFound(key.to_string()));
                return;
            };
            let display_name = module.manifest.name.clone();

            let commands = self.host.commands();
            while let Some(mut instance) = module.plugins.pop() {
                if instance.state != PluginState::Disabled {
                    instance.state = PluginState::Disabled;
                    if let Err(e) = instance.plugin.disabled(&self.host) {
                        error!(
                            "Error while disabling plugin {}: {}",
                            instance.type_name, e
                        );
                    }
                }
                commands.unload_commands(instance.plugin.as_ref());
            }

            (display_name, module.plugins.is_empty())
        };

        if empty {
            state.modules.remove(key);
            self.known_modules.remove(key);
            info!("Unloaded module \"{}\"", display_name);
        }
    }
}

/// Depth-first cascade order for unloading `target`: every module that
/// depends on it, directly or transitively, dependents first, ending with
/// `target` itself. The visited set makes cyclic dependency edges safe.
fn cascade_order(modules: &HashMap<String, LoadedModule>, target: &str) -> Vec<String> {
    let mut order = Vec::new();
    let mut visited = BTreeSet::new();
    let mut stack = vec![(target.to_string(), false)];

    while let Some((name, expanded)) = stack.pop() {
        if expanded {
            order.push(name);
            continue;
        }
        if !visited.insert(name.clone()) {
            continue;
        }
        stack.push((name.clone(), true));
        for (dependent, module) in modules {
            if module.dependencies.contains(&name) && !visited.contains(dependent) {
                stack.push((dependent.clone(), false));
            }
        }
    }

    order
}

/// Collects module files under `dir`, recursively, in stable order.
fn collect_module_files(dir: &Path) -> Result<Vec<PathBuf>, HostError> {
    let mut files = Vec::new();
    let mut directories = vec![dir.to_path_buf()];

    while let Some(current) = directories.pop() {
        for entry in std::fs::read_dir(&current)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                directories.push(path);
            } else if inspect::is_module_file(&path) {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}
