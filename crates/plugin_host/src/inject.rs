//! Constructor-parameter dependency injection.
//!
//! Each exported plugin type is instantiated by matching constructor
//! parameters against, in fixed priority order: the host instance, the
//! typed reference registry, and the already-instantiated plugins of other
//! loaded modules. Failures are isolated per type; a type that cannot be
//! constructed yields no instance and the batch continues.

use crate::error::HostError;
use crate::manager::{LoadedModule, PluginInstance};
use crate::registry::TypedReferenceRegistry;
use keystone_api::{Host, ModuleExports, ParamSpec, PluginExport, ResolvedParam};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{error, warn};

pub(crate) struct InjectionOutcome {
    pub plugins: Vec<PluginInstance>,
    /// Lowercased names of other modules whose values were injected.
    pub induced_dependencies: BTreeSet<String>,
}

/// Instantiates every plugin-capable type exported by `module_name`.
pub(crate) fn instantiate_plugins(
    module_name: &str,
    exports: &ModuleExports,
    host: &Arc<dyn Host>,
    registry: &TypedReferenceRegistry,
    loaded: &HashMap<String, LoadedModule>,
) -> InjectionOutcome {
    let mut outcome = InjectionOutcome {
        plugins: Vec::new(),
        induced_dependencies: BTreeSet::new(),
    };

    for export in &exports.plugins {
        if let Some(instance) = instantiate_one(
            module_name,
            export,
            host,
            registry,
            loaded,
            &mut outcome.induced_dependencies,
        ) {
            outcome.plugins.push(instance);
        }
    }

    outcome
}

fn instantiate_one(
    module_name: &str,
    export: &PluginExport,
    host: &Arc<dyn Host>,
    registry: &TypedReferenceRegistry,
    loaded: &HashMap<String, LoadedModule>,
    induced: &mut BTreeSet<String>,
) -> Option<PluginInstance> {
    // A zero-argument constructor is invoked directly, wherever it appears
    // in the declaration order.
    if let Some(constructor) = export.constructors.iter().find(|c| c.is_nullary()) {
        return match constructor.build(Vec::new()) {
            Ok(built) => Some(PluginInstance::new(export, built)),
            Err(e) => {
                error!(
                    "{}",
                    HostError::ConstructionFailure {
                        type_name: export.type_name.to_string(),
                        reason: e.to_string(),
                    }
                );
                None
            }
        };
    }

    for constructor in &export.constructors {
        let mut args = Vec::with_capacity(constructor.params.len());
        let mut providers = BTreeSet::new();
        let mut satisfied = true;

        for param in &constructor.params {
            match resolve_param(module_name, param, host, registry, loaded) {
                Some((argument, provider)) => {
                    args.push(argument);
                    if let Some(provider) = provider {
                        providers.insert(provider);
                    }
                }
                None => {
                    satisfied = false;
                    break;
                }
            }
        }

        if !satisfied {
            warn!(
                "Could not call constructor {} for {}",
                constructor.signature(),
                export.type_name
            );
            continue;
        }

        // First fully resolved constructor wins; the rest are not tried.
        return match constructor.build(args) {
            Ok(built) => {
                induced.extend(providers);
                Some(PluginInstance::new(export, built))
            }
            Err(e) => {
                error!(
                    "{}",
                    HostError::ConstructionFailure {
                        type_name: export.type_name.to_string(),
                        reason: e.to_string(),
                    }
                );
                None
            }
        };
    }

    warn!("No constructor for {} could be satisfied", export.type_name);
    None
}

/// Maps one requested parameter to {host, registry, sibling plugin}, tried
/// in that fixed priority order. Returns the argument together with the
/// providing module when it differs from the loading module.
fn resolve_param(
    module_name: &str,
    param: &ParamSpec,
    host: &Arc<dyn Host>,
    registry: &TypedReferenceRegistry,
    loaded: &HashMap<String, LoadedModule>,
) -> Option<(ResolvedParam, Option<String>)> {
    match param {
        ParamSpec::Host => Some((ResolvedParam::Host(host.clone()), None)),
        ParamSpec::Typed { id, .. } => {
            if let Some((value, owner)) = registry.lookup(id) {
                let provider = owner.filter(|o| o != module_name);
                return Some((ResolvedParam::Value(value), provider));
            }

            for (name, module) in loaded {
                for instance in &module.plugins {
                    if instance.type_id == *id {
                        let provider = (name != module_name).then(|| name.clone());
                        return Some((ResolvedParam::Value(instance.instance.clone()), provider));
                    }
                }
            }

            None
        }
    }
}
