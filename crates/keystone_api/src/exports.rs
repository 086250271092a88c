//! The export table a loaded module hands to the host.
//!
//! There is no runtime reflection to discover plugin types or their
//! constructors, so a module describes them explicitly: each plugin-capable
//! type is a [`PluginExport`] listing its constructors in declaration order,
//! and each constructor is a [`ConstructorSpec`] pairing the parameter types
//! it needs with a function that builds the instance from resolved
//! arguments. The host's injector matches [`ParamSpec`]s against the host
//! instance, the typed reference registry, and already-instantiated plugins,
//! in that order.

use crate::host::Host;
use crate::plugin::{Plugin, PluginError};
use std::any::{Any, TypeId};
use std::sync::Arc;

/// Everything a module makes available to the host after loading.
#[derive(Default)]
pub struct ModuleExports {
    /// Plugin-capable types, with constructors in declaration order.
    pub plugins: Vec<PluginExport>,
    /// Typed reference singletons this module contributes to the registry.
    /// Registered at load, removed again when the module unloads.
    pub references: Vec<ReferenceExport>,
}

impl ModuleExports {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plugin(mut self, plugin: PluginExport) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn with_reference(mut self, reference: ReferenceExport) -> Self {
        self.references.push(reference);
        self
    }
}

/// One exported plugin-capable type.
pub struct PluginExport {
    pub type_name: &'static str,
    pub type_id: TypeId,
    /// Constructors in declaration order. A zero-argument constructor is
    /// always preferred over parameterized ones, wherever it appears.
    pub constructors: Vec<ConstructorSpec>,
}

impl PluginExport {
    pub fn of<T: Plugin>() -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            type_id: TypeId::of::<T>(),
            constructors: Vec::new(),
        }
    }

    pub fn with_constructor(mut self, constructor: ConstructorSpec) -> Self {
        self.constructors.push(constructor);
        self
    }
}

/// One constructor parameter the injector must satisfy.
#[derive(Debug, Clone, Copy)]
pub enum ParamSpec {
    /// The host instance itself.
    Host,
    /// A typed value: a registry singleton or another module's plugin.
    Typed {
        id: TypeId,
        name: &'static str,
    },
}

impl ParamSpec {
    /// A parameter requesting a value of type `T`.
    pub fn of<T: Send + Sync + 'static>() -> Self {
        ParamSpec::Typed {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ParamSpec::Host => "Host",
            ParamSpec::Typed { name, .. } => name,
        }
    }
}

/// A constructor argument after the injector resolved it.
pub enum ResolvedParam {
    Host(Arc<dyn Host>),
    Value(Arc<dyn Any + Send + Sync>),
}

impl ResolvedParam {
    /// Unwraps a [`ParamSpec::Host`] argument.
    pub fn into_host(self) -> Result<Arc<dyn Host>, PluginError> {
        match self {
            ResolvedParam::Host(host) => Ok(host),
            ResolvedParam::Value(_) => Err(PluginError::DependencyError(
                "expected the host instance".to_string(),
            )),
        }
    }

    /// Downcasts a typed argument to the concrete type the constructor needs.
    pub fn into_value<T: Send + Sync + 'static>(self) -> Result<Arc<T>, PluginError> {
        match self {
            ResolvedParam::Value(value) => value.downcast::<T>().map_err(|_| {
                PluginError::DependencyError(format!(
                    "expected a value of type {}",
                    std::any::type_name::<T>()
                ))
            }),
            ResolvedParam::Host(_) => Err(PluginError::DependencyError(format!(
                "expected a value of type {}, got the host instance",
                std::any::type_name::<T>()
            ))),
        }
    }
}

/// A freshly constructed plugin, shared once as the plugin capability and
/// once as its concrete type for injection into later constructors.
pub struct BuiltPlugin {
    pub plugin: Arc<dyn Plugin>,
    pub instance: Arc<dyn Any + Send + Sync>,
}

impl BuiltPlugin {
    pub fn new<T: Plugin>(plugin: T) -> Self {
        let shared = Arc::new(plugin);
        Self {
            plugin: shared.clone(),
            instance: shared,
        }
    }
}

type ConstructorFn =
    Arc<dyn Fn(Vec<ResolvedParam>) -> Result<BuiltPlugin, PluginError> + Send + Sync>;

/// One constructor of an exported plugin type.
pub struct ConstructorSpec {
    pub params: Vec<ParamSpec>,
    build: ConstructorFn,
}

impl ConstructorSpec {
    /// A zero-argument constructor.
    pub fn nullary<T, F>(build: F) -> Self
    where
        T: Plugin,
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            params: Vec::new(),
            build: Arc::new(move |_args| Ok(BuiltPlugin::new(build()))),
        }
    }

    /// A zero-argument constructor that can fail.
    pub fn try_nullary<T, F>(build: F) -> Self
    where
        T: Plugin,
        F: Fn() -> Result<T, PluginError> + Send + Sync + 'static,
    {
        Self {
            params: Vec::new(),
            build: Arc::new(move |_args| build().map(BuiltPlugin::new)),
        }
    }

    /// A parameterized constructor. `build` receives the resolved arguments
    /// in the same order as `params`.
    pub fn with_params<F>(params: Vec<ParamSpec>, build: F) -> Self
    where
        F: Fn(Vec<ResolvedParam>) -> Result<BuiltPlugin, PluginError> + Send + Sync + 'static,
    {
        Self {
            params,
            build: Arc::new(build),
        }
    }

    pub fn is_nullary(&self) -> bool {
        self.params.is_empty()
    }

    /// Invokes the constructor with already-resolved arguments.
    pub fn build(&self, args: Vec<ResolvedParam>) -> Result<BuiltPlugin, PluginError> {
        (self.build)(args)
    }

    /// Human-readable parameter list for diagnostics.
    pub fn signature(&self) -> String {
        let params: Vec<&str> = self.params.iter().map(ParamSpec::name).collect();
        format!("({})", params.join(", "))
    }
}

/// A typed reference singleton a module contributes to the registry.
pub struct ReferenceExport {
    pub type_name: &'static str,
    pub type_id: TypeId,
    build: Arc<dyn Fn() -> Arc<dyn Any + Send + Sync> + Send + Sync>,
}

impl ReferenceExport {
    pub fn of<T, F>(build: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            type_name: std::any::type_name::<T>(),
            type_id: TypeId::of::<T>(),
            build: Arc::new(move || Arc::new(build()) as Arc<dyn Any + Send + Sync>),
        }
    }

    /// Produces the singleton value to register.
    pub fn build(&self) -> Arc<dyn Any + Send + Sync> {
        (self.build)()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::PluginInfo;

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

    #[test]
    fn nullary_constructor_builds_directly() {
        let spec = ConstructorSpec::nullary(|| Probe);
        assert!(spec.is_nullary());

        let built = spec.build(Vec::new()).expect("construction should succeed");
        assert_eq!(built.plugin.info().name, "probe");
        assert!(built.instance.downcast::<Probe>().is_ok());
    }

    #[test]
    fn typed_params_downcast_to_the_requested_type() {
        let value: Arc<dyn std::any::Any + Send + Sync> = Arc::new(42u32);
        let resolved = ResolvedParam::Value(value);
        assert_eq!(*resolved.into_value::<u32>().unwrap(), 42);

        let wrong: Arc<dyn std::any::Any + Send + Sync> = Arc::new("text");
        assert!(ResolvedParam::Value(wrong).into_value::<u32>().is_err());
    }

    #[test]
    fn constructor_signature_names_parameters() {
        let spec = ConstructorSpec::with_params(
            vec![ParamSpec::Host, ParamSpec::of::<u32>()],
            |_args| Ok(BuiltPlugin::new(Probe)),
        );
        let signature = spec.signature();
        assert!(signature.starts_with("(Host, "));
        assert!(signature.contains("u32"));
    }
}
