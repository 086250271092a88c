//! Process-wide typed reference registry.

use crate::error::HostError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::any::{Any, TypeId};
use std::sync::Arc;

pub(crate) struct ReferenceEntry {
    pub value: Arc<dyn Any + Send + Sync>,
    pub type_name: String,
    /// Lowercased name of the module that registered the entry, or `None`
    /// for entries set by the host application.
    pub owner: Option<String>,
}

/// Singleton-per-type object store shared across all plugins.
///
/// Write-once per type: setting an already-set type fails rather than
/// overwriting, including under concurrent attempts. Entries live for the
/// process unless their owning module is unloaded.
#[derive(Default)]
pub struct TypedReferenceRegistry {
    entries: DashMap<TypeId, ReferenceEntry>,
}

impl TypedReferenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a host-owned singleton for type `T`.
    pub fn set<T: Send + Sync + 'static>(&self, value: T) -> Result<(), HostError> {
        self.insert(
            TypeId::of::<T>(),
            Arc::new(value),
            std::any::type_name::<T>().to_string(),
            None,
        )
    }

    pub(crate) fn insert(
        &self,
        id: TypeId,
        value: Arc<dyn Any + Send + Sync>,
        type_name: String,
        owner: Option<String>,
    ) -> Result<(), HostError> {
        match self.entries.entry(id) {
            Entry::Occupied(_) => Err(HostError::DuplicateReference(type_name)),
            Entry::Vacant(slot) => {
                slot.insert(ReferenceEntry {
                    value,
                    type_name,
                    owner,
                });
                Ok(())
            }
        }
    }

    /// Looks up the singleton registered for type `T`.
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        let entry = self.entries.get(&TypeId::of::<T>())?;
        entry.value.clone().downcast::<T>().ok()
    }

    /// Type-erased lookup used by the injector: the value plus the owning
    /// module, if any.
    pub(crate) fn lookup(&self, id: &TypeId) -> Option<(Arc<dyn Any + Send + Sync>, Option<String>)> {
        self.entries
            .get(id)
            .map(|entry| (entry.value.clone(), entry.owner.clone()))
    }

    /// Removes every entry owned by `module`, returning how many were dropped.
    pub(crate) fn remove_owned_by(&self, module: &str) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.owner.as_deref() != Some(module));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ClockService {
        ticks: u64,
    }

    #[test]
    fn references_are_write_once() {
        let registry = TypedReferenceRegistry::new();
        assert!(registry.set(ClockService { ticks: 1 }).is_ok());

        let second = registry.set(ClockService { ticks: 2 });
        assert!(matches!(second, Err(HostError::DuplicateReference(_))));

        // The first registration survives the failed second attempt.
        assert_eq!(registry.get::<ClockService>().unwrap().ticks, 1);
    }

    #[test]
    fn lookup_before_set_reports_not_found() {
        let registry = TypedReferenceRegistry::new();
        assert!(registry.get::<ClockService>().is_none());
    }

    #[test]
    fn unloading_a_module_drops_only_its_entries() {
        let registry = TypedReferenceRegistry::new();
        registry
            .insert(
                TypeId::of::<ClockService>(),
                Arc::new(ClockService { ticks: 7 }),
                "ClockService".to_string(),
                Some("timekeeper".to_string()),
            )
            .unwrap();
        registry.set(42u32).unwrap();

        assert_eq!(registry.remove_owned_by("timekeeper"), 1);
        assert!(registry.get::<ClockService>().is_none());
        assert_eq!(*registry.get::<u32>().unwrap(), 42);

        // Unknown owners remove nothing.
        assert_eq!(registry.remove_owned_by("ghost"), 0);
        assert_eq!(registry.len(), 1);
    }
}
