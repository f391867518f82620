//! Module registry
//!
//! Maps a module id to a factory producing fresh [`AnalysisModule`]
//! instances. Each factory is invoked once at registration to capture the
//! module's metadata; every metadata query afterwards reads that copy.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::modules::{AnalysisModule, ModuleMetadata};

type Factory = Arc<dyn Fn() -> Box<dyn AnalysisModule> + Send + Sync>;

struct Registration {
    factory: Factory,
    metadata: ModuleMetadata,
}

#[derive(Default)]
pub struct ModuleRegistry {
    modules: RwLock<HashMap<String, Registration>>,
}

static SHARED: OnceLock<Arc<ModuleRegistry>> = OnceLock::new();

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry, built by `init` on first access only.
    ///
    /// Concurrent first callers block until the winning `init` completes;
    /// later calls ignore their `init` argument.
    pub fn shared<F>(init: F) -> Arc<ModuleRegistry>
    where
        F: FnOnce(&ModuleRegistry),
    {
        SHARED
            .get_or_init(|| {
                let registry = ModuleRegistry::new();
                init(&registry);
                tracing::info!(modules = registry.len(), "Shared module registry initialised");
                Arc::new(registry)
            })
            .clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Registration>> {
        self.modules.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Registration>> {
        self.modules.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a module factory under the id its metadata declares.
    ///
    /// Re-registering an id replaces the previous entry.
    pub fn register<F>(&self, factory: F) -> ModuleMetadata
    where
        F: Fn() -> Box<dyn AnalysisModule> + Send + Sync + 'static,
    {
        let metadata = factory().metadata();
        let id = metadata.id.clone();
        let registration = Registration {
            factory: Arc::new(factory),
            metadata: metadata.clone(),
        };

        if self.write().insert(id.clone(), registration).is_some() {
            tracing::warn!(module_id = %id, "Module re-registered; previous registration replaced");
        } else {
            tracing::debug!(module_id = %id, category = %metadata.category, "Module registered");
        }

        metadata
    }

    pub fn register_type<M>(&self) -> ModuleMetadata
    where
        M: AnalysisModule + Default + 'static,
    {
        self.register(|| Box::new(M::default()))
    }

    /// Returns `true` when a module was removed.
    pub fn unregister(&self, module_id: &str) -> bool {
        let removed = self.write().remove(module_id).is_some();
        if removed {
            tracing::debug!(module_id, "Module unregistered");
        } else {
            tracing::info!(module_id, "Unregister ignored: module not registered");
        }
        removed
    }

    /// A fresh instance of the module, or `None` for an unknown id.
    pub fn get_instance(&self, module_id: &str) -> Option<Box<dyn AnalysisModule>> {
        let factory = self.read().get(module_id).map(|r| r.factory.clone())?;
        Some(factory())
    }

    pub fn get_metadata(&self, module_id: &str) -> Option<ModuleMetadata> {
        self.read().get(module_id).map(|r| r.metadata.clone())
    }

    pub fn contains(&self, module_id: &str) -> bool {
        self.read().contains_key(module_id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All metadata, ordered by module id.
    pub fn list_all(&self) -> Vec<ModuleMetadata> {
        let mut all: Vec<ModuleMetadata> = self.read().values().map(|r| r.metadata.clone()).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub fn list_by_category(&self, category: &str) -> Vec<ModuleMetadata> {
        self.list_all()
            .into_iter()
            .filter(|m| m.category == category)
            .collect()
    }

    /// Distinct categories, sorted.
    pub fn list_categories(&self) -> Vec<String> {
        self.read()
            .values()
            .map(|r| r.metadata.category.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}
