use std::sync::Arc;

use crate::modules::{AnalysisModule, ModuleConfig};
use crate::store::{ModuleStore, StoreError};

/// Works out which configuration a run should use.
///
/// Precedence: an explicit config from the caller, then the stored config,
/// then the module's compiled default. Store read failures fall through to
/// the default instead of failing the run.
#[derive(Clone)]
pub struct ConfigResolver {
    store: Arc<dyn ModuleStore>,
}

impl ConfigResolver {
    pub fn new(store: Arc<dyn ModuleStore>) -> Self {
        Self { store }
    }

    /// Stored config for `module_id`; `None` when absent or unreadable.
    pub async fn load(&self, module_id: &str) -> Option<ModuleConfig> {
        match self.store.load_config(module_id).await {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(module_id, error = %err, "Config load failed; using defaults");
                None
            }
        }
    }

    pub async fn resolve(
        &self,
        module_id: &str,
        explicit: Option<ModuleConfig>,
        module: &dyn AnalysisModule,
    ) -> ModuleConfig {
        if let Some(config) = explicit {
            return config;
        }
        match self.load(module_id).await {
            Some(config) => config,
            None => module.default_config(),
        }
    }

    pub async fn save(&self, config: &ModuleConfig) -> Result<(), StoreError> {
        self.store.save_config(config).await?;
        tracing::info!(module_id = %config.module_id, "Module config saved");
        Ok(())
    }

    pub async fn list_configured(&self) -> Result<Vec<ModuleConfig>, StoreError> {
        self.store.list_configs().await
    }
}
