use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::modules::ModuleResult;
use crate::store::{CacheEntry, ModuleStore, StoreError};

/// Largest TTL `chrono::Duration` can represent.
const MAX_TTL_SECONDS: i64 = i64::MAX / 1000;

/// Store-backed TTL cache of successful module results.
///
/// Entries are keyed by `(module_id, cache_key)`; a write replaces whatever
/// was cached under the same key. Only results with `status = success` are
/// ever written.
#[derive(Clone)]
pub struct ResultCache {
    store: Arc<dyn ModuleStore>,
}

impl ResultCache {
    pub fn new(store: Arc<dyn ModuleStore>) -> Self {
        Self { store }
    }

    /// Returns the cached result only while it is still within its TTL.
    pub async fn get(
        &self,
        module_id: &str,
        cache_key: &str,
    ) -> Result<Option<ModuleResult>, StoreError> {
        self.get_at(module_id, cache_key, Utc::now()).await
    }

    pub async fn get_at(
        &self,
        module_id: &str,
        cache_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ModuleResult>, StoreError> {
        let Some(entry) = self.store.get_cache_entry(module_id, cache_key, now).await? else {
            return Ok(None);
        };

        match serde_json::from_value::<ModuleResult>(entry.data) {
            Ok(mut result) if result.is_success() => {
                result.cached = true;
                result.run_id = None;
                Ok(Some(result))
            }
            Ok(_) => {
                tracing::warn!(module_id, "Ignoring cached non-success result");
                Ok(None)
            }
            Err(err) => {
                tracing::warn!(module_id, "Ignoring unreadable cache entry: {}", err);
                Ok(None)
            }
        }
    }

    /// Cache `result` for `ttl_seconds`. Non-success results are skipped.
    ///
    /// Returns `true` when an entry was written.
    pub async fn put(
        &self,
        module_id: &str,
        cache_key: &str,
        result: &ModuleResult,
        ttl_seconds: u64,
    ) -> Result<bool, StoreError> {
        if !result.is_success() {
            tracing::debug!(module_id, "Not caching non-success result");
            return Ok(false);
        }

        let mut stored = result.clone();
        stored.cached = false;
        stored.run_id = None;

        let now = Utc::now();
        let ttl_seconds = i64::try_from(ttl_seconds)
            .unwrap_or(i64::MAX)
            .min(MAX_TTL_SECONDS);
        let ttl = Duration::seconds(ttl_seconds);
        let entry = CacheEntry {
            module_id: module_id.to_string(),
            cache_key: cache_key.to_string(),
            data: serde_json::to_value(&stored)?,
            created_at: now,
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        };

        self.store.put_cache_entry(&entry).await?;
        Ok(true)
    }

    /// Delete every expired entry. Idempotent.
    pub async fn purge_expired(&self) -> Result<u64, StoreError> {
        self.store.delete_expired_cache(Utc::now()).await
    }

    /// Delete all entries, or only those belonging to `module_id`.
    pub async fn clear(&self, module_id: Option<&str>) -> Result<u64, StoreError> {
        self.store.clear_cache(module_id).await
    }
}
