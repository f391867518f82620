//! In-memory module store.
//!
//! `MemoryStore` keeps configs, a bounded run history and the result cache
//! in process memory. Run history has ring-buffer semantics backed by a
//! `VecDeque`: when full, the oldest run is evicted before a new one is
//! appended. Used when no database is configured and throughout the tests.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{clamp_limit, CacheEntry, ModuleStore, RunRecord, StoreError};
use crate::modules::ModuleConfig;

/// Default maximum number of runs retained in memory.
pub const DEFAULT_RUN_CAPACITY: usize = 10_000;

#[derive(Debug, Default)]
struct Inner {
    configs: HashMap<String, ModuleConfig>,
    runs: VecDeque<RunRecord>,
    next_run_id: i64,
    cache: HashMap<(String, String), CacheEntry>,
}

#[derive(Debug)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    run_capacity: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_RUN_CAPACITY)
    }
}

impl MemoryStore {
    pub fn new(run_capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            run_capacity: run_capacity.max(1),
        }
    }
}

#[async_trait]
impl ModuleStore for MemoryStore {
    async fn load_config(&self, module_id: &str) -> Result<Option<ModuleConfig>, StoreError> {
        Ok(self.inner.read().await.configs.get(module_id).cloned())
    }

    async fn save_config(&self, config: &ModuleConfig) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .configs
            .insert(config.module_id.clone(), config.clone());
        Ok(())
    }

    async fn list_configs(&self) -> Result<Vec<ModuleConfig>, StoreError> {
        let inner = self.inner.read().await;
        let mut configs: Vec<_> = inner.configs.values().cloned().collect();
        configs.sort_by(|a, b| a.module_id.cmp(&b.module_id));
        Ok(configs)
    }

    async fn insert_run(&self, run: &RunRecord) -> Result<i64, StoreError> {
        let mut inner = self.inner.write().await;
        inner.next_run_id += 1;
        let id = inner.next_run_id;

        if inner.runs.len() >= self.run_capacity {
            inner.runs.pop_front();
        }
        inner.runs.push_back(RunRecord {
            id: Some(id),
            ..run.clone()
        });
        Ok(id)
    }

    async fn recent_runs(
        &self,
        module_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<RunRecord>, StoreError> {
        let limit = clamp_limit(limit) as usize;
        let inner = self.inner.read().await;
        Ok(inner
            .runs
            .iter()
            .rev()
            .filter(|run| module_id.map_or(true, |id| run.module_id == id))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn count_runs(&self, module_id: Option<&str>) -> Result<i64, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .runs
            .iter()
            .filter(|run| module_id.map_or(true, |id| run.module_id == id))
            .count() as i64)
    }

    async fn get_cache_entry(
        &self,
        module_id: &str,
        cache_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheEntry>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .cache
            .get(&(module_id.to_string(), cache_key.to_string()))
            .filter(|entry| entry.is_live(now))
            .cloned())
    }

    async fn put_cache_entry(&self, entry: &CacheEntry) -> Result<(), StoreError> {
        self.inner.write().await.cache.insert(
            (entry.module_id.clone(), entry.cache_key.clone()),
            entry.clone(),
        );
        Ok(())
    }

    async fn delete_expired_cache(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut inner = self.inner.write().await;
        let before = inner.cache.len();
        inner.cache.retain(|_, entry| entry.is_live(now));
        Ok((before - inner.cache.len()) as u64)
    }

    async fn clear_cache(&self, module_id: Option<&str>) -> Result<u64, StoreError> {
        let mut inner = self.inner.write().await;
        let before = inner.cache.len();
        match module_id {
            Some(id) => inner.cache.retain(|(module, _), _| module != id),
            None => inner.cache.clear(),
        }
        Ok((before - inner.cache.len()) as u64)
    }

    async fn count_cache_entries(&self, module_id: Option<&str>) -> Result<i64, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .cache
            .keys()
            .filter(|(module, _)| module_id.map_or(true, |id| module == id))
            .count() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::RunStatus;
    use chrono::Duration;
    use serde_json::json;

    fn make_run(module_id: &str) -> RunRecord {
        let now = Utc::now();
        RunRecord {
            id: None,
            module_id: module_id.to_string(),
            started_at: now,
            completed_at: Some(now),
            status: RunStatus::Success,
            results: Some(json!({"ok": true})),
            params: json!({}),
            error: None,
            execution_time_ms: Some(5),
        }
    }

    fn make_entry(module_id: &str, key: &str, ttl_seconds: i64) -> CacheEntry {
        let now = Utc::now();
        CacheEntry {
            module_id: module_id.to_string(),
            cache_key: key.to_string(),
            data: json!({"v": key}),
            created_at: now,
            expires_at: now + Duration::seconds(ttl_seconds),
        }
    }

    #[tokio::test]
    async fn insert_run_assigns_increasing_ids() {
        let store = MemoryStore::default();
        let first = store.insert_run(&make_run("a")).await.unwrap();
        let second = store.insert_run(&make_run("a")).await.unwrap();
        assert!(second > first);
    }

    #[tokio::test]
    async fn run_history_evicts_oldest_when_at_capacity() {
        let store = MemoryStore::new(2);
        store.insert_run(&make_run("a")).await.unwrap();
        store.insert_run(&make_run("b")).await.unwrap();
        store.insert_run(&make_run("c")).await.unwrap();

        let runs = store.recent_runs(None, 10).await.unwrap();
        let ids: Vec<_> = runs.iter().map(|r| r.module_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);
    }

    #[tokio::test]
    async fn recent_runs_filters_by_module() {
        let store = MemoryStore::default();
        store.insert_run(&make_run("a")).await.unwrap();
        store.insert_run(&make_run("b")).await.unwrap();
        store.insert_run(&make_run("a")).await.unwrap();

        assert_eq!(store.recent_runs(Some("a"), 10).await.unwrap().len(), 2);
        assert_eq!(store.count_runs(Some("b")).await.unwrap(), 1);
        assert_eq!(store.count_runs(None).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn put_cache_entry_replaces_existing_key() {
        let store = MemoryStore::default();
        store.put_cache_entry(&make_entry("a", "k", 60)).await.unwrap();
        let mut replacement = make_entry("a", "k", 60);
        replacement.data = json!({"v": "new"});
        store.put_cache_entry(&replacement).await.unwrap();

        assert_eq!(store.count_cache_entries(None).await.unwrap(), 1);
        let hit = store.get_cache_entry("a", "k", Utc::now()).await.unwrap().unwrap();
        assert_eq!(hit.data, json!({"v": "new"}));
    }

    #[tokio::test]
    async fn expired_entry_is_not_returned() {
        let store = MemoryStore::default();
        store.put_cache_entry(&make_entry("a", "k", -1)).await.unwrap();
        assert!(store.get_cache_entry("a", "k", Utc::now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_expired_cache_is_idempotent() {
        let store = MemoryStore::default();
        store.put_cache_entry(&make_entry("a", "old", -10)).await.unwrap();
        store.put_cache_entry(&make_entry("a", "fresh", 60)).await.unwrap();

        assert_eq!(store.delete_expired_cache(Utc::now()).await.unwrap(), 1);
        assert_eq!(store.delete_expired_cache(Utc::now()).await.unwrap(), 0);
        assert_eq!(store.count_cache_entries(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn clear_cache_scopes_to_module() {
        let store = MemoryStore::default();
        store.put_cache_entry(&make_entry("a", "1", 60)).await.unwrap();
        store.put_cache_entry(&make_entry("a", "2", 60)).await.unwrap();
        store.put_cache_entry(&make_entry("b", "1", 60)).await.unwrap();

        assert_eq!(store.clear_cache(Some("a")).await.unwrap(), 2);
        assert_eq!(store.count_cache_entries(Some("b")).await.unwrap(), 1);
        assert_eq!(store.clear_cache(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn save_config_overwrites_previous_value() {
        let store = MemoryStore::default();
        store.save_config(&ModuleConfig::new("a")).await.unwrap();
        store
            .save_config(&ModuleConfig::new("a").with_cache_ttl(5))
            .await
            .unwrap();

        let loaded = store.load_config("a").await.unwrap().unwrap();
        assert_eq!(loaded.cache_ttl_seconds, 5);
        assert_eq!(store.list_configs().await.unwrap().len(), 1);
    }
}
