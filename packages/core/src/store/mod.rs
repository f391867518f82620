//! Persistent store interface.
//!
//! [`ModuleStore`] is the single shared mutable resource of the engine. It
//! holds operator-owned module configs, the append-only run ledger and the
//! result cache. Every method is one short transactional scope; none of them
//! is ever held across a module's computation.
//!
//! Failures are tagged: [`StoreError::Contention`] marks a transient
//! "resource locked" condition that callers may retry, while
//! [`StoreError::Hard`] covers everything else.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::modules::{ModuleConfig, RunStatus};

pub use memory::MemoryStore;

/// Upper bound for run history queries.
pub const MAX_RUN_QUERY_LIMIT: i64 = 100;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store contention: {message}")]
    Contention { message: String },

    #[error("Store failure: {message}")]
    Hard { message: String },
}

impl StoreError {
    pub fn contention(message: impl Into<String>) -> Self {
        Self::Contention {
            message: message.into(),
        }
    }

    pub fn hard(message: impl Into<String>) -> Self {
        Self::Hard {
            message: message.into(),
        }
    }

    pub fn is_contention(&self) -> bool {
        matches!(self, StoreError::Contention { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::hard(format!("serialisation: {}", err))
    }
}

/// One durable record of a single module execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: Option<i64>,
    pub module_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub results: Option<Value>,
    pub params: Value,
    pub error: Option<String>,
    pub execution_time_ms: Option<u64>,
}

/// A cached successful result for one `(module_id, cache_key)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub module_id: String,
    pub cache_key: String,
    pub data: Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

#[async_trait]
pub trait ModuleStore: Send + Sync {
    async fn load_config(&self, module_id: &str) -> Result<Option<ModuleConfig>, StoreError>;

    /// Insert or replace the config for `config.module_id`.
    async fn save_config(&self, config: &ModuleConfig) -> Result<(), StoreError>;

    async fn list_configs(&self) -> Result<Vec<ModuleConfig>, StoreError>;

    /// Append a run to the ledger. Returns the new row id.
    async fn insert_run(&self, run: &RunRecord) -> Result<i64, StoreError>;

    /// Newest runs first; `limit` is clamped to `1..=MAX_RUN_QUERY_LIMIT`.
    async fn recent_runs(
        &self,
        module_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<RunRecord>, StoreError>;

    async fn count_runs(&self, module_id: Option<&str>) -> Result<i64, StoreError>;

    /// Return the entry only when `expires_at > now`.
    async fn get_cache_entry(
        &self,
        module_id: &str,
        cache_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheEntry>, StoreError>;

    /// Insert or replace the entry for `(module_id, cache_key)`.
    async fn put_cache_entry(&self, entry: &CacheEntry) -> Result<(), StoreError>;

    /// Delete every entry with `expires_at <= now`. Returns rows deleted.
    async fn delete_expired_cache(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Delete all entries, or only those of `module_id`. Returns rows deleted.
    async fn clear_cache(&self, module_id: Option<&str>) -> Result<u64, StoreError>;

    async fn count_cache_entries(&self, module_id: Option<&str>) -> Result<i64, StoreError>;
}

pub(crate) fn clamp_limit(limit: i64) -> i64 {
    limit.clamp(1, MAX_RUN_QUERY_LIMIT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn contention_is_distinguished_from_hard_failures() {
        assert!(StoreError::contention("database is locked").is_contention());
        assert!(!StoreError::hard("no such table").is_contention());
    }

    #[test]
    fn cache_entry_expiring_now_is_not_live() {
        let now = Utc::now();
        let entry = CacheEntry {
            module_id: "x".into(),
            cache_key: "k".into(),
            data: Value::Null,
            created_at: now - Duration::seconds(60),
            expires_at: now,
        };
        assert!(!entry.is_live(now));
        assert!(entry.is_live(now - Duration::milliseconds(1)));
    }

    #[test]
    fn clamp_limit_bounds_both_ends() {
        assert_eq!(clamp_limit(0), 1);
        assert_eq!(clamp_limit(999), MAX_RUN_QUERY_LIMIT);
        assert_eq!(clamp_limit(20), 20);
    }
}
