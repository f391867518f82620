//! SQLite implementation of [`ModuleStore`].
//!
//! All SQL for module configs, the run ledger and the result cache lives
//! here. Run timestamps are stored as RFC 3339 strings; cache timestamps
//! as Unix milliseconds so expiry checks are plain integer comparisons.
//!
//! `sqlx` errors are classified on the way out: SQLITE_BUSY, SQLITE_LOCKED
//! and pool acquire timeouts become [`StoreError::Contention`], everything
//! else [`StoreError::Hard`].

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::modules::{ModuleConfig, RunStatus};
use crate::store::{clamp_limit, CacheEntry, ModuleStore, RunRecord, StoreError};

const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if is_contention(&err) {
            StoreError::contention(err.to_string())
        } else {
            StoreError::hard(err.to_string())
        }
    }
}

/// `true` for the transient "resource locked" class of failures.
pub fn is_contention(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            // Extended result codes keep the primary code in the low byte.
            let locked_code = db
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .map_or(false, |code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED));
            locked_code || db.message().contains("is locked")
        }
        sqlx::Error::PoolTimedOut => true,
        _ => false,
    }
}

/// Repository for reading and writing module state to SQLite.
#[derive(Clone)]
pub struct ModuleRepository {
    pool: SqlitePool,
}

impl ModuleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| StoreError::hard(format!("invalid timestamp '{}': {}", raw, err)))
}

/// SQLite integers are signed; refuse values that would wrap.
fn to_sql_int(field: &str, value: u64) -> Result<i64, StoreError> {
    i64::try_from(value)
        .map_err(|_| StoreError::hard(format!("{} {} exceeds the storable range", field, value)))
}

fn from_sql_int(field: &str, value: i64) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::hard(format!("{} is negative: {}", field, value)))
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| StoreError::hard(format!("invalid millisecond timestamp {}", ms)))
}

fn parse_json(raw: &str) -> Result<Value, StoreError> {
    Ok(serde_json::from_str(raw)?)
}

fn row_to_config(row: &SqliteRow) -> Result<ModuleConfig, StoreError> {
    let params: String = row.try_get("params")?;
    let timeout_seconds: i64 = row.try_get("timeout_seconds")?;
    let cache_ttl_seconds: i64 = row.try_get("cache_ttl_seconds")?;

    Ok(ModuleConfig {
        module_id: row.try_get("module_id")?,
        enabled: row.try_get::<i64, _>("enabled")? != 0,
        schedule: row.try_get("schedule")?,
        alerts_enabled: row.try_get::<i64, _>("alerts_enabled")? != 0,
        timeout_seconds: from_sql_int("timeout_seconds", timeout_seconds)?,
        cache_ttl_seconds: from_sql_int("cache_ttl_seconds", cache_ttl_seconds)?,
        params: serde_json::from_str(&params)?,
    })
}

fn row_to_run(row: &SqliteRow) -> Result<RunRecord, StoreError> {
    let started_at: String = row.try_get("started_at")?;
    let completed_at: Option<String> = row.try_get("completed_at")?;
    let status: String = row.try_get("status")?;
    let results: Option<String> = row.try_get("results")?;
    let params: String = row.try_get("params")?;
    let execution_time_ms: Option<i64> = row.try_get("execution_time_ms")?;

    Ok(RunRecord {
        id: Some(row.try_get("id")?),
        module_id: row.try_get("module_id")?,
        started_at: parse_timestamp(&started_at)?,
        completed_at: completed_at.as_deref().map(parse_timestamp).transpose()?,
        status: status.parse::<RunStatus>().map_err(StoreError::hard)?,
        results: results.as_deref().map(parse_json).transpose()?,
        params: parse_json(&params)?,
        error: row.try_get("error")?,
        execution_time_ms: execution_time_ms
            .map(|ms| from_sql_int("execution_time_ms", ms))
            .transpose()?,
    })
}

fn row_to_cache_entry(row: &SqliteRow) -> Result<CacheEntry, StoreError> {
    let data: String = row.try_get("data")?;
    Ok(CacheEntry {
        module_id: row.try_get("module_id")?,
        cache_key: row.try_get("cache_key")?,
        data: parse_json(&data)?,
        created_at: from_millis(row.try_get("created_at")?)?,
        expires_at: from_millis(row.try_get("expires_at")?)?,
    })
}

#[async_trait]
impl ModuleStore for ModuleRepository {
    // ---- Module configs ----

    async fn load_config(&self, module_id: &str) -> Result<Option<ModuleConfig>, StoreError> {
        let row = sqlx::query(
            "SELECT module_id, enabled, schedule, alerts_enabled, timeout_seconds,
                    cache_ttl_seconds, params
             FROM module_configs
             WHERE module_id = ?",
        )
        .bind(module_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_config).transpose()
    }

    async fn save_config(&self, config: &ModuleConfig) -> Result<(), StoreError> {
        let params = serde_json::to_string(&config.params)?;
        let timeout_seconds = to_sql_int("timeout_seconds", config.timeout_seconds)?;
        let cache_ttl_seconds = to_sql_int("cache_ttl_seconds", config.cache_ttl_seconds)?;

        sqlx::query(
            "INSERT INTO module_configs
             (module_id, enabled, schedule, alerts_enabled, timeout_seconds, cache_ttl_seconds, params)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (module_id) DO UPDATE SET
                enabled = excluded.enabled,
                schedule = excluded.schedule,
                alerts_enabled = excluded.alerts_enabled,
                timeout_seconds = excluded.timeout_seconds,
                cache_ttl_seconds = excluded.cache_ttl_seconds,
                params = excluded.params,
                updated_at = datetime('now')",
        )
        .bind(&config.module_id)
        .bind(config.enabled as i64)
        .bind(&config.schedule)
        .bind(config.alerts_enabled as i64)
        .bind(timeout_seconds)
        .bind(cache_ttl_seconds)
        .bind(&params)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_configs(&self) -> Result<Vec<ModuleConfig>, StoreError> {
        let rows = sqlx::query(
            "SELECT module_id, enabled, schedule, alerts_enabled, timeout_seconds,
                    cache_ttl_seconds, params
             FROM module_configs
             ORDER BY module_id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_config).collect()
    }

    // ---- Run ledger ----

    async fn insert_run(&self, run: &RunRecord) -> Result<i64, StoreError> {
        let results = run.results.as_ref().map(serde_json::to_string).transpose()?;
        let params = serde_json::to_string(&run.params)?;
        let execution_time_ms = run
            .execution_time_ms
            .map(|ms| to_sql_int("execution_time_ms", ms))
            .transpose()?;

        let result = sqlx::query(
            "INSERT INTO module_runs
             (module_id, started_at, completed_at, status, results, params, error, execution_time_ms)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&run.module_id)
        .bind(format_timestamp(run.started_at))
        .bind(run.completed_at.map(format_timestamp))
        .bind(run.status.as_str())
        .bind(results)
        .bind(params)
        .bind(&run.error)
        .bind(execution_time_ms)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn recent_runs(
        &self,
        module_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<RunRecord>, StoreError> {
        let limit = clamp_limit(limit);

        let rows = match module_id {
            Some(id) => {
                sqlx::query(
                    "SELECT id, module_id, started_at, completed_at, status, results, params,
                            error, execution_time_ms
                     FROM module_runs
                     WHERE module_id = ?
                     ORDER BY id DESC
                     LIMIT ?",
                )
                .bind(id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT id, module_id, started_at, completed_at, status, results, params,
                            error, execution_time_ms
                     FROM module_runs
                     ORDER BY id DESC
                     LIMIT ?",
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(row_to_run).collect()
    }

    async fn count_runs(&self, module_id: Option<&str>) -> Result<i64, StoreError> {
        let row = match module_id {
            Some(id) => {
                sqlx::query("SELECT COUNT(*) AS cnt FROM module_runs WHERE module_id = ?")
                    .bind(id)
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT COUNT(*) AS cnt FROM module_runs")
                    .fetch_one(&self.pool)
                    .await?
            }
        };

        Ok(row.try_get("cnt")?)
    }

    // ---- Result cache ----

    async fn get_cache_entry(
        &self,
        module_id: &str,
        cache_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheEntry>, StoreError> {
        let row = sqlx::query(
            "SELECT module_id, cache_key, data, created_at, expires_at
             FROM cache_entries
             WHERE module_id = ? AND cache_key = ? AND expires_at > ?",
        )
        .bind(module_id)
        .bind(cache_key)
        .bind(now.timestamp_millis())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_cache_entry).transpose()
    }

    async fn put_cache_entry(&self, entry: &CacheEntry) -> Result<(), StoreError> {
        let data = serde_json::to_string(&entry.data)?;

        sqlx::query(
            "INSERT INTO cache_entries (module_id, cache_key, data, created_at, expires_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (module_id, cache_key) DO UPDATE SET
                data = excluded.data,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at",
        )
        .bind(&entry.module_id)
        .bind(&entry.cache_key)
        .bind(&data)
        .bind(entry.created_at.timestamp_millis())
        .bind(entry.expires_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_expired_cache(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE expires_at <= ?")
            .bind(now.timestamp_millis())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn clear_cache(&self, module_id: Option<&str>) -> Result<u64, StoreError> {
        let result = match module_id {
            Some(id) => {
                sqlx::query("DELETE FROM cache_entries WHERE module_id = ?")
                    .bind(id)
                    .execute(&self.pool)
                    .await?
            }
            None => sqlx::query("DELETE FROM cache_entries").execute(&self.pool).await?,
        };

        Ok(result.rows_affected())
    }

    async fn count_cache_entries(&self, module_id: Option<&str>) -> Result<i64, StoreError> {
        let row = match module_id {
            Some(id) => {
                sqlx::query("SELECT COUNT(*) AS cnt FROM cache_entries WHERE module_id = ?")
                    .bind(id)
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT COUNT(*) AS cnt FROM cache_entries")
                    .fetch_one(&self.pool)
                    .await?
            }
        };

        Ok(row.try_get("cnt")?)
    }
}


#[cfg(test)]
mod contention_tests {
    use super::*;
    use std::borrow::Cow;
    use std::fmt;

    use sqlx::error::{DatabaseError, ErrorKind};

    #[derive(Debug)]
    struct FakeDbError {
        code: &'static str,
        message: &'static str,
    }

    impl fmt::Display for FakeDbError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.message)
        }
    }

    impl std::error::Error for FakeDbError {}

    impl DatabaseError for FakeDbError {
        fn message(&self) -> &str {
            self.message
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            Some(Cow::Borrowed(self.code))
        }

        fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::Other
        }
    }

    fn db_error(code: &'static str, message: &'static str) -> sqlx::Error {
        sqlx::Error::Database(Box::new(FakeDbError { code, message }))
    }

    #[test]
    fn busy_is_contention() {
        assert!(is_contention(&db_error("5", "database is locked")));
    }

    #[test]
    fn extended_busy_code_is_contention() {
        // SQLITE_BUSY_SNAPSHOT
        assert!(is_contention(&db_error("517", "busy")));
    }

    #[test]
    fn locked_table_is_contention() {
        assert!(is_contention(&db_error("6", "database table is locked")));
    }

    #[test]
    fn constraint_violation_is_hard() {
        let err: StoreError = db_error("2067", "UNIQUE constraint failed").into();
        assert!(!err.is_contention());
    }

    #[test]
    fn pool_timeout_is_contention() {
        let err: StoreError = sqlx::Error::PoolTimedOut.into();
        assert!(err.is_contention());
    }

    #[test]
    fn row_not_found_is_hard() {
        let err: StoreError = sqlx::Error::RowNotFound.into();
        assert!(!err.is_contention());
    }
}
