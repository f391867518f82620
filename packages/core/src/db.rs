//! SQLite pool construction and schema.

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

/// How long a connection waits on a locked database before reporting busy.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS module_configs (
        module_id         TEXT PRIMARY KEY,
        enabled           INTEGER NOT NULL DEFAULT 1,
        schedule          TEXT,
        alerts_enabled    INTEGER NOT NULL DEFAULT 1,
        timeout_seconds   INTEGER NOT NULL,
        cache_ttl_seconds INTEGER NOT NULL,
        params            TEXT NOT NULL DEFAULT '{}',
        updated_at        TEXT NOT NULL DEFAULT (datetime('now'))
    )",
    "CREATE TABLE IF NOT EXISTS module_runs (
        id                INTEGER PRIMARY KEY AUTOINCREMENT,
        module_id         TEXT NOT NULL,
        started_at        TEXT NOT NULL,
        completed_at      TEXT,
        status            TEXT NOT NULL CHECK (status IN ('success', 'error')),
        results           TEXT,
        params            TEXT NOT NULL DEFAULT '{}',
        error             TEXT,
        execution_time_ms INTEGER
    )",
    "CREATE INDEX IF NOT EXISTS idx_module_runs_module
        ON module_runs (module_id, id)",
    "CREATE TABLE IF NOT EXISTS cache_entries (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        module_id  TEXT NOT NULL,
        cache_key  TEXT NOT NULL,
        data       TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        expires_at INTEGER NOT NULL,
        UNIQUE (module_id, cache_key)
    )",
    "CREATE INDEX IF NOT EXISTS idx_cache_entries_expires
        ON cache_entries (expires_at)",
];

/// Open a pool for `database_url` and make sure the schema exists.
///
/// `sqlite::memory:` gets a single connection that is never recycled, since
/// every new in-memory connection would otherwise see an empty database.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let in_memory = database_url.contains(":memory:");

    let mut options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .busy_timeout(BUSY_TIMEOUT);
    if !in_memory {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }

    let pool_options = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(8)
    };

    let pool = pool_options.connect_with(options).await?;
    apply_schema(&pool).await?;

    tracing::debug!("Database ready at {}", database_url);
    Ok(pool)
}

/// Create all tables and indexes. Safe to run repeatedly.
pub async fn apply_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    for statement in SCHEMA {
        sqlx::query(statement).execute(&mut *tx).await?;
    }
    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Row;

    #[tokio::test]
    async fn create_pool_applies_schema() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        let rows = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .fetch_all(&pool)
            .await
            .unwrap();
        let tables: Vec<String> = rows.iter().map(|r| r.get("name")).collect();

        assert!(tables.contains(&"module_configs".to_string()));
        assert!(tables.contains(&"module_runs".to_string()));
        assert!(tables.contains(&"cache_entries".to_string()));
    }

    #[tokio::test]
    async fn apply_schema_is_idempotent() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        assert!(apply_schema(&pool).await.is_ok());
    }
}
