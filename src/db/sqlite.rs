//! Single-file sqlite store which backs the compression cache. The pool is
//! shared by every component that needs durability.

use std::path::Path;
use std::sync::Arc;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;

pub type SqlDb = Arc<SqlitePool>;

pub async fn init_sqlite_db(data_dir: &Path) -> Result<SqlDb, sqlx::Error> {
    tokio::fs::create_dir_all(data_dir).await.ok();
    let db_path = data_dir.join("thaum.db");

    let options = SqliteConnectOptions::new()
        .filename(&db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        // writes must be durable before callers rely on reading them back
        .synchronous(SqliteSynchronous::Normal);

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS compression_cache ( \
            key TEXT PRIMARY KEY, \
            value TEXT NOT NULL, \
            created_at INTEGER NOT NULL, \
            expires_at INTEGER NOT NULL, \
            prompt_name TEXT, \
            prompt_content_hash TEXT, \
            model TEXT, \
            provider TEXT \
        )",
    )
    .execute(&pool)
    .await?;

    Ok(Arc::new(pool))
}

/// An in-memory database with the same schema, for tests and throwaway runs.
pub async fn init_memory_db() -> Result<SqlDb, sqlx::Error> {
    let options: SqliteConnectOptions = "sqlite::memory:".parse().expect("valid in-memory sqlite url");
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS compression_cache ( \
            key TEXT PRIMARY KEY, \
            value TEXT NOT NULL, \
            created_at INTEGER NOT NULL, \
            expires_at INTEGER NOT NULL, \
            prompt_name TEXT, \
            prompt_content_hash TEXT, \
            model TEXT, \
            provider TEXT \
        )",
    )
    .execute(&pool)
    .await?;
    Ok(Arc::new(pool))
}
