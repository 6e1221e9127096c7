//! The persistent fingerprint → artifact store. Reads are best-effort (any
//! failure is a miss), writes are durable before the call returns. The
//! fingerprint schemes are load-bearing: changing them silently zeroes the
//! hit rate across upgrades.

use std::time::Duration;

use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::Row;
use thiserror::Error;
use tracing::{debug, warn};

use crate::db::sqlite::SqlDb;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Advisory metadata stored next to each artifact. The browser collaborator
/// reads it; retrieval never does.
#[derive(Debug, Clone)]
pub struct CacheMetadata {
    pub prompt_name: String,
    pub prompt_content_hash: String,
    pub model: String,
    pub provider: String,
}

/// Fingerprint for a per-symbol compression artifact. The keyless form is
/// the historical scheme and must stay byte-identical; contexts that carry
/// extracted keys get a digest suffix so the key-aware re-summaries do not
/// collide with the base entries.
pub fn symbol_fingerprint(
    name: &str,
    file_path: &str,
    start_line: u32,
    level: u8,
    available_keys: &[String],
) -> String {
    let base = format!("optimization_{name}_{file_path}_{start_line}_{level}");
    if available_keys.is_empty() {
        return base;
    }
    let mut hasher = Sha256::new();
    hasher.update(available_keys.join("|").as_bytes());
    let digest = hasher.finalize();
    let hex = digest
        .iter()
        .take(4)
        .map(|byte| format!("{byte:02x}"))
        .collect::<String>();
    format!("{base}_{hex}")
}

/// Fingerprint for a per-level key extraction. Order-sensitive on purpose:
/// the digest covers the pipe-joined concatenation, so a different summary
/// order is a different key.
pub fn key_fingerprint(level: u8, summaries: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(summaries.join("|").as_bytes());
    let digest = hasher.finalize();
    let hex = digest
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<String>();
    format!("key_L{level}_{}", &hex[..16])
}

pub struct CompressionCache {
    sqlite: SqlDb,
}

impl CompressionCache {
    pub fn new(sqlite: SqlDb) -> Self {
        Self { sqlite }
    }

    /// Constant-time idempotent read. Expired rows, corrupt rows and plain
    /// I/O failures all come back as a miss; the pipeline recomputes.
    pub async fn try_get(&self, key: &str) -> Option<String> {
        let row = sqlx::query("SELECT value, expires_at FROM compression_cache WHERE key = ?")
            .bind(key)
            .fetch_optional(self.sqlite.as_ref())
            .await;
        let row = match row {
            Ok(row) => row?,
            Err(err) => {
                warn!(?err, %key, "cache read failed, treating as miss");
                return None;
            }
        };
        let expires_at: i64 = match row.try_get("expires_at") {
            Ok(expires_at) => expires_at,
            Err(err) => {
                warn!(?err, %key, "corrupt cache row, treating as miss");
                return None;
            }
        };
        if expires_at <= Utc::now().timestamp() {
            debug!(%key, "cache entry expired");
            return None;
        }
        match row.try_get::<String, _>("value") {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(?err, %key, "corrupt cache row, treating as miss");
                None
            }
        }
    }

    /// Durable write; overwrites any previous artifact under the same key.
    pub async fn set(
        &self,
        key: &str,
        artifact: &str,
        ttl: Duration,
        metadata: CacheMetadata,
    ) -> Result<(), CacheError> {
        let now = Utc::now().timestamp();
        let expires_at = now + ttl.as_secs() as i64;
        sqlx::query(
            "INSERT OR REPLACE INTO compression_cache \
             (key, value, created_at, expires_at, prompt_name, prompt_content_hash, model, provider) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(key)
        .bind(artifact)
        .bind(now)
        .bind(expires_at)
        .bind(&metadata.prompt_name)
        .bind(&metadata.prompt_content_hash)
        .bind(&metadata.model)
        .bind(&metadata.provider)
        .execute(self.sqlite.as_ref())
        .await?;
        Ok(())
    }

    /// Remove every key matching the glob-like pattern (`*` and `?`
    /// wildcards). Returns how many rows went away.
    pub async fn invalidate_pattern(&self, pattern: &str) -> Result<u64, CacheError> {
        let like = glob_to_like(pattern);
        let result = sqlx::query("DELETE FROM compression_cache WHERE key LIKE ? ESCAPE '\\'")
            .bind(like)
            .execute(self.sqlite.as_ref())
            .await?;
        debug!(%pattern, removed = result.rows_affected(), "cache invalidation");
        Ok(result.rows_affected())
    }

    pub async fn exists(&self, key: &str) -> bool {
        self.try_get(key).await.is_some()
    }

    /// Current payload size in bytes (keys plus artifacts).
    pub async fn size(&self) -> u64 {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(LENGTH(CAST(key AS BLOB)) + LENGTH(CAST(value AS BLOB))), 0) AS bytes \
             FROM compression_cache",
        )
        .fetch_one(self.sqlite.as_ref())
        .await;
        match row.and_then(|row| row.try_get::<i64, _>("bytes")) {
            Ok(bytes) => bytes.max(0) as u64,
            Err(err) => {
                warn!(?err, "cache size query failed");
                0
            }
        }
    }

    /// Drop expired rows and give the file back to the OS.
    pub async fn compact(&self) -> Result<(), CacheError> {
        let now = Utc::now().timestamp();
        sqlx::query("DELETE FROM compression_cache WHERE expires_at <= ?")
            .bind(now)
            .execute(self.sqlite.as_ref())
            .await?;
        sqlx::query("VACUUM").execute(self.sqlite.as_ref()).await?;
        Ok(())
    }

    pub async fn clear(&self) -> Result<(), CacheError> {
        sqlx::query("DELETE FROM compression_cache")
            .execute(self.sqlite.as_ref())
            .await?;
        Ok(())
    }
}

/// Translate the glob-ish invalidation pattern into a LIKE pattern, escaping
/// anything LIKE itself treats as a wildcard.
fn glob_to_like(pattern: &str) -> String {
    let mut like = String::with_capacity(pattern.len());
    for ch in pattern.chars() {
        match ch {
            '%' => like.push_str("\\%"),
            '_' => like.push_str("\\_"),
            '\\' => like.push_str("\\\\"),
            '*' => like.push('%'),
            '?' => like.push('_'),
            other => like.push(other),
        }
    }
    like
}
