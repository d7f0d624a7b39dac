//! Last-search cache, one slot per (user, device).

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::models::ContactRecord;

/// A stored search result. `snapshot` is the JSON-encoded row list.
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntry {
    pub normalized_key: String,
    pub snapshot: String,
    pub total_results: i64,
    /// Serialized filter that produced the result.
    pub params: String,
    pub created_at: i64,
}

impl CacheEntry {
    pub fn rows(&self) -> serde_json::Result<Vec<ContactRecord>> {
        serde_json::from_str(&self.snapshot)
    }
}

#[derive(Clone)]
pub struct SearchCache {
    pool: SqlitePool,
}

impl SearchCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, user_id: &str, device: &str) -> Result<Option<CacheEntry>> {
        let row = sqlx::query(
            "SELECT normalized_key, snapshot, total_results, params, created_at \
             FROM user_device_search_cache WHERE user_id = ? AND device_fingerprint = ?",
        )
        .bind(user_id)
        .bind(device)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| CacheEntry {
            normalized_key: r.get("normalized_key"),
            snapshot: r.get("snapshot"),
            total_results: r.get("total_results"),
            params: r.get("params"),
            created_at: r.get("created_at"),
        }))
    }

    /// Replaces the slot for (user, device).
    pub async fn put(&self, user_id: &str, device: &str, entry: &CacheEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO user_device_search_cache \
             (user_id, device_fingerprint, normalized_key, snapshot, total_results, params, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(user_id, device_fingerprint) DO UPDATE SET \
             normalized_key = excluded.normalized_key, snapshot = excluded.snapshot, \
             total_results = excluded.total_results, params = excluded.params, \
             created_at = excluded.created_at",
        )
        .bind(user_id)
        .bind(device)
        .bind(&entry.normalized_key)
        .bind(&entry.snapshot)
        .bind(entry.total_results)
        .bind(&entry.params)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
