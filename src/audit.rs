//! Append-only search log and the per-user history view over it.

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::models::SearchLogEntry;

pub const DEFAULT_HISTORY_LIMIT: i64 = 25;
pub const MAX_HISTORY_LIMIT: i64 = 100;

/// Fields of a log entry known before insertion.
#[derive(Debug, Clone)]
pub struct NewLogEntry<'a> {
    pub user_id: &'a str,
    pub device_fingerprint: &'a str,
    pub ip_address: &'a str,
    pub user_agent: &'a str,
    pub params: &'a str,
    pub normalized_key: &'a str,
    pub total_results: i64,
    pub snapshot: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryPage {
    pub entries: Vec<SearchLogEntry>,
    pub total_count: i64,
    pub page: i64,
    pub limit: i64,
}

#[derive(Clone)]
pub struct SearchLog {
    pool: SqlitePool,
}

impl SearchLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn append(&self, entry: &NewLogEntry<'_>) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO user_search_logs (user_id, device_fingerprint, ip_address, user_agent, \
             params, normalized_key, total_results, snapshot, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.user_id)
        .bind(entry.device_fingerprint)
        .bind(entry.ip_address)
        .bind(entry.user_agent)
        .bind(entry.params)
        .bind(entry.normalized_key)
        .bind(entry.total_results)
        .bind(entry.snapshot)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// The user's entries, newest first. `page` below 1 becomes 1; `limit`
    /// outside `1..=100` becomes 25.
    pub async fn list_for_user(&self, user_id: &str, page: i64, limit: i64) -> Result<HistoryPage> {
        let page = page.max(1);
        let limit = if limit <= 0 || limit > MAX_HISTORY_LIMIT {
            DEFAULT_HISTORY_LIMIT
        } else {
            limit
        };

        let total_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM user_search_logs WHERE user_id = ?")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;

        let rows = sqlx::query(
            "SELECT id, user_id, device_fingerprint, ip_address, user_agent, params, \
             normalized_key, total_results, created_at FROM user_search_logs \
             WHERE user_id = ? ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
        )
        .bind(user_id)
        .bind(limit)
        .bind((page - 1) * limit)
        .fetch_all(&self.pool)
        .await?;

        let entries = rows
            .iter()
            .map(|r| SearchLogEntry {
                id: r.get("id"),
                user_id: r.get("user_id"),
                device_fingerprint: r.get("device_fingerprint"),
                ip_address: r.get("ip_address"),
                user_agent: r.get("user_agent"),
                params: r.get("params"),
                normalized_key: r.get("normalized_key"),
                total_results: r.get("total_results"),
                created_at: r.get("created_at"),
            })
            .collect();

        Ok(HistoryPage {
            entries,
            total_count,
            page,
            limit,
        })
    }
}
