//! Per-user daily search quota.
//!
//! Days are calendar days in a fixed reference timezone, so every caller
//! rolls over at the same instant regardless of where the server runs.

use anyhow::Result;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use sqlx::SqlitePool;

/// `YYYY-MM-DD` of `now` in `tz`.
pub fn day_for(now: DateTime<Utc>, tz: Tz) -> String {
    now.with_timezone(&tz).format("%Y-%m-%d").to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaStatus {
    pub day: String,
    pub used: i64,
    pub limit: i64,
}

impl QuotaStatus {
    pub fn exhausted(&self) -> bool {
        self.used >= self.limit
    }
}

#[derive(Clone)]
pub struct QuotaLedger {
    pool: SqlitePool,
    tz: Tz,
    default_limit: i64,
}

impl QuotaLedger {
    pub fn new(pool: SqlitePool, tz: Tz, default_limit: i64) -> Self {
        Self {
            pool,
            tz,
            default_limit,
        }
    }

    pub fn today(&self) -> String {
        day_for(Utc::now(), self.tz)
    }

    pub async fn used(&self, user_id: &str, day: &str) -> Result<i64> {
        let used: Option<i64> = sqlx::query_scalar(
            "SELECT search_count FROM user_daily_usage WHERE user_id = ? AND usage_date = ?",
        )
        .bind(user_id)
        .bind(day)
        .fetch_optional(&self.pool)
        .await?;
        Ok(used.unwrap_or(0))
    }

    /// The user's own limit, or the configured default.
    pub async fn limit_for(&self, user_id: &str) -> Result<i64> {
        let limit: Option<i64> =
            sqlx::query_scalar("SELECT daily_search_limit FROM user_quotas WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(limit.unwrap_or(self.default_limit))
    }

    pub async fn set_daily_limit(&self, user_id: &str, limit: i64) -> Result<()> {
        if limit < 0 {
            anyhow::bail!("daily limit must be >= 0");
        }
        sqlx::query(
            "INSERT INTO user_quotas (user_id, daily_search_limit) VALUES (?, ?) \
             ON CONFLICT(user_id) DO UPDATE SET daily_search_limit = excluded.daily_search_limit",
        )
        .bind(user_id)
        .bind(limit)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn status(&self, user_id: &str, day: &str) -> Result<QuotaStatus> {
        Ok(QuotaStatus {
            day: day.to_string(),
            used: self.used(user_id, day).await?,
            limit: self.limit_for(user_id).await?,
        })
    }

    /// Adds one search to (user, day).
    pub async fn increment(&self, user_id: &str, day: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO user_daily_usage (user_id, usage_date, search_count) VALUES (?, ?, 1) \
             ON CONFLICT(user_id, usage_date) DO UPDATE SET search_count = search_count + 1",
        )
        .bind(user_id)
        .bind(day)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
