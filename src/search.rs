//! Search engine: cache → quota → dual-path read → audit.
//!
//! # Algorithm
//!
//! 1. Reject a caller with no user id. Clamp pagination.
//! 2. Compute the normalized key for the filter and clamped page.
//! 3. If the caller's device slot holds the same key with a non-zero total,
//!    return the stored rows. No quota check, no backend read, no audit.
//! 4. Check today's quota (reference timezone). Exhausted → error before any
//!    backend access.
//! 5. Build the predicate and run rows + count concurrently.
//! 6. Append an audit entry, overwrite the device slot, and charge one
//!    search if the total is non-zero. These writes are best-effort: a
//!    failure is logged and the computed result is still returned.
//!
//! A backend failure in step 5 returns before step 6, so failed searches
//! leave the cache, the quota and the audit log untouched.

use std::sync::Arc;
use std::time::Duration;

use chrono_tz::Tz;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::analytics::ContactReader;
use crate::audit::{HistoryPage, NewLogEntry, SearchLog};
use crate::cache::{CacheEntry, SearchCache};
use crate::config::SearchConfig;
use crate::error::{SearchError, SearchResult};
use crate::executor::{fetch_rows_and_total, Deadlines};
use crate::filter::{Page, SearchFilter};
use crate::models::ContactRecord;
use crate::predicate::Predicate;
use crate::quota::{QuotaLedger, QuotaStatus};

/// Identity of the caller, as supplied by the authenticating layer.
#[derive(Debug, Clone, Default)]
pub struct Caller {
    pub user_id: String,
    pub device_fingerprint: String,
    pub ip_address: String,
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub rows: Vec<ContactRecord>,
    pub total: u64,
    #[serde(skip)]
    pub cached: bool,
}

/// The device's most recent search, or an empty result if none is stored.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LastSearch {
    pub rows: Vec<ContactRecord>,
    pub total: i64,
    pub filter: Option<SearchFilter>,
}

#[derive(Clone)]
pub struct SearchEngine {
    reader: Arc<dyn ContactReader>,
    cache: SearchCache,
    quota: QuotaLedger,
    log: SearchLog,
    config: SearchConfig,
}

impl SearchEngine {
    pub fn new(
        reader: Arc<dyn ContactReader>,
        pool: SqlitePool,
        config: SearchConfig,
    ) -> anyhow::Result<Self> {
        let tz: Tz = config.tz()?;
        Ok(Self {
            reader,
            cache: SearchCache::new(pool.clone()),
            quota: QuotaLedger::new(pool.clone(), tz, config.default_daily_limit),
            log: SearchLog::new(pool),
            config,
        })
    }

    pub fn quota(&self) -> &QuotaLedger {
        &self.quota
    }

    /// Parses `filter_json` and runs [`search`](Self::search).
    pub async fn search_json(
        &self,
        caller: &Caller,
        filter_json: &str,
        row_timeout: Option<Duration>,
    ) -> SearchResult<SearchOutcome> {
        let filter: SearchFilter = serde_json::from_str(filter_json)?;
        self.search(caller, &filter, row_timeout).await
    }

    /// `row_timeout` overrides the configured row-path deadline.
    pub async fn search(
        &self,
        caller: &Caller,
        filter: &SearchFilter,
        row_timeout: Option<Duration>,
    ) -> SearchResult<SearchOutcome> {
        let user_id = caller.user_id.trim();
        if user_id.is_empty() {
            return Err(SearchError::Validation("missing user id".to_string()));
        }
        let device = caller.device_fingerprint.as_str();

        let page = Page::clamp(
            filter.page,
            filter.page_size,
            self.config.default_page_size,
            self.config.max_page_size,
        );
        let key = filter.normalized_key(page);

        if let Some(hit) = self.cached(user_id, device, &key).await? {
            tracing::debug!(user_id, total = hit.total, "search served from cache");
            return Ok(hit);
        }

        let day = self.quota.today();
        let status = self
            .quota
            .status(user_id, &day)
            .await
            .map_err(SearchError::store)?;
        if status.exhausted() {
            tracing::info!(user_id, used = status.used, limit = status.limit, "daily search limit reached");
            return Err(SearchError::QuotaExceeded {
                used: status.used,
                limit: status.limit,
            });
        }

        let predicate = Predicate::build(filter, filter.combinator());
        let deadlines = Deadlines {
            rows: row_timeout.unwrap_or_else(|| self.config.row_timeout()),
            count: self.config.count_timeout(),
        };
        let (rows, total) =
            fetch_rows_and_total(self.reader.as_ref(), &predicate, page, deadlines).await?;

        tracing::info!(
            user_id,
            page = page.page,
            size = page.size,
            rows = rows.len(),
            total,
            "search executed"
        );

        self.record(caller, user_id, filter, &key, &rows, total, &day)
            .await;

        Ok(SearchOutcome {
            rows,
            total,
            cached: false,
        })
    }

    async fn cached(
        &self,
        user_id: &str,
        device: &str,
        key: &str,
    ) -> SearchResult<Option<SearchOutcome>> {
        let entry = self
            .cache
            .get(user_id, device)
            .await
            .map_err(SearchError::store)?;
        let Some(entry) = entry else {
            return Ok(None);
        };
        if entry.normalized_key != key || entry.total_results <= 0 {
            return Ok(None);
        }
        match entry.rows() {
            Ok(rows) => Ok(Some(SearchOutcome {
                rows,
                total: entry.total_results as u64,
                cached: true,
            })),
            Err(e) => {
                tracing::warn!(user_id, error = %e, "unreadable cache snapshot; treating as miss");
                Ok(None)
            }
        }
    }

    /// Post-search writes. Each is independent and logged on failure.
    #[allow(clippy::too_many_arguments)]
    async fn record(
        &self,
        caller: &Caller,
        user_id: &str,
        filter: &SearchFilter,
        key: &str,
        rows: &[ContactRecord],
        total: u64,
        day: &str,
    ) {
        let snapshot = match serde_json::to_string(rows) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "could not serialize result snapshot");
                return;
            }
        };
        let params = serde_json::to_string(filter).unwrap_or_else(|_| "{}".to_string());
        let total = total as i64;

        let entry = NewLogEntry {
            user_id,
            device_fingerprint: &caller.device_fingerprint,
            ip_address: &caller.ip_address,
            user_agent: &caller.user_agent,
            params: &params,
            normalized_key: key,
            total_results: total,
            snapshot: &snapshot,
        };
        if let Err(e) = self.log.append(&entry).await {
            tracing::warn!(user_id, error = %e, "search log write failed");
        }

        let slot = CacheEntry {
            normalized_key: key.to_string(),
            snapshot,
            total_results: total,
            params,
            created_at: chrono::Utc::now().timestamp(),
        };
        if let Err(e) = self
            .cache
            .put(user_id, &caller.device_fingerprint, &slot)
            .await
        {
            tracing::warn!(user_id, error = %e, "search cache write failed");
        }

        if total > 0 {
            if let Err(e) = self.quota.increment(user_id, day).await {
                tracing::warn!(user_id, error = %e, "quota increment failed");
            }
        }
    }

    pub async fn last_search(&self, user_id: &str, device: &str) -> SearchResult<LastSearch> {
        let entry = self
            .cache
            .get(user_id, device)
            .await
            .map_err(SearchError::store)?;
        let Some(entry) = entry else {
            return Ok(LastSearch::default());
        };
        let rows = match entry.rows() {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "unreadable cache snapshot");
                return Ok(LastSearch::default());
            }
        };
        Ok(LastSearch {
            rows,
            total: entry.total_results,
            filter: serde_json::from_str(&entry.params).ok(),
        })
    }

    pub async fn history(&self, user_id: &str, page: i64, limit: i64) -> SearchResult<HistoryPage> {
        if user_id.trim().is_empty() {
            return Err(SearchError::Validation("missing user id".to_string()));
        }
        self.log
            .list_for_user(user_id, page, limit)
            .await
            .map_err(SearchError::store)
    }

    pub async fn quota_status(&self, user_id: &str) -> SearchResult<QuotaStatus> {
        self.quota
            .status(user_id, &self.quota.today())
            .await
            .map_err(SearchError::store)
    }
}
