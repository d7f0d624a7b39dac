//! CLI command bodies. Each prints a human-readable summary to stdout.

use std::path::Path;

use anyhow::{Context, Result};

use crate::analytics::{self, ClickHouseStore};
use crate::config::{AnalyticsBackend, Config};
use crate::db;
use crate::filter::SearchFilter;
use crate::ingest::{AdmissionGate, IngestPipeline};
use crate::migrate;
use crate::search::{Caller, SearchEngine};
use crate::upload::UploadTracker;

/// Creates the control-plane tables and, for ClickHouse, the analytical
/// schema.
pub async fn run_init(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;
    println!("Control-plane database ready: {}", config.db.path.display());

    if config.analytics.backend == AnalyticsBackend::Clickhouse {
        let store = ClickHouseStore::connect(&config.analytics).await?;
        store.ensure_schema().await?;
        println!(
            "Analytical schema ready: {}.contacts (via {})",
            config.analytics.database,
            store.strategy()
        );
    }
    Ok(())
}

/// Submits a local file and waits for its ingestion to finish.
pub async fn run_ingest(config: &Config, path: &Path) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;
    let stores = analytics::open(&config.analytics).await?;

    let tracker = UploadTracker::new(pool);
    let pipeline = IngestPipeline::new(
        tracker.clone(),
        stores.sink,
        AdmissionGate::new(config.ingest.max_concurrency),
        config.ingest.clone(),
    );

    let submission = pipeline.submit_path(path).await?;
    println!("ingest {}", path.display());
    println!("  upload id: {}", submission.upload_id);
    let outcome = submission.task.await.context("ingest task panicked")?;

    let upload = tracker
        .get(submission.upload_id)
        .await?
        .context("upload row disappeared")?;
    println!("  status: {}", upload.status);
    println!("  rows: {}", upload.processed_rows);
    match (&upload.error, &outcome) {
        (Some(err), _) => println!("  error: {}", err),
        (None, Err(e)) => println!("  error: {:#}", e),
        (None, Ok(_)) => {}
    }
    Ok(())
}

pub async fn run_uploads(config: &Config, limit: i64, before: Option<i64>) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;
    let uploads = UploadTracker::new(pool).list(limit, before).await?;

    if uploads.is_empty() {
        println!("No uploads.");
        return Ok(());
    }

    println!(
        "{:<6} {:<11} {:>10} {:>7}  {}",
        "ID", "STATUS", "ROWS", "PCT", "FILE"
    );
    for u in &uploads {
        println!(
            "{:<6} {:<11} {:>10} {:>6.1}%  {}",
            u.id, u.status, u.processed_rows, u.progress_pct, u.original_filename
        );
        if let Some(err) = &u.error {
            println!("       └ {}", err);
        }
    }
    Ok(())
}

async fn engine(config: &Config) -> Result<SearchEngine> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;
    let stores = analytics::open(&config.analytics).await?;
    SearchEngine::new(stores.reader, pool, config.search.clone())
}

pub async fn run_search(config: &Config, caller: Caller, filter: SearchFilter) -> Result<()> {
    let engine = engine(config).await?;
    let outcome = engine.search(&caller, &filter, None).await?;

    println!(
        "{} of {} results{}",
        outcome.rows.len(),
        outcome.total,
        if outcome.cached { " (cached)" } else { "" }
    );
    println!();
    for r in &outcome.rows {
        println!("  {} <{}>", r.name, r.email);
        if !r.company.is_empty() || !r.position.is_empty() {
            println!("    {} @ {}", r.position, r.company);
        }
        if !r.phone.is_empty() {
            println!("    phone: {}", r.phone);
        }
    }
    Ok(())
}

pub async fn run_history(config: &Config, user_id: &str, page: i64, limit: i64) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;
    let log = crate::audit::SearchLog::new(pool);
    let history = log.list_for_user(user_id, page, limit).await?;

    println!(
        "History for {} (page {}, {} total)",
        user_id, history.page, history.total_count
    );
    for e in &history.entries {
        let when = chrono::DateTime::from_timestamp(e.created_at, 0)
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| e.created_at.to_string());
        println!("  {}  {:>6} results  {}", when, e.total_results, e.normalized_key);
    }
    Ok(())
}

pub async fn run_quota(config: &Config, user_id: &str, set: Option<i64>) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;
    let ledger = crate::quota::QuotaLedger::new(
        pool,
        config.search.tz()?,
        config.search.default_daily_limit,
    );

    if let Some(limit) = set {
        ledger.set_daily_limit(user_id, limit).await?;
        println!("Daily limit for {} set to {}.", user_id, limit);
    }

    let status = ledger.status(user_id, &ledger.today()).await?;
    println!(
        "{}: {} of {} searches used on {} ({})",
        user_id, status.used, status.limit, status.day, config.search.timezone
    );
    Ok(())
}

pub async fn run_serve(config: &Config) -> Result<()> {
    crate::server::run_server(config).await
}

