use anyhow::Result;
use sqlx::SqlitePool;

/// Creates the control-plane tables. Safe to run repeatedly.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Upload lifecycle rows
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS uploads (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            original_filename TEXT NOT NULL,
            safe_name TEXT NOT NULL,
            serial_number INTEGER,
            status TEXT NOT NULL DEFAULT 'uploaded',
            size_bytes INTEGER NOT NULL,
            sha256 TEXT NOT NULL,
            row_count INTEGER,
            processed_rows INTEGER NOT NULL DEFAULT 0,
            progress_pct REAL NOT NULL DEFAULT 0,
            error TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Per-user daily limits; users without a row get the configured default
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_quotas (
            user_id TEXT PRIMARY KEY,
            daily_search_limit INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_daily_usage (
            user_id TEXT NOT NULL,
            usage_date TEXT NOT NULL,
            search_count INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (user_id, usage_date)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Last search per device
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_device_search_cache (
            user_id TEXT NOT NULL,
            device_fingerprint TEXT NOT NULL,
            normalized_key TEXT NOT NULL,
            snapshot TEXT NOT NULL,
            total_results INTEGER NOT NULL,
            params TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (user_id, device_fingerprint)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_search_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            device_fingerprint TEXT NOT NULL,
            ip_address TEXT NOT NULL,
            user_agent TEXT NOT NULL,
            params TEXT NOT NULL,
            normalized_key TEXT NOT NULL,
            total_results INTEGER NOT NULL,
            snapshot TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_uploads_status ON uploads(status)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_search_logs_user ON user_search_logs(user_id, created_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
