//! Upload lifecycle persistence.
//!
//! [`UploadTracker`] is the only writer of the `uploads` table. Status moves
//! are compare-and-set updates (`WHERE id = ? AND status = ?`), so two
//! writers racing on one upload cannot both win and a terminal upload can
//! never be reopened.

use anyhow::{bail, Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::models::{Upload, UploadStatus};

/// Error text stored on uploads found mid-ingest at startup.
pub const INTERRUPTED: &str = "interrupted before completion";

/// Hard cap on `list` page size.
pub const MAX_LIST_LIMIT: i64 = 200;

/// Attributes known when an upload is received.
#[derive(Debug, Clone)]
pub struct NewUpload {
    pub original_filename: String,
    pub safe_name: String,
    pub serial_number: Option<i64>,
    pub size_bytes: i64,
    pub sha256: String,
}

#[derive(Clone)]
pub struct UploadTracker {
    pool: SqlitePool,
}

const COLUMNS: &str = "id, original_filename, safe_name, serial_number, status, size_bytes, sha256, \
     row_count, processed_rows, progress_pct, error, created_at, updated_at";

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn row_to_upload(row: &SqliteRow) -> Result<Upload> {
    let status: String = row.get("status");
    Ok(Upload {
        id: row.get("id"),
        original_filename: row.get("original_filename"),
        safe_name: row.get("safe_name"),
        serial_number: row.get("serial_number"),
        status: status.parse()?,
        size_bytes: row.get("size_bytes"),
        sha256: row.get("sha256"),
        row_count: row.get("row_count"),
        processed_rows: row.get("processed_rows"),
        progress_pct: row.get("progress_pct"),
        error: row.get("error"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

impl UploadTracker {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts a row in `uploaded` and returns its id.
    pub async fn create(&self, new: &NewUpload) -> Result<i64> {
        let ts = now();
        let result = sqlx::query(
            "INSERT INTO uploads (original_filename, safe_name, serial_number, status, size_bytes, sha256, \
             processed_rows, progress_pct, created_at, updated_at) \
             VALUES (?, ?, ?, 'uploaded', ?, ?, 0, 0, ?, ?)",
        )
        .bind(&new.original_filename)
        .bind(&new.safe_name)
        .bind(new.serial_number)
        .bind(new.size_bytes)
        .bind(&new.sha256)
        .bind(ts)
        .bind(ts)
        .execute(&self.pool)
        .await
        .context("inserting upload row")?;

        Ok(result.last_insert_rowid())
    }

    /// `uploaded -> processing`, resetting progress.
    pub async fn begin(&self, id: i64) -> Result<()> {
        let next = UploadStatus::Uploaded.transition(UploadStatus::Processing)?;
        let affected = sqlx::query(
            "UPDATE uploads SET status = ?, processed_rows = 0, progress_pct = 0, updated_at = ? \
             WHERE id = ? AND status = ?",
        )
        .bind(next.as_str())
        .bind(now())
        .bind(id)
        .bind(UploadStatus::Uploaded.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            self.reject(id, UploadStatus::Uploaded).await?;
        }
        Ok(())
    }

    /// Writes interim progress. `processed_rows` never moves backwards.
    pub async fn record_progress(&self, id: i64, processed_rows: i64, pct: f64) -> Result<()> {
        sqlx::query(
            "UPDATE uploads SET processed_rows = MAX(processed_rows, ?), progress_pct = ?, updated_at = ? \
             WHERE id = ? AND status = 'processing'",
        )
        .bind(processed_rows)
        .bind(pct.clamp(0.0, 100.0))
        .bind(now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// `processing -> succeeded` with the final row count.
    pub async fn succeed(&self, id: i64, inserted: i64) -> Result<()> {
        let next = UploadStatus::Processing.transition(UploadStatus::Succeeded)?;
        let affected = sqlx::query(
            "UPDATE uploads SET status = ?, row_count = ?, processed_rows = ?, progress_pct = 100, \
             error = NULL, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(next.as_str())
        .bind(inserted)
        .bind(inserted)
        .bind(now())
        .bind(id)
        .bind(UploadStatus::Processing.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            self.reject(id, UploadStatus::Processing).await?;
        }
        Ok(())
    }

    /// `processing -> failed` with the error text.
    pub async fn fail(&self, id: i64, error: &str) -> Result<()> {
        let next = UploadStatus::Processing.transition(UploadStatus::Failed)?;
        let affected = sqlx::query(
            "UPDATE uploads SET status = ?, error = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(next.as_str())
        .bind(error)
        .bind(now())
        .bind(id)
        .bind(UploadStatus::Processing.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            self.reject(id, UploadStatus::Processing).await?;
        }
        Ok(())
    }

    /// Marks every `processing` upload as failed. Returns how many moved.
    pub async fn recover_interrupted(&self) -> Result<u64> {
        let affected = sqlx::query(
            "UPDATE uploads SET status = 'failed', error = ?, updated_at = ? WHERE status = 'processing'",
        )
        .bind(INTERRUPTED)
        .bind(now())
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(affected)
    }

    pub async fn get(&self, id: i64) -> Result<Option<Upload>> {
        let row = sqlx::query(&format!("SELECT {} FROM uploads WHERE id = ?", COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_upload).transpose()
    }

    /// Newest first. `before_id` pages backwards; `limit` is clamped to
    /// `1..=200`.
    pub async fn list(&self, limit: i64, before_id: Option<i64>) -> Result<Vec<Upload>> {
        let limit = limit.clamp(1, MAX_LIST_LIMIT);
        let rows = sqlx::query(&format!(
            "SELECT {} FROM uploads WHERE (? IS NULL OR id < ?) ORDER BY id DESC LIMIT ?",
            COLUMNS
        ))
        .bind(before_id)
        .bind(before_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_upload).collect()
    }

    /// Turns a lost compare-and-set into a descriptive error.
    async fn reject(&self, id: i64, expected: UploadStatus) -> Result<()> {
        match self.get(id).await? {
            None => bail!("upload {} not found", id),
            Some(u) => bail!("upload {} is {}, expected {}", id, u.status, expected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, migrate};
    use tempfile::TempDir;

    async fn tracker() -> (TempDir, UploadTracker) {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect_path(&tmp.path().join("lv.sqlite")).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        (tmp, UploadTracker::new(pool))
    }

    fn new_upload(name: &str) -> NewUpload {
        NewUpload {
            original_filename: name.to_string(),
            safe_name: format!("1_{}", name),
            serial_number: Some(3),
            size_bytes: 42,
            sha256: "ab".repeat(32),
        }
    }

    #[tokio::test]
    async fn lifecycle_moves_forward_only() {
        let (_tmp, t) = tracker().await;
        let id = t.create(&new_upload("a.csv")).await.unwrap();
        assert_eq!(t.get(id).await.unwrap().unwrap().status, UploadStatus::Uploaded);

        // Cannot finish before processing.
        assert!(t.succeed(id, 1).await.is_err());

        t.begin(id).await.unwrap();
        t.record_progress(id, 10, 50.0).await.unwrap();
        t.record_progress(id, 4, 20.0).await.unwrap();
        let u = t.get(id).await.unwrap().unwrap();
        assert_eq!(u.processed_rows, 10);

        t.succeed(id, 12).await.unwrap();
        let u = t.get(id).await.unwrap().unwrap();
        assert_eq!(u.status, UploadStatus::Succeeded);
        assert_eq!(u.row_count, Some(12));
        assert_eq!(u.progress_pct, 100.0);

        let err = t.begin(id).await.unwrap_err();
        assert!(err.to_string().contains("is succeeded"));
        assert!(t.fail(id, "late").await.is_err());
    }

    #[tokio::test]
    async fn recover_marks_processing_as_failed() {
        let (_tmp, t) = tracker().await;
        let a = t.create(&new_upload("a.csv")).await.unwrap();
        let b = t.create(&new_upload("b.csv")).await.unwrap();
        t.begin(a).await.unwrap();

        assert_eq!(t.recover_interrupted().await.unwrap(), 1);
        let ua = t.get(a).await.unwrap().unwrap();
        assert_eq!(ua.status, UploadStatus::Failed);
        assert_eq!(ua.error.as_deref(), Some(INTERRUPTED));
        assert_eq!(t.get(b).await.unwrap().unwrap().status, UploadStatus::Uploaded);
    }

    #[tokio::test]
    async fn list_pages_by_descending_id() {
        let (_tmp, t) = tracker().await;
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(t.create(&new_upload(&format!("{}.csv", i))).await.unwrap());
        }
        let first: Vec<i64> = t.list(2, None).await.unwrap().iter().map(|u| u.id).collect();
        assert_eq!(first, vec![ids[4], ids[3]]);
        let next: Vec<i64> = t
            .list(2, Some(ids[3]))
            .await
            .unwrap()
            .iter()
            .map(|u| u.id)
            .collect();
        assert_eq!(next, vec![ids[2], ids[1]]);
        assert_eq!(t.list(0, None).await.unwrap().len(), 1);
    }
}
