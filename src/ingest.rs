//! Ingestion pipeline: uploaded delimited file → batched analytical writes.
//!
//! # Flow
//!
//! ```text
//! submit_upload ──► uploads_dir/<nanos>_<safe name>  (sha256 + size)
//!        │                 │
//!        ▼                 ▼
//!   uploads row      AdmissionGate (max_concurrency)
//!   (uploaded)             │
//!                          ▼
//!                  run: uploaded → processing
//!                          │  header map, stream records
//!                          │  flush every batch_size rows
//!                          │  progress every progress_interval
//!                          ▼
//!            succeeded (file removed) | failed (error text, optional purge)
//! ```
//!
//! Each upload is consumed exactly once: [`IngestPipeline::run`] refuses an
//! upload that is not in `uploaded`, and the tracker's compare-and-set
//! updates make the `processing` claim exclusive.

use std::path::Path;
use std::sync::{Arc, LazyLock};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use csv_async::{AsyncReaderBuilder, StringRecord};
use regex::Regex;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use crate::analytics::RecordSink;
use crate::config::{FailurePolicy, IngestConfig};
use crate::models::{ContactRecord, StoredContact};
use crate::upload::{NewUpload, UploadTracker};

pub const NO_RECOGNIZED_COLUMNS: &str = "no recognized columns in header";

/// Canonical header names, in [`ContactRecord`] field order.
const CANONICAL: [&str; 14] = [
    "name",
    "email",
    "phone",
    "linkedin",
    "position",
    "company",
    "company phone",
    "website",
    "domain",
    "facebook",
    "twitter",
    "linkedin company page",
    "country",
    "state",
];

static SERIAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\((\d+)\)").expect("valid serial regex"));

/// Canonical field → column index, built from a header record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    columns: [Option<usize>; 14],
}

fn normalize_header(raw: &str) -> String {
    raw.trim_start_matches('\u{feff}')
        .replace('_', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

impl HeaderMap {
    /// Matching is case-insensitive, ignores a leading BOM and surrounding
    /// whitespace, and treats `_` as a space. The first occurrence of a
    /// duplicated name wins.
    pub fn from_header(header: &StringRecord) -> Self {
        let mut columns = [None; 14];
        for (idx, raw) in header.iter().enumerate() {
            let name = normalize_header(raw);
            if let Some(slot) = CANONICAL.iter().position(|c| *c == name) {
                columns[slot].get_or_insert(idx);
            }
        }
        Self { columns }
    }

    pub fn is_empty(&self) -> bool {
        self.columns.iter().all(Option::is_none)
    }

    pub fn recognized(&self) -> usize {
        self.columns.iter().filter(|c| c.is_some()).count()
    }

    /// Builds a record from one data row. Missing columns become `""`.
    pub fn project(&self, row: &StringRecord) -> ContactRecord {
        let get = |slot: usize| -> String {
            self.columns[slot]
                .and_then(|i| row.get(i))
                .map(|v| v.trim().to_string())
                .unwrap_or_default()
        };
        ContactRecord {
            name: get(0),
            email: get(1),
            phone: get(2),
            linkedin: get(3),
            position: get(4),
            company: get(5),
            company_phone: get(6),
            website: get(7),
            domain: get(8),
            facebook: get(9),
            twitter: get(10),
            linkedin_company_page: get(11),
            country: get(12),
            state: get(13),
        }
    }
}

/// Replaces path-traversal sequences and separators with `_`.
pub fn sanitize_filename(name: &str) -> String {
    let safe = name.replace("..", "_").replace(['/', '\\'], "_");
    let safe = safe.trim();
    if safe.is_empty() {
        "upload.csv".to_string()
    } else {
        safe.to_string()
    }
}

/// First `(digits)` group in the filename, e.g. `leads (12).csv` → 12.
pub fn parse_serial(name: &str) -> Option<i64> {
    SERIAL_RE
        .captures(name)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Fixed-capacity gate bounding concurrent ingestion runs.
#[derive(Clone)]
pub struct AdmissionGate {
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl AdmissionGate {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Waits for a free slot. The slot is released when the permit drops.
    pub async fn enter(&self) -> Result<OwnedSemaphorePermit> {
        self.permits
            .clone()
            .acquire_owned()
            .await
            .context("admission gate closed")
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

/// A received upload and its background ingestion task. The task resolves
/// to the inserted row count, or to the error that ended the run.
pub struct Submission {
    pub upload_id: i64,
    pub task: JoinHandle<Result<i64>>,
}

#[derive(Clone)]
pub struct IngestPipeline {
    tracker: UploadTracker,
    sink: Arc<dyn RecordSink>,
    gate: AdmissionGate,
    config: IngestConfig,
}

impl IngestPipeline {
    pub fn new(
        tracker: UploadTracker,
        sink: Arc<dyn RecordSink>,
        gate: AdmissionGate,
        config: IngestConfig,
    ) -> Self {
        Self {
            tracker,
            sink,
            gate,
            config,
        }
    }

    pub fn tracker(&self) -> &UploadTracker {
        &self.tracker
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    /// Stores `reader`'s content under `uploads_dir`, records the upload and
    /// spawns its gated ingestion. Returns once the upload row exists.
    pub async fn submit_upload<R>(&self, mut reader: R, original_filename: &str) -> Result<Submission>
    where
        R: AsyncRead + Unpin,
    {
        let safe = sanitize_filename(original_filename);
        let nanos = chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default();
        let stored_name = format!("{}_{}", nanos, safe);

        tokio::fs::create_dir_all(&self.config.uploads_dir)
            .await
            .with_context(|| {
                format!(
                    "creating uploads dir {}",
                    self.config.uploads_dir.display()
                )
            })?;
        let path = self.config.uploads_dir.join(&stored_name);

        let (size_bytes, sha256) = match store_stream(&mut reader, &path).await {
            Ok(v) => v,
            Err(e) => {
                let _ = tokio::fs::remove_file(&path).await;
                return Err(e);
            }
        };

        let created = self
            .tracker
            .create(&NewUpload {
                original_filename: original_filename.to_string(),
                safe_name: stored_name,
                serial_number: parse_serial(original_filename),
                size_bytes: size_bytes as i64,
                sha256,
            })
            .await;
        let upload_id = match created {
            Ok(id) => id,
            Err(e) => {
                let _ = tokio::fs::remove_file(&path).await;
                return Err(e);
            }
        };

        tracing::info!(upload_id, size_bytes, file = %original_filename, "upload received");

        let pipeline = self.clone();
        let task = tokio::spawn(async move {
            let _permit = match pipeline.gate.enter().await {
                Ok(p) => p,
                Err(e) => {
                    tracing::error!(upload_id, error = %e, "ingest not admitted");
                    return Err(e);
                }
            };
            let outcome = pipeline.run(upload_id, &path).await;
            if let Err(e) = &outcome {
                tracing::error!(upload_id, error = %format!("{:#}", e), "ingest run aborted");
            }
            outcome
        });

        Ok(Submission { upload_id, task })
    }

    /// Copies a local file into the uploads directory and submits it.
    pub async fn submit_path(&self, path: &Path) -> Result<Submission> {
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("opening {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.csv".to_string());
        self.submit_upload(file, &name).await
    }

    /// Ingests `path` for `upload_id` and records the outcome. Returns the
    /// number of rows inserted. Any failure after the `processing` claim is
    /// recorded on the upload before being returned.
    pub async fn run(&self, upload_id: i64, path: &Path) -> Result<i64> {
        self.tracker.begin(upload_id).await?;
        let started = Instant::now();
        tracing::info!(upload_id, path = %path.display(), "ingest started");

        match self.consume(upload_id, path).await {
            Ok(inserted) => {
                self.tracker.succeed(upload_id, inserted).await?;
                if let Err(e) = tokio::fs::remove_file(path).await {
                    tracing::warn!(upload_id, error = %e, "could not remove ingested file");
                }
                tracing::info!(
                    upload_id,
                    rows = inserted,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "ingest succeeded"
                );
                Ok(inserted)
            }
            Err(e) => {
                let mut message = format!("{:#}", e);
                if self.config.on_failure == FailurePolicy::Purge {
                    if let Err(pe) = self.sink.purge_upload(upload_id).await {
                        message = format!("{}; purge failed: {:#}", message, pe);
                    }
                }
                tracing::error!(upload_id, error = %message, "ingest failed");
                self.tracker.fail(upload_id, &message).await?;
                Err(e)
            }
        }
    }

    async fn consume(&self, upload_id: i64, path: &Path) -> Result<i64> {
        let size_bytes = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("reading metadata of {}", path.display()))?
            .len();
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("opening {}", path.display()))?;

        let mut reader = AsyncReaderBuilder::new()
            .delimiter(self.config.delimiter as u8)
            .has_headers(false)
            .flexible(true)
            .create_reader(file);

        let mut record = StringRecord::new();
        let has_header = reader
            .read_record(&mut record)
            .await
            .context("reading header")?;
        let header = if has_header {
            HeaderMap::from_header(&record)
        } else {
            HeaderMap::default()
        };
        if header.is_empty() {
            bail!(NO_RECOGNIZED_COLUMNS);
        }
        tracing::debug!(upload_id, columns = header.recognized(), "header mapped");

        let mut batch = self.sink.prepare_batch().await?;
        let mut processed: i64 = 0;
        let mut inserted: i64 = 0;
        let mut last_progress = Instant::now();
        let interval = self.config.progress_interval();

        loop {
            let more = reader
                .read_record(&mut record)
                .await
                .with_context(|| format!("reading record {}", processed + 1))?;
            if !more {
                break;
            }

            batch.append(StoredContact {
                record: header.project(&record),
                upload_id,
                created_at: chrono::Utc::now().timestamp(),
            })?;
            processed += 1;

            if batch.rows() >= self.config.batch_size {
                inserted += batch
                    .send()
                    .await
                    .with_context(|| format!("flushing batch ending at record {}", processed))?
                    as i64;
            }

            if last_progress.elapsed() >= interval {
                let pct = if size_bytes > 0 {
                    (reader.position().byte() as f64 / size_bytes as f64 * 100.0).min(99.0)
                } else {
                    0.0
                };
                if let Err(e) = self.tracker.record_progress(upload_id, processed, pct).await {
                    tracing::warn!(upload_id, error = %e, "progress update failed");
                }
                last_progress = Instant::now();
            }
        }

        if batch.rows() > 0 {
            inserted += batch.send().await.context("flushing final batch")? as i64;
        }

        Ok(inserted)
    }
}

/// Writes `reader` to `path`, returning (size, hex sha256).
async fn store_stream<R>(reader: &mut R, path: &Path) -> Result<(u64, String)>
where
    R: AsyncRead + Unpin,
{
    let mut out = tokio::fs::File::create(path)
        .await
        .with_context(|| format!("creating {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut size = 0u64;

    loop {
        let n = reader.read(&mut buf).await.context("reading upload body")?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        out.write_all(&buf[..n])
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        size += n as u64;
    }
    out.flush().await?;

    Ok((size, hex::encode(hasher.finalize())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(cols: &[&str]) -> StringRecord {
        StringRecord::from(cols.to_vec())
    }

    #[test]
    fn header_matching_is_forgiving() {
        let map = HeaderMap::from_header(&header(&[
            "\u{feff}Name",
            " EMAIL ",
            "Company_Phone",
            "unknown",
            "LinkedIn  Company Page",
        ]));
        assert_eq!(map.recognized(), 4);

        let rec = map.project(&StringRecord::from(vec![" Ada ", "ada@x.io", "555", "?", "li/acme"]));
        assert_eq!(rec.name, "Ada");
        assert_eq!(rec.email, "ada@x.io");
        assert_eq!(rec.company_phone, "555");
        assert_eq!(rec.linkedin_company_page, "li/acme");
        assert_eq!(rec.phone, "");
    }

    #[test]
    fn short_rows_default_to_empty() {
        let map = HeaderMap::from_header(&header(&["name", "email", "state"]));
        let rec = map.project(&StringRecord::from(vec!["Bo"]));
        assert_eq!(rec.name, "Bo");
        assert_eq!(rec.email, "");
        assert_eq!(rec.state, "");
    }

    #[test]
    fn unrecognized_header_is_empty() {
        assert!(HeaderMap::from_header(&header(&["foo", "bar"])).is_empty());
    }

    #[test]
    fn first_duplicate_column_wins() {
        let map = HeaderMap::from_header(&header(&["email", "Email"]));
        let rec = map.project(&StringRecord::from(vec!["first", "second"]));
        assert_eq!(rec.email, "first");
    }

    #[test]
    fn filenames_are_sanitized() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "____etc_passwd");
        assert_eq!(sanitize_filename("a\\b.csv"), "a_b.csv");
        assert_eq!(sanitize_filename("  "), "upload.csv");
    }

    #[test]
    fn serial_number_from_first_parenthesized_digits() {
        assert_eq!(parse_serial("leads (12).csv"), Some(12));
        assert_eq!(parse_serial("leads (a) (7) (9).csv"), Some(7));
        assert_eq!(parse_serial("leads.csv"), None);
    }

    #[tokio::test]
    async fn gate_bounds_concurrency() {
        let gate = AdmissionGate::new(2);
        let a = gate.enter().await.unwrap();
        let _b = gate.enter().await.unwrap();
        assert_eq!(gate.available(), 0);

        let third =
            tokio::time::timeout(std::time::Duration::from_millis(50), gate.enter()).await;
        assert!(third.is_err());

        drop(a);
        assert_eq!(gate.available(), 1);
        assert_eq!(gate.capacity(), 2);
        assert_eq!(AdmissionGate::new(0).capacity(), 1);
        assert!(gate.enter().await.is_ok());
    }
}
