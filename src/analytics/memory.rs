//! In-memory analytical store for tests and local development.
//!
//! Rows live in a `Vec` behind `std::sync::RwLock`. Reads apply
//! [`Predicate::matches`] and order by `created_at` descending, breaking ties
//! by insertion order (newest first). The store also records what it was
//! asked to do (flush sizes, read calls) so tests can assert on batching and
//! on the absence of backend reads.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::{ContactRecord, StoredContact};
use crate::predicate::Predicate;

use super::{BatchHandle, ContactReader, RecordSink};

struct MemRow {
    contact: StoredContact,
    seq: u64,
}

#[derive(Default)]
struct Inner {
    rows: RwLock<Vec<MemRow>>,
    next_seq: AtomicUsize,
    flushes: Mutex<Vec<usize>>,
    reads: AtomicUsize,
    fail_reads: AtomicBool,
    read_delay: Mutex<Option<Duration>>,
    send_budget: Mutex<Option<usize>>,
}

/// In-memory store. Cloning shares the underlying rows.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sizes of every successful flush, in order.
    pub fn flush_sizes(&self) -> Vec<usize> {
        self.inner.flushes.lock().unwrap().clone()
    }

    pub fn row_count(&self) -> usize {
        self.inner.rows.read().unwrap().len()
    }

    /// Number of `fetch_page` and `count` calls served so far.
    pub fn read_calls(&self) -> usize {
        self.inner.reads.load(Ordering::SeqCst)
    }

    /// Makes every subsequent read fail until switched back off.
    pub fn set_fail_reads(&self, fail: bool) {
        self.inner.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Delays every subsequent read.
    pub fn set_read_delay(&self, delay: Option<Duration>) {
        *self.inner.read_delay.lock().unwrap() = delay;
    }

    /// Lets `n` more flushes succeed, then fails every later one. `None`
    /// lifts the limit.
    pub fn fail_sends_after(&self, n: Option<usize>) {
        *self.inner.send_budget.lock().unwrap() = n;
    }

    /// Appends rows directly, bypassing batching.
    pub fn seed(&self, contacts: impl IntoIterator<Item = StoredContact>) {
        let mut rows = self.inner.rows.write().unwrap();
        for contact in contacts {
            let seq = self.inner.next_seq.fetch_add(1, Ordering::SeqCst) as u64;
            rows.push(MemRow { contact, seq });
        }
    }

    async fn begin_read(&self) -> Result<()> {
        self.inner.reads.fetch_add(1, Ordering::SeqCst);
        let delay = *self.inner.read_delay.lock().unwrap();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        if self.inner.fail_reads.load(Ordering::SeqCst) {
            bail!("in-memory store: reads disabled");
        }
        Ok(())
    }
}

struct MemoryBatch {
    store: InMemoryStore,
    buf: Vec<StoredContact>,
}

#[async_trait]
impl BatchHandle for MemoryBatch {
    fn rows(&self) -> usize {
        self.buf.len()
    }

    fn append(&mut self, contact: StoredContact) -> Result<()> {
        self.buf.push(contact);
        Ok(())
    }

    async fn send(&mut self) -> Result<usize> {
        let batch = std::mem::take(&mut self.buf);
        let n = batch.len();
        if let Some(budget) = self.store.inner.send_budget.lock().unwrap().as_mut() {
            if *budget == 0 {
                bail!("in-memory store: insert of {} rows rejected", n);
            }
            *budget -= 1;
        }
        self.store.seed(batch);
        self.store.inner.flushes.lock().unwrap().push(n);
        Ok(n)
    }
}

#[async_trait]
impl RecordSink for InMemoryStore {
    async fn prepare_batch(&self) -> Result<Box<dyn BatchHandle>> {
        Ok(Box::new(MemoryBatch {
            store: self.clone(),
            buf: Vec::new(),
        }))
    }

    async fn purge_upload(&self, upload_id: i64) -> Result<()> {
        let mut rows = self.inner.rows.write().unwrap();
        rows.retain(|r| r.contact.upload_id != upload_id);
        Ok(())
    }
}

#[async_trait]
impl ContactReader for InMemoryStore {
    async fn fetch_page(
        &self,
        predicate: &Predicate,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<ContactRecord>> {
        self.begin_read().await?;
        let rows = self.inner.rows.read().unwrap();
        let mut hits: Vec<&MemRow> = rows
            .iter()
            .filter(|r| predicate.matches(&r.contact.record))
            .collect();
        hits.sort_by(|a, b| {
            b.contact
                .created_at
                .cmp(&a.contact.created_at)
                .then(b.seq.cmp(&a.seq))
        });
        Ok(hits
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(|r| r.contact.record.clone())
            .collect())
    }

    async fn count(&self, predicate: &Predicate) -> Result<u64> {
        self.begin_read().await?;
        let rows = self.inner.rows.read().unwrap();
        Ok(rows
            .iter()
            .filter(|r| predicate.matches(&r.contact.record))
            .count() as u64)
    }
}
