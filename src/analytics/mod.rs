//! Analytical store abstraction.
//!
//! Contacts live in a column store that is written in large batches by the
//! ingestion pipeline and read with filtered, paginated queries by the
//! search engine. The two sides are separate traits so each consumer only
//! sees what it uses:
//!
//! - [`RecordSink`] / [`BatchHandle`]: batched appends, plus purge of an
//!   upload's rows for the `purge` failure policy.
//! - [`ContactReader`]: page fetch and total count under a [`Predicate`].
//!
//! Two backends implement both: [`ClickHouseStore`] for production and
//! [`InMemoryStore`] for tests and local development. [`open`] picks one
//! from configuration.

pub mod clickhouse;
pub mod connect;
pub mod memory;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::{AnalyticsBackend, AnalyticsConfig};
use crate::models::{ContactRecord, StoredContact};
use crate::predicate::Predicate;

pub use self::clickhouse::ClickHouseStore;
pub use self::memory::InMemoryStore;

/// Write side of the analytical store.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Opens an empty batch owned by the caller.
    async fn prepare_batch(&self) -> Result<Box<dyn BatchHandle>>;

    /// Deletes every row attributed to `upload_id`.
    async fn purge_upload(&self, upload_id: i64) -> Result<()>;
}

/// Client-side accumulator for one insert.
///
/// After [`send`](BatchHandle::send) returns, successfully or not, the handle
/// is an empty batch again.
#[async_trait]
pub trait BatchHandle: Send {
    fn rows(&self) -> usize;

    fn append(&mut self, contact: StoredContact) -> Result<()>;

    /// Flushes the buffered rows as a single insert. Returns the number of
    /// rows written.
    async fn send(&mut self) -> Result<usize>;
}

/// Read side of the analytical store.
#[async_trait]
pub trait ContactReader: Send + Sync {
    /// Rows matching `predicate`, newest first.
    async fn fetch_page(
        &self,
        predicate: &Predicate,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<ContactRecord>>;

    async fn count(&self, predicate: &Predicate) -> Result<u64>;
}

/// Both halves of one backend, shared by the pipeline and the engine.
#[derive(Clone)]
pub struct AnalyticsHandles {
    pub sink: Arc<dyn RecordSink>,
    pub reader: Arc<dyn ContactReader>,
}

impl AnalyticsHandles {
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: RecordSink + ContactReader + 'static,
    {
        Self {
            sink: store.clone(),
            reader: store,
        }
    }
}

/// Connects to the configured backend. For ClickHouse this walks the
/// connection strategy list and fails if none succeeds.
pub async fn open(cfg: &AnalyticsConfig) -> Result<AnalyticsHandles> {
    match cfg.backend {
        AnalyticsBackend::Memory => {
            tracing::warn!("using in-memory analytical store; data is not persisted");
            Ok(AnalyticsHandles::from_store(Arc::new(InMemoryStore::new())))
        }
        AnalyticsBackend::Clickhouse => {
            let store = ClickHouseStore::connect(cfg).await?;
            Ok(AnalyticsHandles::from_store(Arc::new(store)))
        }
    }
}
