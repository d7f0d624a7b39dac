//! ClickHouse backend over the HTTP interface.
//!
//! The `contacts` table stores the fourteen contact columns plus the
//! producing upload id and an insert timestamp. Lower-cased projections
//! (`*_lc`) are `MATERIALIZED` at write time and carry n-gram bloom filter
//! indexes so substring `LIKE` filters can skip granules.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clickhouse::{Client, Compression, Row};
use serde::{Deserialize, Serialize};

use crate::config::AnalyticsConfig;
use crate::models::{ContactRecord, StoredContact};
use crate::predicate::Predicate;

use super::connect::{self, ConnectStrategy};
use super::{BatchHandle, ContactReader, RecordSink};

const TABLE: &str = "contacts";

const SELECT_COLUMNS: &str = "name, email, phone, linkedin, position, company, company_phone, \
     website, domain, facebook, twitter, linkedin_company_page, country, state";

#[derive(Debug, Row, Serialize)]
struct ContactInsertRow {
    name: String,
    email: String,
    phone: String,
    linkedin: String,
    position: String,
    company: String,
    company_phone: String,
    website: String,
    domain: String,
    facebook: String,
    twitter: String,
    linkedin_company_page: String,
    country: String,
    state: String,
    file_id: u64,
    /// `DateTime`, unix seconds.
    created_at: u32,
}

impl TryFrom<StoredContact> for ContactInsertRow {
    type Error = anyhow::Error;

    fn try_from(c: StoredContact) -> Result<Self> {
        let file_id = u64::try_from(c.upload_id)
            .with_context(|| format!("negative upload id {}", c.upload_id))?;
        let created_at = u32::try_from(c.created_at)
            .with_context(|| format!("timestamp {} out of DateTime range", c.created_at))?;
        let r = c.record;
        Ok(Self {
            name: r.name,
            email: r.email,
            phone: r.phone,
            linkedin: r.linkedin,
            position: r.position,
            company: r.company,
            company_phone: r.company_phone,
            website: r.website,
            domain: r.domain,
            facebook: r.facebook,
            twitter: r.twitter,
            linkedin_company_page: r.linkedin_company_page,
            country: r.country,
            state: r.state,
            file_id,
            created_at,
        })
    }
}

#[derive(Debug, Row, Deserialize)]
struct ContactSelectRow {
    name: String,
    email: String,
    phone: String,
    linkedin: String,
    position: String,
    company: String,
    company_phone: String,
    website: String,
    domain: String,
    facebook: String,
    twitter: String,
    linkedin_company_page: String,
    country: String,
    state: String,
}

impl From<ContactSelectRow> for ContactRecord {
    fn from(r: ContactSelectRow) -> Self {
        Self {
            name: r.name,
            email: r.email,
            phone: r.phone,
            linkedin: r.linkedin,
            position: r.position,
            company: r.company,
            company_phone: r.company_phone,
            website: r.website,
            domain: r.domain,
            facebook: r.facebook,
            twitter: r.twitter,
            linkedin_company_page: r.linkedin_company_page,
            country: r.country,
            state: r.state,
        }
    }
}

pub struct ClickHouseStore {
    client: Client,
    database: String,
    strategy: ConnectStrategy,
}

impl ClickHouseStore {
    /// Walks the strategy list, probing each candidate with `SELECT 1`.
    ///
    /// The probe runs without a session database so that a server where the
    /// configured database does not exist yet still accepts the connection
    /// and `ensure_schema` can create it.
    pub async fn connect(cfg: &AnalyticsConfig) -> Result<Self> {
        let (client, strategy) = connect::resolve(cfg, |_, url| {
            let client = build_client(cfg, &url);
            async move {
                probe(&client).await?;
                Ok(client)
            }
        })
        .await
        .context("failed to connect to analytical store")?;

        Ok(Self {
            client: client.with_database(&cfg.database),
            database: cfg.database.clone(),
            strategy,
        })
    }

    pub fn strategy(&self) -> ConnectStrategy {
        self.strategy
    }

    /// Creates the database and the `contacts` table if missing.
    pub async fn ensure_schema(&self) -> Result<()> {
        // The configured database may not exist yet; run DDL from `default`.
        let admin = self.client.clone().with_database("default");
        admin
            .query(&format!("CREATE DATABASE IF NOT EXISTS {}", self.database))
            .execute()
            .await
            .with_context(|| format!("creating database {}", self.database))?;

        admin
            .query(&contacts_ddl(&self.database))
            .execute()
            .await
            .context("creating contacts table")?;

        tracing::info!(database = %self.database, "analytical schema ready");
        Ok(())
    }
}

fn build_client(cfg: &AnalyticsConfig, url: &str) -> Client {
    let mut client = Client::default().with_url(url);
    if let Some(user) = &cfg.user {
        client = client.with_user(user);
    }
    if let Some(password) = &cfg.password {
        client = client.with_password(password);
    }
    for (k, v) in &cfg.settings {
        client = client.with_option(k, v);
    }
    client
}

async fn probe(client: &Client) -> Result<()> {
    client
        .clone()
        .with_compression(Compression::None)
        .query("SELECT 1")
        .fetch_one::<u8>()
        .await
        .context("liveness probe failed")?;
    Ok(())
}

fn contacts_ddl(database: &str) -> String {
    let indexed = [
        ("name", "idx_name"),
        ("email", "idx_email"),
        ("company", "idx_company"),
        ("position", "idx_position"),
        ("domain", "idx_domain"),
        ("linkedin", "idx_linkedin"),
        ("state", "idx_state"),
    ];
    let lowered = [
        "name",
        "email",
        "linkedin",
        "position",
        "company",
        "website",
        "domain",
        "facebook",
        "twitter",
        "linkedin_company_page",
        "country",
        "state",
    ];

    let mut cols: Vec<String> = SELECT_COLUMNS
        .split(',')
        .map(|c| format!("{} String", c.trim()))
        .collect();
    cols.push("file_id UInt64".to_string());
    cols.push("created_at DateTime DEFAULT now()".to_string());
    for c in lowered {
        cols.push(format!("{c}_lc String MATERIALIZED lowerUTF8({c})"));
    }
    for (c, idx) in indexed {
        cols.push(format!(
            "INDEX {idx} {c}_lc TYPE ngrambf_v1(3, 256, 2, 0) GRANULARITY 1"
        ));
    }

    format!(
        "CREATE TABLE IF NOT EXISTS {}.{} (\n    {}\n) ENGINE = MergeTree\nORDER BY (created_at, email_lc)\nSETTINGS index_granularity = 8192",
        database,
        TABLE,
        cols.join(",\n    ")
    )
}

struct ClickHouseBatch {
    client: Client,
    buf: Vec<ContactInsertRow>,
}

#[async_trait]
impl BatchHandle for ClickHouseBatch {
    fn rows(&self) -> usize {
        self.buf.len()
    }

    fn append(&mut self, contact: StoredContact) -> Result<()> {
        self.buf.push(ContactInsertRow::try_from(contact)?);
        Ok(())
    }

    async fn send(&mut self) -> Result<usize> {
        let rows = std::mem::take(&mut self.buf);
        if rows.is_empty() {
            return Ok(0);
        }
        let mut insert = self
            .client
            .insert::<ContactInsertRow>(TABLE)
            .context("opening insert")?;
        for row in &rows {
            insert.write(row).await.context("writing batch row")?;
        }
        insert.end().await.context("finishing batch insert")?;
        Ok(rows.len())
    }
}

#[async_trait]
impl RecordSink for ClickHouseStore {
    async fn prepare_batch(&self) -> Result<Box<dyn BatchHandle>> {
        Ok(Box::new(ClickHouseBatch {
            client: self.client.clone(),
            buf: Vec::new(),
        }))
    }

    async fn purge_upload(&self, upload_id: i64) -> Result<()> {
        self.client
            .query(&format!("ALTER TABLE {} DELETE WHERE file_id = ?", TABLE))
            .bind(upload_id)
            .execute()
            .await
            .with_context(|| format!("purging rows of upload {}", upload_id))?;
        Ok(())
    }
}

#[async_trait]
impl ContactReader for ClickHouseStore {
    async fn fetch_page(
        &self,
        predicate: &Predicate,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<ContactRecord>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} ORDER BY created_at DESC LIMIT ? OFFSET ? SETTINGS max_threads = 4",
            SELECT_COLUMNS,
            TABLE,
            predicate.fragment()
        );
        let mut query = self.client.query(&sql);
        for p in predicate.params() {
            query = query.bind(p);
        }
        let rows = query
            .bind(limit)
            .bind(offset)
            .fetch_all::<ContactSelectRow>()
            .await
            .context("fetching contact page")?;
        Ok(rows.into_iter().map(ContactRecord::from).collect())
    }

    async fn count(&self, predicate: &Predicate) -> Result<u64> {
        let sql = format!(
            "SELECT count() FROM {} WHERE {}",
            TABLE,
            predicate.fragment()
        );
        let mut query = self.client.query(&sql);
        for p in predicate.params() {
            query = query.bind(p);
        }
        query
            .fetch_one::<u64>()
            .await
            .context("counting contacts")
    }
}
