use anyhow::{Context, Result};
use chrono_tz::Tz;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Which analytical store implementation backs ingestion and search.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AnalyticsBackend {
    Clickhouse,
    Memory,
}

/// Restricts which configured endpoints connection strategies may use.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EndpointMode {
    Auto,
    Primary,
    Alternate,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalyticsConfig {
    #[serde(default = "default_backend")]
    pub backend: AnalyticsBackend,
    /// `host:port` of the primary HTTP(S) interface.
    #[serde(default = "default_addr")]
    pub addr: String,
    /// Optional second `host:port`, tried after the primary.
    #[serde(default)]
    pub alternate_addr: Option<String>,
    #[serde(default = "default_endpoint_mode")]
    pub endpoint: EndpointMode,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub tls: bool,
    #[serde(default)]
    pub allow_plaintext: bool,
    /// Server settings sent with every query (e.g. `max_execution_time`).
    #[serde(default = "default_ch_settings")]
    pub settings: BTreeMap<String, String>,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            addr: default_addr(),
            alternate_addr: None,
            endpoint: default_endpoint_mode(),
            database: default_database(),
            user: None,
            password: None,
            tls: false,
            allow_plaintext: false,
            settings: default_ch_settings(),
        }
    }
}

fn default_backend() -> AnalyticsBackend {
    AnalyticsBackend::Clickhouse
}
fn default_addr() -> String {
    "localhost:8123".to_string()
}
fn default_endpoint_mode() -> EndpointMode {
    EndpointMode::Auto
}
fn default_database() -> String {
    "leadvault".to_string()
}
fn default_ch_settings() -> BTreeMap<String, String> {
    [
        ("max_execution_time", "30"),
        ("optimize_move_to_prewhere", "1"),
        ("use_uncompressed_cache", "1"),
        ("max_threads", "4"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// What happens to rows already flushed when an upload fails.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Flushed rows stay in the analytical store.
    Retain,
    /// Rows attributed to the failed upload are deleted.
    Purge,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_uploads_dir")]
    pub uploads_dir: PathBuf,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default = "default_failure_policy")]
    pub on_failure: FailurePolicy,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            uploads_dir: default_uploads_dir(),
            batch_size: default_batch_size(),
            max_concurrency: default_max_concurrency(),
            progress_interval_ms: default_progress_interval_ms(),
            delimiter: default_delimiter(),
            on_failure: default_failure_policy(),
        }
    }
}

impl IngestConfig {
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}

fn default_uploads_dir() -> PathBuf {
    PathBuf::from("./uploads")
}
fn default_batch_size() -> usize {
    5000
}
fn default_max_concurrency() -> usize {
    2
}
fn default_progress_interval_ms() -> u64 {
    1000
}
fn default_delimiter() -> char {
    ','
}
fn default_failure_policy() -> FailurePolicy {
    FailurePolicy::Retain
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,
    #[serde(default = "default_row_timeout_ms")]
    pub row_timeout_ms: u64,
    #[serde(default = "default_count_timeout_ms")]
    pub count_timeout_ms: u64,
    #[serde(default = "default_daily_limit")]
    pub default_daily_limit: i64,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            row_timeout_ms: default_row_timeout_ms(),
            count_timeout_ms: default_count_timeout_ms(),
            default_daily_limit: default_daily_limit(),
            timezone: default_timezone(),
        }
    }
}

impl SearchConfig {
    pub fn row_timeout(&self) -> Duration {
        Duration::from_millis(self.row_timeout_ms)
    }

    pub fn count_timeout(&self) -> Duration {
        Duration::from_millis(self.count_timeout_ms)
    }

    /// Reference timezone for quota days. Validated by [`load_config`].
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("search.timezone '{}': {}", self.timezone, e))
    }
}

fn default_page_size() -> u32 {
    100
}
fn default_max_page_size() -> u32 {
    1000
}
fn default_row_timeout_ms() -> u64 {
    20_000
}
fn default_count_timeout_ms() -> u64 {
    10_000
}
fn default_daily_limit() -> i64 {
    50
}
fn default_timezone() -> String {
    "Asia/Kolkata".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate ingest
    if config.ingest.batch_size == 0 {
        anyhow::bail!("ingest.batch_size must be > 0");
    }
    if config.ingest.max_concurrency == 0 {
        anyhow::bail!("ingest.max_concurrency must be >= 1");
    }
    if !config.ingest.delimiter.is_ascii() {
        anyhow::bail!("ingest.delimiter must be a single ASCII character");
    }

    // Validate search
    if config.search.max_page_size == 0 {
        anyhow::bail!("search.max_page_size must be > 0");
    }
    if config.search.default_page_size == 0
        || config.search.default_page_size > config.search.max_page_size
    {
        anyhow::bail!("search.default_page_size must be in (0, search.max_page_size]");
    }
    if config.search.count_timeout_ms == 0 || config.search.row_timeout_ms == 0 {
        anyhow::bail!("search timeouts must be > 0");
    }
    if config.search.default_daily_limit < 0 {
        anyhow::bail!("search.default_daily_limit must be >= 0");
    }
    config.search.tz()?;

    // Validate analytics
    if config.analytics.backend == AnalyticsBackend::Clickhouse {
        if config.analytics.endpoint == EndpointMode::Alternate
            && config.analytics.alternate_addr.is_none()
        {
            anyhow::bail!("analytics.endpoint = 'alternate' requires analytics.alternate_addr");
        }
        if config.analytics.database.trim().is_empty() {
            anyhow::bail!("analytics.database must not be empty");
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg = parse_config("[db]\npath = \"/tmp/lv.sqlite\"\n").unwrap();
        assert_eq!(cfg.ingest.batch_size, 5000);
        assert_eq!(cfg.ingest.max_concurrency, 2);
        assert_eq!(cfg.ingest.on_failure, FailurePolicy::Retain);
        assert_eq!(cfg.search.default_page_size, 100);
        assert_eq!(cfg.search.row_timeout(), Duration::from_secs(20));
        assert_eq!(cfg.search.count_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.search.tz().unwrap(), chrono_tz::Asia::Kolkata);
        assert_eq!(cfg.analytics.backend, AnalyticsBackend::Clickhouse);
        assert_eq!(cfg.analytics.settings.get("max_threads").unwrap(), "4");
    }

    #[test]
    fn rejects_unknown_timezone() {
        let err = parse_config(
            "[db]\npath = \"x\"\n[search]\ntimezone = \"Mars/Olympus\"\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("Mars/Olympus"));
    }

    #[test]
    fn rejects_zero_batch_size() {
        assert!(parse_config("[db]\npath = \"x\"\n[ingest]\nbatch_size = 0\n").is_err());
    }

    #[test]
    fn alternate_endpoint_requires_address() {
        let err = parse_config("[db]\npath = \"x\"\n[analytics]\nendpoint = \"alternate\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("alternate_addr"));
    }

    #[test]
    fn purge_policy_parses() {
        let cfg =
            parse_config("[db]\npath = \"x\"\n[ingest]\non_failure = \"purge\"\n").unwrap();
        assert_eq!(cfg.ingest.on_failure, FailurePolicy::Purge);
    }
}
