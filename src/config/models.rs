use crate::humanize::ByteSize;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Directory holding the Fjall ledger.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Largest archive accepted by `POST /books`.
    #[serde(default = "default_max_archive_bytes")]
    pub max_archive_bytes: ByteSize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            data_dir: default_data_dir(),
            max_archive_bytes: default_max_archive_bytes(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data/ledger")
}

fn default_max_archive_bytes() -> ByteSize {
    ByteSize(100 * 1024 * 1024) // 100 MB
}

/// Storage provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    /// Process-local, lost on exit. Useful for development and tests.
    #[default]
    Memory,
    Local,
    S3,
}

/// Remote object storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub provider: StorageProvider,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    pub endpoint: Option<String>,
    pub region: Option<String>,
    /// Root directory for the `local` provider.
    pub local_root: Option<PathBuf>,
    /// S3 access key (loaded from environment, not from config file)
    #[serde(skip)]
    pub access_key: Option<String>,
    /// S3 secret key (loaded from environment, not from config file)
    #[serde(skip)]
    pub secret_key: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: StorageProvider::default(),
            bucket: default_bucket(),
            endpoint: None,
            region: None,
            local_root: None,
            access_key: None,
            secret_key: None,
        }
    }
}

fn default_bucket() -> String {
    "epubvault".to_string()
}

/// Processing pipeline configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessingConfig {
    /// Books processed concurrently by a batch.
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            batch_concurrency: default_batch_concurrency(),
        }
    }
}

fn default_batch_concurrency() -> usize {
    4
}

/// Cloud sync configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Delay before the startup sync pass.
    #[serde(default = "default_startup_delay_ms")]
    pub startup_delay_ms: u64,
    /// Fraction of chapters that must upload for a book to count as synced.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: f64,
    /// URL probed to decide whether the network is reachable. When unset the
    /// engine assumes it is online.
    pub connectivity_probe_url: Option<String>,
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,
    /// Books synced concurrently by a sync-all pass.
    #[serde(default = "default_max_concurrent_books")]
    pub max_concurrent_books: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            startup_delay_ms: default_startup_delay_ms(),
            success_threshold: default_success_threshold(),
            connectivity_probe_url: None,
            probe_interval_secs: default_probe_interval_secs(),
            max_concurrent_books: default_max_concurrent_books(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_startup_delay_ms() -> u64 {
    2000
}

fn default_success_threshold() -> f64 {
    0.9
}

fn default_probe_interval_secs() -> u64 {
    30
}

fn default_max_concurrent_books() -> usize {
    2
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    /// `tracing-subscriber` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}
