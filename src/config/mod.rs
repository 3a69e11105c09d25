//! Configuration management for epubvault
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use epubvault::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Server listening on: {}", config.server.bind_addr);
//! ```
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `EPUBVAULT__<section>__<key>`
//!
//! Examples:
//! - `EPUBVAULT__SERVER__BIND_ADDR=0.0.0.0:9000`
//! - `EPUBVAULT__STORAGE__PROVIDER=s3`
//! - `EPUBVAULT__SYNC__SUCCESS_THRESHOLD=0.95`
//! - `EPUBVAULT__SERVER__MAX_ARCHIVE_BYTES=200MB`
//!
//! S3 credentials are read only from `S3_ACCESS_KEY`/`S3_SECRET_KEY` (or
//! `AWS_ACCESS_KEY_ID`/`AWS_SECRET_ACCESS_KEY`).
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/epubvault.toml`.
//! This can be overridden using the `EPUBVAULT_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

// Re-export public types
pub use crate::humanize::ByteSize;
pub use models::{
    Config, ProcessingConfig, ServerConfig, StorageConfig, StorageProvider, SyncConfig,
    TelemetryConfig,
};
pub use validation::ValidationError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// Configuration is loaded with the following priority (highest to lowest):
    /// 1. Environment variables (`EPUBVAULT__*`)
    /// 2. TOML file (default: `config/epubvault.toml`)
    /// 3. Default values
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file is malformed or a value
    /// fails validation.
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path
    ///
    /// Useful for testing with custom configuration files.
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }
}
