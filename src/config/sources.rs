use std::env;
use std::path::PathBuf;

use config::{ConfigError, Environment, File};
use tracing::{info, warn};

use super::models::{Config, StorageConfig};

const CONFIG_ENV_VAR: &str = "EPUBVAULT_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/epubvault.toml";
const ENV_PREFIX: &str = "EPUBVAULT";
const ENV_SEPARATOR: &str = "__";

/// Credential variables, strongest first. `S3_*` always wins; the AWS names
/// only fill what is still unset.
const ACCESS_KEY_VARS: [&str; 2] = ["S3_ACCESS_KEY", "AWS_ACCESS_KEY_ID"];
const SECRET_KEY_VARS: [&str; 2] = ["S3_SECRET_KEY", "AWS_SECRET_ACCESS_KEY"];

/// Defaults, then the TOML file, then `EPUBVAULT__*` variables (including
/// those from `.env`), then storage credentials from the environment.
pub fn load() -> Result<Config, ConfigError> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            warn!(error = %e, "Ignoring unreadable .env file");
        }
    }

    let mut config = load_from_sources(config_path())?;
    apply_secrets(&mut config.storage, |name| env::var(name).ok());
    Ok(config)
}

fn config_path() -> PathBuf {
    env::var_os(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Credentials live only in the environment, never in the TOML file.
fn apply_secrets(storage: &mut StorageConfig, lookup: impl Fn(&str) -> Option<String>) {
    let pick = |vars: &[&str]| vars.iter().find_map(|name| lookup(name));
    if let Some(key) = lookup(ACCESS_KEY_VARS[0]) {
        storage.access_key = Some(key);
    } else if storage.access_key.is_none() {
        storage.access_key = pick(&ACCESS_KEY_VARS[1..]);
    }
    if let Some(key) = lookup(SECRET_KEY_VARS[0]) {
        storage.secret_key = Some(key);
    } else if storage.secret_key.is_none() {
        storage.secret_key = pick(&SECRET_KEY_VARS[1..]);
    }
}

/// Build a config from `config_path` (optional) and `EPUBVAULT__*` variables,
/// e.g. `EPUBVAULT__SYNC__ENABLED=false` sets `sync.enabled`.
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();
    if config_path.exists() {
        info!(path = %config_path.display(), "Loading configuration file");
        builder = builder.add_source(File::from(config_path));
    } else {
        warn!(path = %config_path.display(), "No configuration file, using defaults");
    }

    builder
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator(ENV_SEPARATOR)
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageProvider;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_defaults_only() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.toml");

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.server.bind_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(config.sync.success_threshold, 0.9);
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[server]
bind_addr = "127.0.0.1:9000"
max_archive_bytes = "10MB"
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.server.bind_addr.to_string(), "127.0.0.1:9000");
        assert_eq!(config.server.max_archive_bytes.as_u64(), 10 * 1024 * 1024);
    }

    fn lookup_in(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: Vec<(String, String)> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone())
    }

    #[test]
    fn test_s3_credentials_override() {
        let mut storage = StorageConfig {
            access_key: Some("from-earlier".into()),
            ..StorageConfig::default()
        };
        apply_secrets(
            &mut storage,
            lookup_in(&[
                ("S3_ACCESS_KEY", "s3-access"),
                ("AWS_ACCESS_KEY_ID", "aws-access"),
                ("AWS_SECRET_ACCESS_KEY", "aws-secret"),
            ]),
        );
        assert_eq!(storage.access_key.as_deref(), Some("s3-access"));
        assert_eq!(storage.secret_key.as_deref(), Some("aws-secret"));
    }

    #[test]
    fn test_aws_credentials_only_fill_gaps() {
        let mut storage = StorageConfig {
            secret_key: Some("kept".into()),
            ..StorageConfig::default()
        };
        apply_secrets(
            &mut storage,
            lookup_in(&[
                ("AWS_ACCESS_KEY_ID", "aws-access"),
                ("AWS_SECRET_ACCESS_KEY", "aws-secret"),
            ]),
        );
        assert_eq!(storage.access_key.as_deref(), Some("aws-access"));
        assert_eq!(storage.secret_key.as_deref(), Some("kept"));

        let mut empty = StorageConfig::default();
        apply_secrets(&mut empty, lookup_in(&[]));
        assert!(empty.access_key.is_none());
        assert!(empty.secret_key.is_none());
    }

    #[test]
    fn test_complex_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[server]
bind_addr = "0.0.0.0:8080"
max_archive_bytes = "50MB"
data_dir = "var/epubvault"

[storage]
provider = "s3"
bucket = "books"
region = "us-east-1"
endpoint = "http://localhost:9000"

[processing]
batch_concurrency = 8

[sync]
enabled = false
startup_delay_ms = 500
success_threshold = 0.75
connectivity_probe_url = "http://localhost:9000/health"
probe_interval_secs = 10
max_concurrent_books = 3

[telemetry]
log_filter = "epubvault=debug"
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = load_from_sources(config_path).unwrap();

        assert_eq!(config.server.max_archive_bytes.as_u64(), 50 * 1024 * 1024);
        assert_eq!(config.server.data_dir.to_str(), Some("var/epubvault"));

        assert_eq!(config.storage.provider, StorageProvider::S3);
        assert_eq!(config.storage.bucket, "books");
        assert_eq!(config.storage.endpoint.as_deref(), Some("http://localhost:9000"));
        // Secrets never come from the file.
        assert!(config.storage.access_key.is_none());

        assert_eq!(config.processing.batch_concurrency, 8);

        assert!(!config.sync.enabled);
        assert_eq!(config.sync.startup_delay_ms, 500);
        assert_eq!(config.sync.success_threshold, 0.75);
        assert_eq!(config.sync.max_concurrent_books, 3);

        assert_eq!(config.telemetry.log_filter, "epubvault=debug");
    }
}
