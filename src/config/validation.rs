use super::models::{Config, StorageProvider};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("max_archive_bytes must be positive")]
    InvalidArchiveLimit,

    #[error("processing.batch_concurrency must be at least 1")]
    InvalidBatchConcurrency,

    #[error("sync.max_concurrent_books must be at least 1")]
    InvalidSyncConcurrency,

    #[error("sync.success_threshold must be in (0, 1], got {0}")]
    InvalidSuccessThreshold(f64),

    #[error("sync.probe_interval_secs must be positive")]
    InvalidProbeInterval,

    #[error("Storage bucket name must not be empty")]
    MissingBucket,

    #[error("Storage provider is S3 but missing credentials (access_key or secret_key)")]
    MissingS3Credentials,

    #[error("Storage provider is local but storage.local_root is not set")]
    MissingLocalRoot,
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_server(config)?;
    validate_processing(config)?;
    validate_sync(config)?;
    validate_storage(config)?;
    Ok(())
}

fn validate_server(config: &Config) -> Result<(), ValidationError> {
    if config.server.max_archive_bytes.as_u64() == 0 {
        return Err(ValidationError::InvalidArchiveLimit);
    }
    Ok(())
}

fn validate_processing(config: &Config) -> Result<(), ValidationError> {
    if config.processing.batch_concurrency == 0 {
        return Err(ValidationError::InvalidBatchConcurrency);
    }
    Ok(())
}

fn validate_sync(config: &Config) -> Result<(), ValidationError> {
    let threshold = config.sync.success_threshold;
    // Also rejects NaN.
    if !(threshold > 0.0 && threshold <= 1.0) {
        return Err(ValidationError::InvalidSuccessThreshold(threshold));
    }
    if config.sync.max_concurrent_books == 0 {
        return Err(ValidationError::InvalidSyncConcurrency);
    }
    if config.sync.probe_interval_secs == 0 {
        return Err(ValidationError::InvalidProbeInterval);
    }
    Ok(())
}

/// Validate provider-specific storage settings
fn validate_storage(config: &Config) -> Result<(), ValidationError> {
    match config.storage.provider {
        StorageProvider::Memory => {}
        StorageProvider::Local => {
            if config.storage.local_root.is_none() {
                return Err(ValidationError::MissingLocalRoot);
            }
        }
        StorageProvider::S3 => {
            if config.storage.bucket.trim().is_empty() {
                return Err(ValidationError::MissingBucket);
            }
            if config.storage.access_key.is_none() || config.storage.secret_key.is_none() {
                return Err(ValidationError::MissingS3Credentials);
            }
        }
    }
    Ok(())
}
