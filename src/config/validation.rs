//! Configuration validation.
//!
//! Validates configuration at startup to catch common errors early.

use super::Config;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Validation errors for configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("replay.streams must list at least one stream")]
    NoStreams,
    #[error("replay.snapshot does not exist: {0}")]
    SnapshotNotFound(String),
    #[error("replay stream does not exist: {0}")]
    StreamNotFound(String),
    #[error("log.filter is not a valid filter directive: {0}")]
    InvalidLogFilter(String),
}

/// Validate a configuration, returning all errors found.
pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if EnvFilter::try_new(&config.log.filter).is_err() {
        errors.push(ValidationError::InvalidLogFilter(config.log.filter.clone()));
    }

    if let Some(ref snapshot) = config.replay.snapshot
        && !snapshot.exists()
    {
        errors.push(ValidationError::SnapshotNotFound(
            snapshot.display().to_string(),
        ));
    }

    if config.replay.streams.is_empty() {
        errors.push(ValidationError::NoStreams);
    }
    for stream in &config.replay.streams {
        if !stream.exists() {
            errors.push(ValidationError::StreamNotFound(stream.display().to_string()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
