use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Request cancelled before a decision was reached")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Source provider '{0}' is not registered")]
    ProviderNotRegistered(String),

    #[error("No source provider registered")]
    NoProviderRegistered,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Environment variable error: {0}")]
    EnvVar(String),

    #[error("Invalid header value: {0}")]
    InvalidHeader(String),
}

/// Failures reported by a [`SourceProvider`](crate::source::SourceProvider).
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Key is not tracked: {0}")]
    NotFound(String),

    #[error("Source unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl From<rusqlite::Error> for SourceError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => {
                SourceError::NotFound("query returned no rows".to_string())
            }
            other => SourceError::Unavailable(other.to_string()),
        }
    }
}

impl TrackerError {
    /// Cancellation is surfaced as [`TrackerError::Cancelled`] whichever layer observed it.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            TrackerError::Cancelled | TrackerError::Source(SourceError::Cancelled)
        )
    }
}

pub type Result<T> = std::result::Result<T, TrackerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = TrackerError::from(ConfigError::ProviderNotRegistered("main".to_string()));
        assert!(err.to_string().contains("Configuration error"));
        assert!(err.to_string().contains("main"));

        let err = TrackerError::from(SourceError::NotFound("roles".to_string()));
        assert!(err.to_string().contains("roles"));
    }

    #[test]
    fn test_rusqlite_conversion() {
        let err: SourceError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, SourceError::NotFound(_)));

        let err: SourceError = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(err, SourceError::Unavailable(_)));
    }

    #[test]
    fn test_cancellation_detection() {
        assert!(TrackerError::Cancelled.is_cancelled());
        assert!(TrackerError::Source(SourceError::Cancelled).is_cancelled());
        assert!(!TrackerError::Config(ConfigError::NoProviderRegistered).is_cancelled());
    }
}
