//! Error types for Tandem.

use crate::ids::BuildsetId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown message queue type: {0}")]
    UnknownMqType(String),

    // Buildset errors
    #[error("Buildset not found: {0}")]
    BuildsetNotFound(BuildsetId),

    #[error("Buildset already complete: {0}")]
    BuildsetAlreadyComplete(BuildsetId),

    // Scheduler errors
    #[error("Scheduler stopped before {0} completed")]
    Cancelled(BuildsetId),

    // Infrastructure errors
    #[error("Message queue error: {0}")]
    Mq(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl Error {
    /// Whether this error stems from configuration rather than runtime state.
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_) | Error::UnknownMqType(_))
    }
}
