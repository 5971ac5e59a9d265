use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Kafka error: {0}")]
    Kafka(String),

    /// The broker client is no longer usable and must be recreated.
    #[error("Fatal Kafka error: {0}")]
    KafkaFatal(String),

    #[error("ClickHouse error: {0}")]
    ClickHouse(String),

    #[error("Sink write timed out after {0:?}")]
    SinkTimeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IngestError {
    /// Whether the error means the broker connection has to be rebuilt.
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, IngestError::KafkaFatal(_))
    }
}

impl From<rdkafka::error::KafkaError> for IngestError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        IngestError::Kafka(err.to_string())
    }
}

impl From<clickhouse::error::Error> for IngestError {
    fn from(err: clickhouse::error::Error) -> Self {
        IngestError::ClickHouse(err.to_string())
    }
}

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
