//! Broker seam used by the pipeline
//!
//! The pipeline only needs batch delivery plus the three control calls issued
//! after every message (resolve, conditional commit, heartbeat). Kafka is the
//! production implementation; tests drive the pipeline through in-memory
//! fakes.

use async_trait::async_trait;

use crate::error::Result;

/// A message detached from the broker client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Option<Vec<u8>>,
}

impl InboundMessage {
    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }
}

/// An established, subscribed broker session
#[async_trait]
pub trait BatchSource: Send + Sync {
    /// Wait for the next non-empty batch, in partition order.
    ///
    /// An error the implementation reports as connection loss
    /// (see [`crate::error::IngestError::is_connection_loss`]) ends the session.
    async fn next_batch(&self) -> Result<Vec<InboundMessage>>;

    /// Mark a message as processed so its offset becomes eligible for commit.
    fn resolve_offset(&self, message: &InboundMessage) -> Result<()>;

    /// Commit resolved offsets, if any are pending.
    async fn commit_offsets_if_necessary(&self) -> Result<()>;

    /// Signal liveness to the consumer group.
    async fn heartbeat(&self) -> Result<()>;
}

/// Establishes broker sessions (connect then subscribe)
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    type Source: BatchSource + 'static;

    async fn connect(&self) -> Result<Self::Source>;
}
