//! Log store write path

pub mod ch_sink;

use async_trait::async_trait;

use crate::codec::LogEvent;
use crate::error::Result;

pub use self::ch_sink::{ClickHouseLogSink, LogEventRow};

/// Durable destination for log events.
///
/// An `Ok` means the event is persisted. Any `Err` is treated as transient by
/// the pipeline and the event is handed to the retry queue.
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn insert_log_event(&self, event: &LogEvent) -> Result<()>;
}
