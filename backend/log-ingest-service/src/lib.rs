//! Container log ingestion
//!
//! Consumes build/runtime log lines from the `container-logs` Kafka topic and
//! writes them to ClickHouse. Writes that fail are parked in a bounded
//! in-memory retry queue and re-attempted on a timer, while offsets keep
//! advancing so partitions never stall behind an unavailable log store.

pub mod broker;
pub mod codec;
pub mod config;
pub mod error;
pub mod http;
pub mod kafka;
pub mod metrics;
pub mod pipeline;
pub mod services;
pub mod shutdown;
pub mod sink;

pub use error::{IngestError, Result};
pub use pipeline::{LogIngestionPipeline, PipelineHandle};
