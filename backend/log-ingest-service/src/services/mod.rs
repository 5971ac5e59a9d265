pub mod consumer;
pub mod drain;
pub mod retry_queue;
pub mod supervisor;

pub use consumer::{BatchConsumer, BatchReport, MessageOutcome};
pub use drain::{DrainReport, RetryDrainScheduler};
pub use retry_queue::{RetryQueue, MAX_FAILED};
pub use supervisor::{PipelineState, ReconnectSupervisor};
