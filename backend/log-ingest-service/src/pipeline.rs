//! Wiring of the ingestion pipeline
//!
//! ```text
//! Kafka ──► BatchConsumer ──► LogSink
//!   ▲            │ (write failed)
//!   │            ▼
//! ReconnectSupervisor   RetryQueue ◄──► RetryDrainScheduler ──► LogSink
//! ```
//!
//! The consumer (under its supervisor) and the drain scheduler run as two
//! tasks sharing one [`RetryQueue`]. Both stop when the handle is shut down.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::broker::BrokerConnector;
use crate::config::IngestSettings;
use crate::metrics::IngestMetrics;
use crate::services::{
    BatchConsumer, PipelineState, ReconnectSupervisor, RetryDrainScheduler, RetryQueue,
};
use crate::sink::LogSink;

pub struct LogIngestionPipeline {
    settings: IngestSettings,
    sink: Arc<dyn LogSink>,
    queue: Arc<RetryQueue>,
    metrics: IngestMetrics,
}

impl LogIngestionPipeline {
    pub fn new(settings: IngestSettings, sink: Arc<dyn LogSink>, metrics: IngestMetrics) -> Self {
        let queue = Arc::new(RetryQueue::new(settings.retry_capacity));
        Self {
            settings,
            sink,
            queue,
            metrics,
        }
    }

    pub fn retry_queue(&self) -> Arc<RetryQueue> {
        Arc::clone(&self.queue)
    }

    /// Start the drain scheduler and the supervised consumer.
    pub fn spawn<C>(self, connector: C) -> PipelineHandle
    where
        C: BrokerConnector + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let drain = RetryDrainScheduler::new(
            Arc::clone(&self.queue),
            Arc::clone(&self.sink),
            self.metrics.clone(),
            &self.settings,
        );
        let drain_task = tokio::spawn(drain.run(shutdown_rx.clone()));

        let consumer = BatchConsumer::new(
            Arc::clone(&self.sink),
            Arc::clone(&self.queue),
            self.metrics.clone(),
        );
        let (supervisor, state) = ReconnectSupervisor::new(
            connector,
            consumer,
            self.settings.reconnect_delay(),
            self.metrics.clone(),
        );
        let supervisor_task = tokio::spawn(supervisor.run(shutdown_rx));

        info!(
            retry_capacity = self.queue.capacity(),
            "Log ingestion pipeline started"
        );

        PipelineHandle {
            shutdown: shutdown_tx,
            state,
            queue: self.queue,
            drain_task,
            supervisor_task,
        }
    }
}

/// Owner of the running pipeline tasks
pub struct PipelineHandle {
    shutdown: watch::Sender<bool>,
    state: watch::Receiver<PipelineState>,
    queue: Arc<RetryQueue>,
    drain_task: JoinHandle<()>,
    supervisor_task: JoinHandle<()>,
}

impl PipelineHandle {
    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<PipelineState> {
        self.state.clone()
    }

    pub fn retry_queue(&self) -> &Arc<RetryQueue> {
        &self.queue
    }

    /// Stop the drain timer, let the in-flight batch finish, commit and disconnect.
    ///
    /// Events still waiting in the retry queue are lost.
    pub async fn shutdown(self) {
        info!("Shutting down log ingestion pipeline");
        let _ = self.shutdown.send(true);

        if let Err(e) = self.supervisor_task.await {
            warn!("Consumer task ended abnormally: {}", e);
        }
        if let Err(e) = self.drain_task.await {
            warn!("Retry drain task ended abnormally: {}", e);
        }

        let remaining = self.queue.len();
        if remaining > 0 {
            warn!(
                remaining,
                "Retry queue not empty at shutdown; queued log events are lost"
            );
        }
        info!("Log ingestion pipeline stopped");
    }
}
