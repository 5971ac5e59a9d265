use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use super::retry_queue::RetryQueue;
use crate::config::IngestSettings;
use crate::metrics::IngestMetrics;
use crate::shutdown;
use crate::sink::LogSink;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub requeued: usize,
    /// Events lost for good because the queue refilled while they were retried
    pub dropped: usize,
}

/// Periodically re-attempts writes parked in the [`RetryQueue`]
pub struct RetryDrainScheduler {
    queue: Arc<RetryQueue>,
    sink: Arc<dyn LogSink>,
    metrics: IngestMetrics,
    interval: Duration,
    batch_size: usize,
}

impl RetryDrainScheduler {
    pub fn new(
        queue: Arc<RetryQueue>,
        sink: Arc<dyn LogSink>,
        metrics: IngestMetrics,
        settings: &IngestSettings,
    ) -> Self {
        Self {
            queue,
            sink,
            metrics,
            interval: settings.drain_interval(),
            batch_size: settings.drain_batch_size,
        }
    }

    /// Run one drain cycle over at most `batch_size` queued events.
    pub async fn drain_once(&self) -> DrainReport {
        let mut report = DrainReport::default();
        if self.queue.is_empty() {
            return report;
        }

        info!("Processing {} failed messages...", self.queue.len());
        let batch = self.queue.drain_batch(self.batch_size);

        for queued in batch {
            report.attempted += 1;
            let event = queued.next_attempt();

            match self.sink.insert_log_event(&event).await {
                Ok(()) => {
                    report.succeeded += 1;
                    self.metrics.retry_succeeded_total.inc();
                    info!(
                        "Successfully processed failed message for deployment: {}",
                        event.deployment_id
                    );
                }
                Err(e) => {
                    self.metrics.retry_failed_total.inc();
                    error!("Failed to process message again: {}", e);

                    let deployment_id = event.deployment_id.clone();
                    if self.queue.enqueue(event) {
                        report.requeued += 1;
                        self.metrics.events_queued_total.inc();
                    } else {
                        report.dropped += 1;
                        self.metrics.events_dropped_total.inc();
                        warn!(
                            "Failed message queue is full. Permanently dropping message for deployment: {}",
                            deployment_id
                        );
                    }
                }
            }
        }

        self.metrics.retry_queue_depth.set(self.queue.len() as i64);
        report
    }

    /// Drain on a fixed period until shutdown. The first cycle runs one full
    /// period after start.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            batch_size = self.batch_size,
            "Starting retry drain scheduler"
        );

        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown::requested(&mut shutdown) => break,
                _ = ticker.tick() => {
                    let report = self.drain_once().await;
                    if report.attempted > 0 {
                        info!(
                            attempted = report.attempted,
                            succeeded = report.succeeded,
                            requeued = report.requeued,
                            dropped = report.dropped,
                            remaining = self.queue.len(),
                            "Retry drain cycle completed"
                        );
                    }
                }
            }
        }

        info!(
            remaining = self.queue.len(),
            "Retry drain scheduler stopped"
        );
    }
}
