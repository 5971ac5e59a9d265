use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::retry_queue::RetryQueue;
use crate::broker::{BatchSource, InboundMessage};
use crate::codec::{decode_payload, raw_content, LogEvent};
use crate::error::Result;
use crate::metrics::IngestMetrics;
use crate::shutdown;
use crate::sink::LogSink;

/// Pause after a transient broker error before polling again
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// What happened to a single broker message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Written to the log store on the first attempt
    Persisted,
    /// Write failed; the event waits in the retry queue
    Queued,
    /// Write failed and the retry queue was full
    Dropped,
    /// Payload could not be decoded
    Discarded,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub persisted: usize,
    pub queued: usize,
    pub dropped: usize,
    pub discarded: usize,
}

impl BatchReport {
    fn record(&mut self, outcome: MessageOutcome) {
        match outcome {
            MessageOutcome::Persisted => self.persisted += 1,
            MessageOutcome::Queued => self.queued += 1,
            MessageOutcome::Dropped => self.dropped += 1,
            MessageOutcome::Discarded => self.discarded += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.persisted + self.queued + self.dropped + self.discarded
    }
}

/// Container-log consumer
///
/// Processes each delivered batch strictly in order, one message at a time.
/// Every message's offset is resolved and committed right after it is handled,
/// whatever the outcome, followed by a heartbeat. Broker redelivery is never
/// used as a retry mechanism; failed writes go to the [`RetryQueue`].
pub struct BatchConsumer {
    sink: Arc<dyn LogSink>,
    queue: Arc<RetryQueue>,
    metrics: IngestMetrics,
}

impl BatchConsumer {
    pub fn new(sink: Arc<dyn LogSink>, queue: Arc<RetryQueue>, metrics: IngestMetrics) -> Self {
        Self {
            sink,
            queue,
            metrics,
        }
    }

    /// Consume until shutdown is requested or the connection is lost.
    ///
    /// Returns `Ok(())` on shutdown, after the in-flight batch has finished and
    /// a final commit has been attempted. Returns the error when the broker
    /// session is no longer usable.
    pub async fn run<S>(&self, source: &S, shutdown: &mut watch::Receiver<bool>) -> Result<()>
    where
        S: BatchSource + ?Sized,
    {
        info!("Starting container-log consumer loop");

        loop {
            let next = tokio::select! {
                _ = shutdown::requested(shutdown) => break,
                next = source.next_batch() => next,
            };

            match next {
                Ok(batch) => {
                    let report = self.process_batch(source, batch).await;
                    debug!(
                        persisted = report.persisted,
                        queued = report.queued,
                        dropped = report.dropped,
                        discarded = report.discarded,
                        "Batch processed"
                    );
                }
                Err(e) if e.is_connection_loss() => {
                    error!("Kafka connection lost: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    error!("Kafka consumer error: {}", e);
                    tokio::select! {
                        _ = shutdown::requested(shutdown) => break,
                        _ = tokio::time::sleep(POLL_ERROR_BACKOFF) => {}
                    }
                }
            }
        }

        if let Err(e) = source.commit_offsets_if_necessary().await {
            warn!("Final Kafka offset commit failed: {}", e);
        }
        info!("Container-log consumer loop stopped");
        Ok(())
    }

    /// Handle every message of a batch in delivery order.
    pub async fn process_batch<S>(&self, source: &S, batch: Vec<InboundMessage>) -> BatchReport
    where
        S: BatchSource + ?Sized,
    {
        info!("Received messages length {}", batch.len());

        let mut report = BatchReport::default();
        for message in &batch {
            self.metrics.messages_received_total.inc();
            let outcome = self.handle_message(message).await;
            report.record(outcome);
            self.acknowledge(source, message).await;
        }
        report
    }

    async fn handle_message(&self, message: &InboundMessage) -> MessageOutcome {
        let parsed = match decode_payload(message.payload()) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.metrics.parse_failures_total.inc();
                error!(
                    partition = message.partition,
                    offset = message.offset,
                    "Failed to parse message: {}",
                    e
                );
                error!("Message content: {}", raw_content(message.payload()));
                return MessageOutcome::Discarded;
            }
        };

        let event = LogEvent::from_message(parsed);

        match self.sink.insert_log_event(&event).await {
            Ok(()) => {
                self.metrics.events_persisted_total.inc();
                info!(
                    "Successfully processed message for deployment: {}",
                    event.deployment_id
                );
                MessageOutcome::Persisted
            }
            Err(e) => {
                self.metrics.sink_failures_total.inc();
                error!(
                    "ClickHouse insert failed for deployment {}: {}",
                    event.deployment_id, e
                );
                self.park(event)
            }
        }
    }

    fn park(&self, event: LogEvent) -> MessageOutcome {
        let deployment_id = event.deployment_id.clone();

        if self.queue.enqueue(event) {
            let depth = self.queue.len();
            self.metrics.events_queued_total.inc();
            self.metrics.retry_queue_depth.set(depth as i64);
            info!("Added message to failed queue. Queue size: {}", depth);
            MessageOutcome::Queued
        } else {
            self.metrics.events_dropped_total.inc();
            warn!(
                "Failed message queue is full. Dropping message for deployment: {}",
                deployment_id
            );
            MessageOutcome::Dropped
        }
    }

    /// Resolve, commit and heartbeat after a message, regardless of outcome.
    async fn acknowledge<S>(&self, source: &S, message: &InboundMessage)
    where
        S: BatchSource + ?Sized,
    {
        if let Err(e) = source.resolve_offset(message) {
            warn!(
                partition = message.partition,
                offset = message.offset,
                "Failed to resolve Kafka offset: {}",
                e
            );
        }
        if let Err(e) = source.commit_offsets_if_necessary().await {
            warn!(
                partition = message.partition,
                offset = message.offset,
                "Failed to commit Kafka offset: {}",
                e
            );
        }
        if let Err(e) = source.heartbeat().await {
            warn!("Kafka heartbeat failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IngestError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Resolve(i64),
        Commit,
        Heartbeat,
    }

    #[derive(Default)]
    struct ScriptedSource {
        batches: Mutex<VecDeque<Result<Vec<InboundMessage>>>>,
        calls: Mutex<Vec<Call>>,
        pending: Mutex<Option<i64>>,
        committed: Mutex<Vec<i64>>,
    }

    impl ScriptedSource {
        fn with_batches(batches: Vec<Result<Vec<InboundMessage>>>) -> Self {
            Self {
                batches: Mutex::new(batches.into()),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl BatchSource for ScriptedSource {
        async fn next_batch(&self) -> Result<Vec<InboundMessage>> {
            let next = self.batches.lock().pop_front();
            match next {
                Some(batch) => batch,
                None => std::future::pending().await,
            }
        }

        fn resolve_offset(&self, message: &InboundMessage) -> Result<()> {
            self.calls.lock().push(Call::Resolve(message.offset));
            *self.pending.lock() = Some(message.offset);
            Ok(())
        }

        async fn commit_offsets_if_necessary(&self) -> Result<()> {
            self.calls.lock().push(Call::Commit);
            if let Some(offset) = self.pending.lock().take() {
                self.committed.lock().push(offset);
            }
            Ok(())
        }

        async fn heartbeat(&self) -> Result<()> {
            self.calls.lock().push(Call::Heartbeat);
            Ok(())
        }
    }

    /// Sink failing the first `failures` writes
    struct FlakySink {
        failures: Mutex<usize>,
        written: Mutex<Vec<LogEvent>>,
    }

    impl FlakySink {
        fn new(failures: usize) -> Arc<Self> {
            Arc::new(Self {
                failures: Mutex::new(failures),
                written: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LogSink for FlakySink {
        async fn insert_log_event(&self, event: &LogEvent) -> Result<()> {
            let mut failures = self.failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(IngestError::ClickHouse("connection refused".into()));
            }
            self.written.lock().push(event.clone());
            Ok(())
        }
    }

    fn message(offset: i64, payload: &[u8]) -> InboundMessage {
        InboundMessage {
            topic: "container-logs".to_string(),
            partition: 0,
            offset,
            payload: Some(payload.to_vec()),
        }
    }

    const VALID: &[u8] = br#"{"DEPLOYMENT_ID":"d1","log":"build ok","status":"SUCCESS"}"#;

    fn consumer(sink: Arc<FlakySink>, queue: Arc<RetryQueue>) -> BatchConsumer {
        BatchConsumer::new(sink, queue, IngestMetrics::new())
    }

    #[tokio::test]
    async fn successful_write_commits_and_skips_queue() {
        let sink = FlakySink::new(0);
        let queue = Arc::new(RetryQueue::default());
        let source = ScriptedSource::default();

        let report = consumer(sink.clone(), queue.clone())
            .process_batch(&source, vec![message(7, VALID)])
            .await;

        assert_eq!(report.persisted, 1);
        assert!(queue.is_empty());
        assert_eq!(*source.committed.lock(), vec![7]);

        let written = sink.written.lock();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].deployment_id, "d1");
        assert_eq!(written[0].log, "build ok");
        assert_eq!(written[0].status, "SUCCESS");
    }

    #[tokio::test]
    async fn failed_write_is_queued_and_still_committed() {
        let sink = FlakySink::new(1);
        let queue = Arc::new(RetryQueue::default());
        let source = ScriptedSource::default();

        let report = consumer(sink.clone(), queue.clone())
            .process_batch(&source, vec![message(3, VALID)])
            .await;

        assert_eq!(report.queued, 1);
        assert_eq!(queue.len(), 1);
        assert_eq!(*source.committed.lock(), vec![3]);
        assert!(sink.written.lock().is_empty());
    }

    #[tokio::test]
    async fn unparseable_payload_is_committed_without_retry() {
        let sink = FlakySink::new(0);
        let queue = Arc::new(RetryQueue::default());
        let source = ScriptedSource::default();

        let report = consumer(sink.clone(), queue.clone())
            .process_batch(&source, vec![message(11, b"not-json")])
            .await;

        assert_eq!(report.discarded, 1);
        assert!(queue.is_empty());
        assert!(sink.written.lock().is_empty());
        assert_eq!(*source.committed.lock(), vec![11]);
    }

    #[tokio::test]
    async fn full_queue_drops_new_failures() {
        let sink = FlakySink::new(1);
        let queue = Arc::new(RetryQueue::new(2));
        queue.enqueue(LogEvent {
            event_id: "a".into(),
            deployment_id: "d0".into(),
            log: "x".into(),
            status: "RUNNING".into(),
        });
        queue.enqueue(LogEvent {
            event_id: "b".into(),
            deployment_id: "d0".into(),
            log: "y".into(),
            status: "RUNNING".into(),
        });
        let source = ScriptedSource::default();

        let report = consumer(sink, queue.clone())
            .process_batch(&source, vec![message(1, VALID)])
            .await;

        assert_eq!(report.dropped, 1);
        assert_eq!(queue.len(), 2);
        assert_eq!(*source.committed.lock(), vec![1]);
    }

    #[tokio::test]
    async fn every_message_is_resolved_committed_and_heartbeated_in_order() {
        let sink = FlakySink::new(1);
        let queue = Arc::new(RetryQueue::default());
        let source = ScriptedSource::default();

        let batch = vec![message(0, VALID), message(1, b"{}"), message(2, VALID)];
        let report = consumer(sink, queue)
            .process_batch(&source, batch)
            .await;

        assert_eq!(report.total(), 3);
        assert_eq!(
            *source.calls.lock(),
            vec![
                Call::Resolve(0),
                Call::Commit,
                Call::Heartbeat,
                Call::Resolve(1),
                Call::Commit,
                Call::Heartbeat,
                Call::Resolve(2),
                Call::Commit,
                Call::Heartbeat,
            ]
        );
        assert_eq!(*source.committed.lock(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn run_returns_on_connection_loss() {
        let source = ScriptedSource::with_batches(vec![
            Ok(vec![message(0, VALID)]),
            Err(IngestError::KafkaFatal("all brokers down".into())),
        ]);
        let sink = FlakySink::new(0);
        let (_tx, mut rx) = watch::channel(false);

        let err = consumer(sink.clone(), Arc::new(RetryQueue::default()))
            .run(&source, &mut rx)
            .await
            .unwrap_err();

        assert!(err.is_connection_loss());
        assert_eq!(sink.written.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_survives_transient_poll_errors() {
        let source = ScriptedSource::with_batches(vec![
            Err(IngestError::Kafka("poll timed out".into())),
            Ok(vec![message(5, VALID)]),
        ]);
        let sink = FlakySink::new(0);
        let (tx, mut rx) = watch::channel(false);
        let consumer = consumer(sink.clone(), Arc::new(RetryQueue::default()));

        let stop = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            tx.send(true).unwrap();
        };
        let (result, ()) = tokio::join!(consumer.run(&source, &mut rx), stop);

        assert!(result.is_ok());
        assert_eq!(sink.written.lock().len(), 1);
        assert_eq!(*source.committed.lock(), vec![5]);
    }
}
