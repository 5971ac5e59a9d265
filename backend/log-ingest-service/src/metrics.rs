use prometheus::{Encoder, IntCounter, IntGauge, TextEncoder};

/// Metrics for log ingestion monitoring
#[derive(Clone)]
pub struct IngestMetrics {
    /// Total messages delivered by the broker
    pub messages_received_total: IntCounter,
    /// Log events written on the first attempt
    pub events_persisted_total: IntCounter,
    /// Payloads discarded because they could not be decoded
    pub parse_failures_total: IntCounter,
    /// First-attempt sink write failures
    pub sink_failures_total: IntCounter,
    /// Events accepted into the retry queue (first failure and re-queues)
    pub events_queued_total: IntCounter,
    /// Events dropped because the retry queue was full
    pub events_dropped_total: IntCounter,
    /// Queued events written by the drain scheduler
    pub retry_succeeded_total: IntCounter,
    /// Queued events whose retry write failed again
    pub retry_failed_total: IntCounter,
    /// Broker connection attempts that failed or were lost
    pub reconnects_total: IntCounter,
    /// Asynchronous offset commits rejected by the broker
    pub commit_failures_total: IntCounter,
    /// Current retry queue depth
    pub retry_queue_depth: IntGauge,
    /// Pipeline connection state (1 = running, 0 = otherwise)
    pub pipeline_running: IntGauge,
}

impl IngestMetrics {
    pub fn new() -> Self {
        let registry = prometheus::default_registry();

        let counter = |name: &str, help: &str| {
            IntCounter::new(name, help).expect("valid metric name and help text")
        };
        let gauge =
            |name: &str, help: &str| IntGauge::new(name, help).expect("valid metric name and help text");

        let metrics = Self {
            messages_received_total: counter(
                "log_ingest_messages_received_total",
                "Total number of container-log messages received from Kafka",
            ),
            events_persisted_total: counter(
                "log_ingest_events_persisted_total",
                "Total number of log events written on the first attempt",
            ),
            parse_failures_total: counter(
                "log_ingest_parse_failures_total",
                "Total number of container-log messages that could not be decoded",
            ),
            sink_failures_total: counter(
                "log_ingest_sink_failures_total",
                "Total number of first-attempt log store write failures",
            ),
            events_queued_total: counter(
                "log_ingest_events_queued_total",
                "Total number of log events accepted into the retry queue",
            ),
            events_dropped_total: counter(
                "log_ingest_events_dropped_total",
                "Total number of log events dropped because the retry queue was full",
            ),
            retry_succeeded_total: counter(
                "log_ingest_retry_succeeded_total",
                "Total number of queued log events written on retry",
            ),
            retry_failed_total: counter(
                "log_ingest_retry_failed_total",
                "Total number of retry writes that failed again",
            ),
            reconnects_total: counter(
                "log_ingest_reconnects_total",
                "Total number of scheduled Kafka reconnect attempts",
            ),
            commit_failures_total: counter(
                "log_ingest_commit_failures_total",
                "Total number of Kafka offset commits rejected by the broker",
            ),
            retry_queue_depth: gauge(
                "log_ingest_retry_queue_depth",
                "Current number of log events waiting in the retry queue",
            ),
            pipeline_running: gauge(
                "log_ingest_pipeline_running",
                "Kafka pipeline state (1 = running, 0 = connecting or reconnecting)",
            ),
        };

        // Register all metrics; a second instance in the same process keeps
        // working but is not exported.
        for metric in [
            Box::new(metrics.messages_received_total.clone())
                as Box<dyn prometheus::core::Collector>,
            Box::new(metrics.events_persisted_total.clone()),
            Box::new(metrics.parse_failures_total.clone()),
            Box::new(metrics.sink_failures_total.clone()),
            Box::new(metrics.events_queued_total.clone()),
            Box::new(metrics.events_dropped_total.clone()),
            Box::new(metrics.retry_succeeded_total.clone()),
            Box::new(metrics.retry_failed_total.clone()),
            Box::new(metrics.reconnects_total.clone()),
            Box::new(metrics.commit_failures_total.clone()),
            Box::new(metrics.retry_queue_depth.clone()),
            Box::new(metrics.pipeline_running.clone()),
        ] {
            let _ = registry.register(metric);
        }

        metrics
    }
}

impl Default for IngestMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Render the default registry in the Prometheus text format.
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
