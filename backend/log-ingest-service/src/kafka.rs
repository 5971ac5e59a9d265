//! Kafka implementation of the broker seam

use async_trait::async_trait;
use parking_lot::Mutex;
use prometheus::IntCounter;
use rdkafka::client::ClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, ConsumerContext, StreamConsumer};
use rdkafka::error::KafkaResult;
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::{Offset, TopicPartitionList};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

use crate::broker::{BatchSource, BrokerConnector, InboundMessage};
use crate::config::KafkaSettings;
use crate::error::{IngestError, Result};
use crate::metrics::IngestMetrics;

type LogConsumer = StreamConsumer<IngestConsumerContext>;
type PendingOffsets = HashMap<(String, i32), i64>;

/// Consumer context reporting the outcome of asynchronous offset commits
pub struct IngestConsumerContext {
    commit_failures: IntCounter,
}

impl ClientContext for IngestConsumerContext {}

impl ConsumerContext for IngestConsumerContext {
    fn commit_callback(&self, result: KafkaResult<()>, offsets: &TopicPartitionList) {
        match result {
            Ok(()) => trace!(partitions = offsets.count(), "Kafka offsets committed"),
            Err(e) => {
                self.commit_failures.inc();
                warn!(
                    partitions = offsets.count(),
                    "Kafka rejected offset commit: {}", e
                );
            }
        }
    }
}

/// Builds subscribed Kafka consumers from [`KafkaSettings`]
pub struct KafkaConnector {
    settings: KafkaSettings,
    ca_location: Option<PathBuf>,
    metrics: IngestMetrics,
}

impl KafkaConnector {
    /// Create a connector, writing the CA certificate to disk when one is configured.
    pub fn new(settings: KafkaSettings, metrics: IngestMetrics) -> Result<Self> {
        let ca_location = match settings.cert.as_deref() {
            Some(pem) if !pem.trim().is_empty() => {
                let path = PathBuf::from(&settings.cert_path);
                std::fs::write(&path, pem)?;
                info!(path = %path.display(), "Wrote Kafka CA certificate");
                Some(path)
            }
            _ => None,
        };

        Ok(Self {
            settings,
            ca_location,
            metrics,
        })
    }

    pub fn client_config(&self) -> ClientConfig {
        let s = &self.settings;
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", s.broker_list().join(","))
            .set("client.id", &s.client_id)
            .set("group.id", &s.group_id)
            // Offsets are committed explicitly after every message
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", s.session_timeout_ms.to_string())
            .set("heartbeat.interval.ms", s.heartbeat_interval_ms.to_string())
            .set("max.poll.interval.ms", s.max_poll_interval_ms.to_string())
            .set(
                "socket.connection.setup.timeout.ms",
                s.connection_timeout_ms.to_string(),
            )
            .set("socket.timeout.ms", s.request_timeout_ms.to_string())
            .set("retry.backoff.ms", s.retry_backoff_ms.to_string())
            .set("reconnect.backoff.ms", s.retry_backoff_ms.to_string())
            .set("enable.partition.eof", "false");

        if s.sasl_enabled() {
            config
                .set("security.protocol", "SASL_SSL")
                .set("sasl.mechanisms", "PLAIN")
                .set("sasl.username", s.username.as_deref().unwrap_or_default())
                .set("sasl.password", s.password.as_deref().unwrap_or_default())
                .set(
                    "enable.ssl.certificate.verification",
                    s.ssl_verify.to_string(),
                );
        }

        if let Some(path) = &self.ca_location {
            config.set("ssl.ca.location", path.to_string_lossy());
        }

        config
    }
}

#[async_trait]
impl BrokerConnector for KafkaConnector {
    type Source = KafkaBatchSource;

    async fn connect(&self) -> Result<KafkaBatchSource> {
        info!(
            brokers = %self.settings.brokers,
            group_id = %self.settings.group_id,
            topic = %self.settings.topic,
            "Connecting to Kafka"
        );

        let context = IngestConsumerContext {
            commit_failures: self.metrics.commit_failures_total.clone(),
        };
        let consumer: LogConsumer = self
            .client_config()
            .create_with_context(context)
            .map_err(|e| {
                error!("Failed to create Kafka consumer: {}", e);
                IngestError::Kafka(e.to_string())
            })?;

        // Creating the client does not touch the network; probe the cluster
        // so an unreachable broker fails here instead of in the first poll.
        let topic = self.settings.topic.clone();
        let timeout = self.settings.connection_timeout();
        let consumer = tokio::task::spawn_blocking(move || {
            let probe = probe_topic(&consumer, &topic, timeout);
            probe.map(|()| consumer)
        })
        .await
        .map_err(|e| IngestError::Internal(format!("Kafka metadata probe panicked: {}", e)))??;

        consumer.subscribe(&[self.settings.topic.as_str()]).map_err(|e| {
            error!("Failed to subscribe to topic: {}", e);
            IngestError::Kafka(e.to_string())
        })?;

        info!(topic = %self.settings.topic, "Kafka consumer subscribed");

        Ok(KafkaBatchSource {
            consumer,
            max_batch_size: self.settings.max_batch_size,
            batch_linger: self.settings.batch_linger(),
            resolved: Mutex::new(HashMap::new()),
        })
    }
}

fn probe_topic(consumer: &LogConsumer, topic: &str, timeout: Duration) -> Result<()> {
    let metadata = consumer.fetch_metadata(Some(topic), timeout).map_err(|e| {
        error!("Failed to fetch Kafka metadata: {}", e);
        IngestError::Kafka(e.to_string())
    })?;

    match metadata.topics().iter().find(|t| t.name() == topic) {
        Some(t) => match t.error() {
            Some(code) => Err(IngestError::Kafka(format!(
                "topic {} unavailable: {:?}",
                topic, code
            ))),
            None => {
                debug!(
                    topic = %topic,
                    partitions = t.partitions().len(),
                    "Kafka topic metadata fetched"
                );
                Ok(())
            }
        },
        None => Err(IngestError::Kafka(format!(
            "topic {} missing from broker metadata",
            topic
        ))),
    }
}

/// A subscribed consumer delivering messages in small batches
pub struct KafkaBatchSource {
    consumer: LogConsumer,
    max_batch_size: usize,
    batch_linger: Duration,
    /// Next offset to commit per (topic, partition), awaiting commit
    resolved: Mutex<PendingOffsets>,
}

/// Put offsets back for the next commit, keeping the highest per partition.
fn merge_pending(resolved: &mut PendingOffsets, pending: PendingOffsets) {
    for (key, next) in pending {
        let entry = resolved.entry(key).or_insert(next);
        *entry = (*entry).max(next);
    }
}

fn partition_list(pending: &PendingOffsets) -> KafkaResult<TopicPartitionList> {
    let mut tpl = TopicPartitionList::new();
    for ((topic, partition), next) in pending {
        tpl.add_partition_offset(topic, *partition, Offset::Offset(*next))?;
    }
    Ok(tpl)
}

impl KafkaBatchSource {
    fn detach(msg: &BorrowedMessage<'_>) -> InboundMessage {
        InboundMessage {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            payload: msg.payload().map(<[u8]>::to_vec),
        }
    }

    fn classify(&self, err: rdkafka::error::KafkaError) -> IngestError {
        match self.consumer.client().fatal_error() {
            Some((code, reason)) => {
                IngestError::KafkaFatal(format!("{:?}: {} ({})", code, reason, err))
            }
            None => IngestError::Kafka(err.to_string()),
        }
    }
}

#[async_trait]
impl BatchSource for KafkaBatchSource {
    async fn next_batch(&self) -> Result<Vec<InboundMessage>> {
        let mut batch = {
            let first = self.consumer.recv().await.map_err(|e| self.classify(e))?;
            vec![Self::detach(&first)]
        };

        while batch.len() < self.max_batch_size {
            match tokio::time::timeout(self.batch_linger, self.consumer.recv()).await {
                Ok(Ok(msg)) => batch.push(Self::detach(&msg)),
                Ok(Err(e)) => {
                    warn!("Kafka error while filling batch: {}", e);
                    break;
                }
                Err(_) => break,
            }
        }

        Ok(batch)
    }

    fn resolve_offset(&self, message: &InboundMessage) -> Result<()> {
        let mut resolved = self.resolved.lock();
        let next = resolved
            .entry((message.topic.clone(), message.partition))
            .or_insert(message.offset + 1);
        *next = (*next).max(message.offset + 1);
        Ok(())
    }

    async fn commit_offsets_if_necessary(&self) -> Result<()> {
        let pending = std::mem::take(&mut *self.resolved.lock());
        if pending.is_empty() {
            return Ok(());
        }

        // Only local failures surface here; broker-side rejections of an
        // async commit arrive in IngestConsumerContext::commit_callback.
        let committed = partition_list(&pending)
            .and_then(|tpl| self.consumer.commit(&tpl, CommitMode::Async));

        if let Err(e) = committed {
            let partitions = pending.len();
            merge_pending(&mut self.resolved.lock(), pending);
            debug!(partitions, "Kept Kafka offsets for the next commit");
            return Err(self.classify(e));
        }

        trace!(partitions = pending.len(), "Queued Kafka offset commit");
        Ok(())
    }

    async fn heartbeat(&self) -> Result<()> {
        // librdkafka sends group heartbeats from its own thread; surface a
        // client that has entered a fatal state instead of sending one.
        match self.consumer.client().fatal_error() {
            Some((code, reason)) => Err(IngestError::KafkaFatal(format!(
                "{:?}: {}",
                code, reason
            ))),
            None => Ok(()),
        }
    }
}
