//! In-memory broker and log store used by the pipeline tests

#![allow(dead_code)]

use async_trait::async_trait;
use log_ingest_service::broker::{BatchSource, BrokerConnector, InboundMessage};
use log_ingest_service::codec::LogEvent;
use log_ingest_service::error::{IngestError, Result};
use log_ingest_service::sink::LogSink;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub const TOPIC: &str = "container-logs";

/// Broker-side bookkeeping shared between the test and the pipeline
#[derive(Default)]
pub struct BrokerLog {
    pub resolved: Vec<i64>,
    pub committed: Vec<i64>,
    pub heartbeats: usize,
    pending: Option<i64>,
}

#[derive(Clone)]
pub struct MemoryBroker {
    batches: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<InboundMessage>>>>,
    sender: mpsc::UnboundedSender<Vec<InboundMessage>>,
    pub log: Arc<Mutex<BrokerLog>>,
    next_offset: Arc<AtomicUsize>,
    failures_left: Arc<AtomicUsize>,
    pub connect_attempts: Arc<AtomicUsize>,
}

impl MemoryBroker {
    /// A broker that refuses the first `failures` connection attempts.
    pub fn new(failures: usize) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            batches: Arc::new(tokio::sync::Mutex::new(receiver)),
            sender,
            log: Arc::new(Mutex::new(BrokerLog::default())),
            next_offset: Arc::new(AtomicUsize::new(0)),
            failures_left: Arc::new(AtomicUsize::new(failures)),
            connect_attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Publish one batch; returns the offsets assigned to its messages.
    pub fn publish(&self, payloads: &[&[u8]]) -> Vec<i64> {
        let batch: Vec<InboundMessage> = payloads
            .iter()
            .map(|payload| InboundMessage {
                topic: TOPIC.to_string(),
                partition: 0,
                offset: self.next_offset.fetch_add(1, Ordering::SeqCst) as i64,
                payload: Some(payload.to_vec()),
            })
            .collect();
        let offsets = batch.iter().map(|m| m.offset).collect();
        self.sender.send(batch).expect("broker receiver alive");
        offsets
    }

    pub fn committed(&self) -> Vec<i64> {
        self.log.lock().committed.clone()
    }
}

pub struct MemorySource {
    broker: MemoryBroker,
}

#[async_trait]
impl BatchSource for MemorySource {
    async fn next_batch(&self) -> Result<Vec<InboundMessage>> {
        let mut batches = self.broker.batches.lock().await;
        match batches.recv().await {
            Some(batch) => Ok(batch),
            None => std::future::pending().await,
        }
    }

    fn resolve_offset(&self, message: &InboundMessage) -> Result<()> {
        let mut log = self.broker.log.lock();
        log.resolved.push(message.offset);
        log.pending = Some(message.offset);
        Ok(())
    }

    async fn commit_offsets_if_necessary(&self) -> Result<()> {
        let mut log = self.broker.log.lock();
        if let Some(offset) = log.pending.take() {
            log.committed.push(offset);
        }
        Ok(())
    }

    async fn heartbeat(&self) -> Result<()> {
        self.broker.log.lock().heartbeats += 1;
        Ok(())
    }
}

#[async_trait]
impl BrokerConnector for MemoryBroker {
    type Source = MemorySource;

    async fn connect(&self) -> Result<MemorySource> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(IngestError::Kafka(
                "Connection error: broker transport failure".into(),
            ));
        }
        Ok(MemorySource {
            broker: self.clone(),
        })
    }
}

/// Log store that can be switched on and off, or slowed down
#[derive(Default)]
pub struct MemorySink {
    available: AtomicBool,
    write_delay: Mutex<Duration>,
    pub attempts: AtomicUsize,
    /// `event_id` of every write attempt, successful or not
    pub attempted_ids: Mutex<Vec<String>>,
    pub written: Mutex<Vec<LogEvent>>,
}

impl MemorySink {
    pub fn new(available: bool) -> Arc<Self> {
        Arc::new(Self {
            available: AtomicBool::new(available),
            ..Default::default()
        })
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn set_write_delay(&self, delay: Duration) {
        *self.write_delay.lock() = delay;
    }

    pub fn written_count(&self) -> usize {
        self.written.lock().len()
    }
}

#[async_trait]
impl LogSink for MemorySink {
    async fn insert_log_event(&self, event: &LogEvent) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.attempted_ids.lock().push(event.event_id.clone());

        let delay = *self.write_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if !self.available.load(Ordering::SeqCst) {
            return Err(IngestError::ClickHouse("Connection refused".into()));
        }
        self.written.lock().push(event.clone());
        Ok(())
    }
}

/// Poll `condition` on the (paused) clock until it holds or `limit` elapses.
pub async fn eventually<F>(limit: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let step = Duration::from_millis(10);
    let mut waited = Duration::ZERO;
    while waited < limit {
        if condition() {
            return true;
        }
        tokio::time::sleep(step).await;
        waited += step;
    }
    condition()
}

pub fn log_event(n: usize) -> LogEvent {
    LogEvent {
        event_id: format!("prefill-{}", n),
        deployment_id: "d0".to_string(),
        log: format!("line {}", n),
        status: "RUNNING".to_string(),
    }
}
