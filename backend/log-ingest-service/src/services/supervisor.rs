use std::fmt;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

use super::consumer::BatchConsumer;
use crate::broker::BrokerConnector;
use crate::metrics::IngestMetrics;
use crate::shutdown;

/// Connection lifecycle of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// First connection attempt in progress
    Connecting,
    /// Subscribed and consuming
    Running,
    /// Waiting out the reconnect delay, or re-attempting the connection
    Reconnecting,
    /// Shut down
    Stopped,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Connecting => "connecting",
            PipelineState::Running => "running",
            PipelineState::Reconnecting => "reconnecting",
            PipelineState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Keeps the consumer connected
///
/// Any failure of the connect → subscribe → consume sequence is logged and the
/// whole sequence is retried after a fixed delay, forever. There is no backoff
/// growth and no retry cap: a broker outage of any length is ridden out, at
/// the price of probing it every `reconnect_delay`.
pub struct ReconnectSupervisor<C> {
    connector: C,
    consumer: BatchConsumer,
    reconnect_delay: Duration,
    state: watch::Sender<PipelineState>,
    metrics: IngestMetrics,
}

impl<C: BrokerConnector> ReconnectSupervisor<C> {
    pub fn new(
        connector: C,
        consumer: BatchConsumer,
        reconnect_delay: Duration,
        metrics: IngestMetrics,
    ) -> (Self, watch::Receiver<PipelineState>) {
        let (state, state_rx) = watch::channel(PipelineState::Connecting);
        let supervisor = Self {
            connector,
            consumer,
            reconnect_delay,
            state,
            metrics,
        };
        (supervisor, state_rx)
    }

    fn set_state(&self, state: PipelineState) {
        self.metrics
            .pipeline_running
            .set(i64::from(state == PipelineState::Running));
        let previous = self.state.send_replace(state);
        if previous != state {
            info!(from = %previous, to = %state, "Pipeline state changed");
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let connected = tokio::select! {
                _ = shutdown::requested(&mut shutdown) => break,
                connected = self.connector.connect() => connected,
            };

            match connected {
                Ok(source) => {
                    self.set_state(PipelineState::Running);

                    match self.consumer.run(&source, &mut shutdown).await {
                        Ok(()) => {
                            info!("Disconnecting from Kafka");
                            drop(source);
                            break;
                        }
                        Err(e) => {
                            error!("Kafka consumer stopped: {}", e);
                        }
                    }
                }
                Err(e) => {
                    error!("Failed to connect to Kafka: {}", e);
                }
            }

            self.set_state(PipelineState::Reconnecting);
            self.metrics.reconnects_total.inc();
            info!(
                "Retrying Kafka connection in {} seconds...",
                self.reconnect_delay.as_secs()
            );

            tokio::select! {
                _ = shutdown::requested(&mut shutdown) => break,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
            info!("Attempting to reconnect to Kafka...");
        }

        self.set_state(PipelineState::Stopped);
    }
}
