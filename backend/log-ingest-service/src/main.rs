//! Log Ingest Service - Kafka consumer persisting container logs to ClickHouse
//!
//! Environment variables (see `config.rs` for the full list):
//! - KAFKA_BROKERS: Kafka broker addresses
//! - KAFKA_USERNAME / KAFKA_PASSWORD: SASL/PLAIN credentials (enables SASL_SSL)
//! - KAFKA_CERT: CA certificate PEM, written to KAFKA_CERT_PATH
//! - KAFKA_MAX_BATCH_SIZE / KAFKA_MAX_POLL_INTERVAL_MS: Batch size and poll budget (default: 20 / 300000)
//! - CLICKHOUSE_URL / CLICKHOUSE_DATABASE / CLICKHOUSE_USER / CLICKHOUSE_PASSWORD
//! - INGEST_DRAIN_INTERVAL_SECS: Retry drain period (default: 30)
//! - INGEST_RECONNECT_DELAY_SECS: Delay before reconnecting to Kafka (default: 30)
//! - HTTP_PORT: Health and metrics port (default: 8080)
//! - LOG_FORMAT: `json` for structured logs

use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use log_ingest_service::config::ServiceConfig;
use log_ingest_service::http::{self, HealthState};
use log_ingest_service::kafka::KafkaConnector;
use log_ingest_service::metrics::IngestMetrics;
use log_ingest_service::sink::ClickHouseLogSink;
use log_ingest_service::LogIngestionPipeline;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,log_ingest_service=debug,rdkafka=warn".into());

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    tracing::info!("Starting log-ingest-service");

    let config = ServiceConfig::from_env().context("Failed to load configuration")?;
    tracing::info!(
        kafka = ?config.kafka,
        clickhouse = ?config.clickhouse,
        ingest = ?config.ingest,
        "Configuration loaded"
    );

    let metrics = IngestMetrics::new();
    let sink = Arc::new(ClickHouseLogSink::new(&config.clickhouse));
    let connector = KafkaConnector::new(config.kafka.clone(), metrics.clone())
        .context("Failed to prepare Kafka connector")?;

    let pipeline = LogIngestionPipeline::new(config.ingest.clone(), sink, metrics);
    let handle = pipeline.spawn(connector);

    let health = web::Data::new(HealthState {
        pipeline: handle.subscribe_state(),
    });

    tracing::info!("Starting HTTP server on 0.0.0.0:{}", config.http_port);

    // Runs until SIGINT/SIGTERM
    let served = HttpServer::new(move || {
        App::new()
            .app_data(health.clone())
            .configure(http::configure)
    })
    .workers(1)
    .bind(("0.0.0.0", config.http_port))
    .context("Failed to bind HTTP server")?
    .run()
    .await
    .context("HTTP server error");

    handle.shutdown().await;
    tracing::info!("log-ingest-service stopped");
    served
}
