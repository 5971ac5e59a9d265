use async_trait::async_trait;
use clickhouse::{Client, Row};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error};

use super::LogSink;
use crate::codec::LogEvent;
use crate::config::ClickHouseSettings;
use crate::error::{IngestError, Result};

/// Row struct for the log events table
/// Uses String for the UUID to avoid clickhouse-rs serialization issues
#[derive(Debug, Clone, Row, Serialize)]
pub struct LogEventRow {
    pub event_id: String,
    pub deployment_id: String,
    pub log: String,
    pub status: String,
}

impl From<&LogEvent> for LogEventRow {
    fn from(event: &LogEvent) -> Self {
        Self {
            event_id: event.event_id.clone(),
            deployment_id: event.deployment_id.clone(),
            log: event.log.clone(),
            status: event.status.clone(),
        }
    }
}

/// Writes log events to ClickHouse, one row per insert
#[derive(Clone)]
pub struct ClickHouseLogSink {
    client: Client,
    table: String,
    insert_timeout: Duration,
}

impl ClickHouseLogSink {
    pub fn new(settings: &ClickHouseSettings) -> Self {
        let client = Client::default()
            .with_url(&settings.url)
            .with_database(&settings.database)
            .with_user(&settings.user)
            .with_password(&settings.password);

        Self {
            client,
            table: settings.table.clone(),
            insert_timeout: settings.insert_timeout(),
        }
    }

    async fn write_row(&self, row: &LogEventRow) -> Result<()> {
        let mut insert = self.client.insert::<LogEventRow>(&self.table).map_err(|e| {
            error!("ClickHouse insert preparation error: {}", e);
            IngestError::ClickHouse(e.to_string())
        })?;

        insert.write(row).await.map_err(|e| {
            error!("ClickHouse row write error: {}", e);
            IngestError::ClickHouse(e.to_string())
        })?;

        insert.end().await.map_err(|e| {
            error!("ClickHouse insert error: {}", e);
            IngestError::ClickHouse(e.to_string())
        })
    }
}

#[async_trait]
impl LogSink for ClickHouseLogSink {
    async fn insert_log_event(&self, event: &LogEvent) -> Result<()> {
        let row = LogEventRow::from(event);

        match tokio::time::timeout(self.insert_timeout, self.write_row(&row)).await {
            Ok(result) => result?,
            Err(_) => return Err(IngestError::SinkTimeout(self.insert_timeout)),
        }

        debug!(
            event_id = %row.event_id,
            deployment_id = %row.deployment_id,
            table = %self.table,
            "Inserted log event"
        );
        Ok(())
    }
}
