//! Environment-driven configuration
//!
//! Each section is read from prefixed environment variables (`KAFKA_*`,
//! `CLICKHOUSE_*`, `INGEST_*`) with defaults matching the production
//! deployment. A `.env` file is honoured by the binary via `dotenvy`.

use serde::Deserialize;
use std::fmt;
use std::time::Duration;

use crate::error::ConfigError;

/// Kafka consumer configuration
#[derive(Clone, Deserialize)]
pub struct KafkaSettings {
    /// Kafka brokers (comma-separated)
    #[serde(default = "default_brokers")]
    pub brokers: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Consumer group ID
    #[serde(default = "default_group_id")]
    pub group_id: String,
    #[serde(default = "default_topic")]
    pub topic: String,
    /// SASL/PLAIN credentials; SSL is enabled whenever a username is set
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// PEM-encoded CA certificate, written to `cert_path` on startup
    #[serde(default)]
    pub cert: Option<String>,
    #[serde(default = "default_cert_path")]
    pub cert_path: String,
    #[serde(default)]
    pub ssl_verify: bool,
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Longest gap between polls before the group evicts this member
    #[serde(default = "default_max_poll_interval_ms")]
    pub max_poll_interval_ms: u64,
    /// Upper bound on messages gathered into one batch
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// How long to wait for more messages once a batch has started
    #[serde(default = "default_batch_linger_ms")]
    pub batch_linger_ms: u64,
}

fn default_brokers() -> String {
    "localhost:9092".to_string()
}

fn default_client_id() -> String {
    "api-server".to_string()
}

fn default_group_id() -> String {
    "api-server-logs-consumer".to_string()
}

fn default_topic() -> String {
    "container-logs".to_string()
}

fn default_cert_path() -> String {
    "./kafka.pem".to_string()
}

fn default_connection_timeout_ms() -> u64 {
    10_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_session_timeout_ms() -> u64 {
    30_000
}

fn default_heartbeat_interval_ms() -> u64 {
    3_000
}

fn default_retry_backoff_ms() -> u64 {
    100
}

fn default_max_poll_interval_ms() -> u64 {
    300_000
}

fn default_max_batch_size() -> usize {
    20
}

fn default_batch_linger_ms() -> u64 {
    50
}

impl KafkaSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_iter(std::env::vars())
    }

    pub fn from_iter<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let settings: Self = envy::prefixed("KAFKA_").from_iter(vars)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.broker_list().is_empty() {
            return Err(ConfigError::Invalid {
                field: "KAFKA_BROKERS",
                reason: "at least one broker is required".to_string(),
            });
        }
        if self.topic.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "KAFKA_TOPIC",
                reason: "must not be empty".to_string(),
            });
        }
        if self.group_id.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "KAFKA_GROUP_ID",
                reason: "must not be empty".to_string(),
            });
        }
        if self.max_batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "KAFKA_MAX_BATCH_SIZE",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.max_poll_interval_ms < self.session_timeout_ms {
            return Err(ConfigError::Invalid {
                field: "KAFKA_MAX_POLL_INTERVAL_MS",
                reason: format!(
                    "must not be lower than the session timeout ({} ms)",
                    self.session_timeout_ms
                ),
            });
        }
        if self.heartbeat_interval_ms >= self.session_timeout_ms {
            return Err(ConfigError::Invalid {
                field: "KAFKA_HEARTBEAT_INTERVAL_MS",
                reason: format!(
                    "must be lower than the session timeout ({} ms)",
                    self.session_timeout_ms
                ),
            });
        }
        Ok(())
    }

    pub fn broker_list(&self) -> Vec<&str> {
        self.brokers
            .split(',')
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .collect()
    }

    pub fn sasl_enabled(&self) -> bool {
        self.username.as_deref().is_some_and(|u| !u.is_empty())
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn batch_linger(&self) -> Duration {
        Duration::from_millis(self.batch_linger_ms)
    }

    pub fn max_poll_interval(&self) -> Duration {
        Duration::from_millis(self.max_poll_interval_ms)
    }
}

impl fmt::Debug for KafkaSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KafkaSettings")
            .field("brokers", &self.brokers)
            .field("client_id", &self.client_id)
            .field("group_id", &self.group_id)
            .field("topic", &self.topic)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("cert", &self.cert.as_ref().map(|_| "<redacted>"))
            .field("cert_path", &self.cert_path)
            .field("ssl_verify", &self.ssl_verify)
            .field("session_timeout_ms", &self.session_timeout_ms)
            .field("heartbeat_interval_ms", &self.heartbeat_interval_ms)
            .field("max_poll_interval_ms", &self.max_poll_interval_ms)
            .field("max_batch_size", &self.max_batch_size)
            .finish_non_exhaustive()
    }
}

/// ClickHouse sink configuration
#[derive(Clone, Deserialize)]
pub struct ClickHouseSettings {
    #[serde(default = "default_clickhouse_url")]
    pub url: String,
    #[serde(default = "default_clickhouse_database")]
    pub database: String,
    #[serde(default = "default_clickhouse_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_clickhouse_table")]
    pub table: String,
    #[serde(default = "default_insert_timeout_ms")]
    pub insert_timeout_ms: u64,
}

fn default_clickhouse_url() -> String {
    "http://localhost:8123".to_string()
}

fn default_clickhouse_database() -> String {
    "default".to_string()
}

fn default_clickhouse_user() -> String {
    "default".to_string()
}

fn default_clickhouse_table() -> String {
    "log_events".to_string()
}

fn default_insert_timeout_ms() -> u64 {
    10_000
}

impl ClickHouseSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_iter(std::env::vars())
    }

    pub fn from_iter<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let settings: Self = envy::prefixed("CLICKHOUSE_").from_iter(vars)?;
        if settings.table.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "CLICKHOUSE_TABLE",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(settings)
    }

    pub fn insert_timeout(&self) -> Duration {
        Duration::from_millis(self.insert_timeout_ms)
    }
}

impl fmt::Debug for ClickHouseSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClickHouseSettings")
            .field("url", &self.url)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("table", &self.table)
            .field("insert_timeout_ms", &self.insert_timeout_ms)
            .finish_non_exhaustive()
    }
}

/// Retry queue and scheduling knobs for the pipeline
#[derive(Debug, Clone, Deserialize)]
pub struct IngestSettings {
    #[serde(default = "default_retry_capacity")]
    pub retry_capacity: usize,
    #[serde(default = "default_drain_interval_secs")]
    pub drain_interval_secs: u64,
    #[serde(default = "default_drain_batch_size")]
    pub drain_batch_size: usize,
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
}

fn default_retry_capacity() -> usize {
    crate::services::retry_queue::MAX_FAILED
}

fn default_drain_interval_secs() -> u64 {
    30
}

fn default_drain_batch_size() -> usize {
    10
}

fn default_reconnect_delay_secs() -> u64 {
    30
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            retry_capacity: default_retry_capacity(),
            drain_interval_secs: default_drain_interval_secs(),
            drain_batch_size: default_drain_batch_size(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
        }
    }
}

impl IngestSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_iter(std::env::vars())
    }

    pub fn from_iter<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let settings: Self = envy::prefixed("INGEST_").from_iter(vars)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let checks: [(&'static str, bool); 4] = [
            ("INGEST_RETRY_CAPACITY", self.retry_capacity == 0),
            ("INGEST_DRAIN_INTERVAL_SECS", self.drain_interval_secs == 0),
            ("INGEST_DRAIN_BATCH_SIZE", self.drain_batch_size == 0),
            ("INGEST_RECONNECT_DELAY_SECS", self.reconnect_delay_secs == 0),
        ];
        for (field, is_zero) in checks {
            if is_zero {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_secs(self.drain_interval_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct HttpSettings {
    #[serde(default = "default_http_port")]
    http_port: u16,
}

fn default_http_port() -> u16 {
    8080
}

/// Complete service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub kafka: KafkaSettings,
    pub clickhouse: ClickHouseSettings,
    pub ingest: IngestSettings,
    pub http_port: u16,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_iter(std::env::vars().collect::<Vec<_>>())
    }

    pub fn from_iter(vars: Vec<(String, String)>) -> Result<Self, ConfigError> {
        let http: HttpSettings = envy::from_iter(vars.clone())?;
        let config = Self {
            kafka: KafkaSettings::from_iter(vars.clone())?,
            clickhouse: ClickHouseSettings::from_iter(vars.clone())?,
            ingest: IngestSettings::from_iter(vars)?,
            http_port: http.http_port,
        };
        config.validate_poll_budget()?;
        Ok(config)
    }

    /// A batch is processed without polling, so the slowest possible batch
    /// (every insert hitting its timeout) must finish inside the poll interval.
    fn validate_poll_budget(&self) -> Result<(), ConfigError> {
        let worst_case = self.worst_case_batch_duration();
        let limit = self.kafka.max_poll_interval();
        if worst_case >= limit {
            return Err(ConfigError::Invalid {
                field: "KAFKA_MAX_BATCH_SIZE",
                reason: format!(
                    "{} messages x {} ms insert timeout = {} ms, must stay below \
                     KAFKA_MAX_POLL_INTERVAL_MS ({} ms)",
                    self.kafka.max_batch_size,
                    self.clickhouse.insert_timeout_ms,
                    worst_case.as_millis(),
                    limit.as_millis()
                ),
            });
        }
        Ok(())
    }

    pub fn worst_case_batch_duration(&self) -> Duration {
        self.clickhouse
            .insert_timeout()
            .saturating_mul(u32::try_from(self.kafka.max_batch_size).unwrap_or(u32::MAX))
    }
}
