//! Container log payload decoding
//!
//! Build containers publish one JSON object per log line:
//!
//! ```json
//! {
//!   "DEPLOYMENT_ID": "d1",
//!   "log": "build ok",
//!   "status": "SUCCESS"
//! }
//! ```
//!
//! A payload that is not UTF-8, not a JSON object of that shape, or carries an
//! empty deployment id never becomes a [`LogEvent`].

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("message has no payload")]
    MissingPayload,

    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("payload is not a container log record: {0}")]
    Json(#[from] serde_json::Error),

    #[error("DEPLOYMENT_ID is empty")]
    EmptyDeploymentId,
}

/// Wire shape of a `container-logs` record
#[derive(Debug, Clone, Deserialize)]
pub struct ContainerLogMessage {
    #[serde(rename = "DEPLOYMENT_ID")]
    pub deployment_id: String,
    pub log: String,
    pub status: String,
}

/// A log line on its way to the log store
///
/// Every write attempt carries its own `event_id`: a line written once live and
/// once more from the retry queue arrives at the store under two distinct ids.
/// Deduplication is left to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEvent {
    pub event_id: String,
    pub deployment_id: String,
    pub log: String,
    pub status: String,
}

impl LogEvent {
    pub fn from_message(message: ContainerLogMessage) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            deployment_id: message.deployment_id,
            log: message.log,
            status: message.status,
        }
    }

    /// The same log line under a fresh `event_id`, for another write attempt.
    pub fn next_attempt(self) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            ..self
        }
    }
}

/// Decode a raw broker payload into a structured record.
pub fn decode_payload(payload: Option<&[u8]>) -> Result<ContainerLogMessage, DecodeError> {
    let bytes = payload.ok_or(DecodeError::MissingPayload)?;
    let text = std::str::from_utf8(bytes)?;
    let message: ContainerLogMessage = serde_json::from_str(text)?;

    if message.deployment_id.trim().is_empty() {
        return Err(DecodeError::EmptyDeploymentId);
    }

    Ok(message)
}

/// Lossy rendering of a payload for error logs.
pub fn raw_content(payload: Option<&[u8]>) -> String {
    match payload {
        Some(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        None => "<empty>".to_string(),
    }
}
