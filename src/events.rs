//! Commands received from and events reported to the control server

use serde_json::{Map, Value};

/// A command for one capability, decoded from an inbound event
#[derive(Debug, Clone, PartialEq)]
pub struct InboundCommand {
    pub capability: String,
    pub command: String,
    /// Every field of the inbound payload except `command`
    pub payload: Map<String, Value>,
}

impl InboundCommand {
    /// Decode an inbound event payload (`{command, ...}`) for a capability
    ///
    /// A missing or non-string `command` yields an empty command, which the
    /// dispatcher rejects
    #[must_use]
    pub fn from_payload(capability: &str, payload: Value) -> Self {
        let mut fields = match payload {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        let command = match fields.remove("command") {
            Some(Value::String(s)) => s,
            _ => String::new(),
        };

        Self {
            capability: capability.to_string(),
            command,
            payload: fields,
        }
    }
}

/// Event produced by handling a command
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundEvent {
    /// A capability changed state (e.g. LED on)
    StatusUpdate {
        device_id: String,
        capability: String,
        state: String,
        timestamp: f64,
    },
    /// A capability produced an artifact (base64-encoded)
    ArtifactResult {
        device_id: String,
        capability: String,
        data: String,
        timestamp: f64,
    },
    /// A command could not be carried out
    OperationError {
        device_id: String,
        capability: String,
        message: String,
        timestamp: f64,
    },
}

impl OutboundEvent {
    /// Build an `OperationError` stamped with the current time
    #[must_use]
    pub fn error(device_id: &str, capability: &str, message: impl Into<String>) -> Self {
        Self::OperationError {
            device_id: device_id.to_string(),
            capability: capability.to_string(),
            message: message.into(),
            timestamp: now_timestamp(),
        }
    }

    /// Capability this event reports on
    #[must_use]
    pub fn capability(&self) -> &str {
        match self {
            Self::StatusUpdate { capability, .. }
            | Self::ArtifactResult { capability, .. }
            | Self::OperationError { capability, .. } => capability,
        }
    }

    /// Wire payload: always `piId` and `timestamp`, plus the event field
    #[must_use]
    pub fn to_payload(&self) -> Value {
        match self {
            Self::StatusUpdate {
                device_id,
                state,
                timestamp,
                ..
            } => serde_json::json!({
                "piId": device_id,
                "status": state,
                "timestamp": timestamp,
            }),
            Self::ArtifactResult {
                device_id,
                data,
                timestamp,
                ..
            } => serde_json::json!({
                "piId": device_id,
                "photo": data,
                "timestamp": timestamp,
            }),
            Self::OperationError {
                device_id,
                message,
                timestamp,
                ..
            } => serde_json::json!({
                "piId": device_id,
                "error": message,
                "timestamp": timestamp,
            }),
        }
    }
}

/// Current time as fractional UNIX seconds
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn now_timestamp() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}
