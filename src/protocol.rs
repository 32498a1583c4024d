//! Wire protocol between the hub and dashboard clients
//!
//! Everything sent to a client is an [`Envelope`], serialized as a single JSON
//! text frame:
//!
//! ```text
//! { "type": "alert", "topic": "alerts", "data": {...}, "timestamp": "2025-01-01T00:00:00Z", "id": "..." }
//! ```
//!
//! Inbound frames are decoded into the closed [`ClientMessage`] set. Kinds the
//! hub does not know decode to [`ClientMessage::Unknown`] so that newer
//! dashboards can talk to older hubs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use uuid::Uuid;

/// Well-known topic names used by the monitoring pipeline
pub mod topics {
    pub const ALERTS: &str = "alerts";
    pub const METRICS: &str = "metrics";
    pub const SYSTEM: &str = "system";
}

/// Errors produced while decoding inbound frames
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame was not valid JSON or did not match the expected shape
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A control message arrived without its `data` payload
    #[error("'{0}' message is missing its data payload")]
    MissingData(&'static str),
}

/// Outbound message kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    System,
    Alert,
    Metrics,
    Pong,
}

impl std::fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            EnvelopeKind::System => "system",
            EnvelopeKind::Alert => "alert",
            EnvelopeKind::Metrics => "metrics",
            EnvelopeKind::Pong => "pong",
        };
        f.write_str(kind)
    }
}

/// Severity of a system notice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// Severity of a fired alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Free-form operator notice (maintenance windows, hub restarts, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemNotice {
    pub level: NoticeLevel,
    pub title: String,
    pub content: String,
}

impl SystemNotice {
    pub fn new(level: NoticeLevel, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            level,
            title: title.into(),
            content: content.into(),
        }
    }
}

/// Alert raised by the alert engine
///
/// `alert` and `rule` are the engine's own records and are forwarded as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertNotice {
    pub alert: Value,
    pub rule: Value,
    pub severity: Severity,
    pub message: String,
}

/// Batch of metrics collected for one monitoring target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsUpdate {
    pub target_id: String,
    pub target_name: String,
    pub metrics: Value,
    pub timestamp: DateTime<Utc>,
}

/// A single outbound message
///
/// Envelopes are immutable once built; every instance carries a fresh id that
/// clients use for deduplication and ack correlation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    kind: EnvelopeKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    topic: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Value>,

    timestamp: DateTime<Utc>,

    id: String,
}

impl Envelope {
    pub fn new(kind: EnvelopeKind, topic: Option<String>, data: Option<Value>) -> Self {
        Self {
            kind,
            topic,
            data,
            timestamp: Utc::now(),
            id: Uuid::new_v4().to_string(),
        }
    }

    /// System notice, not bound to a topic
    pub fn system(notice: &SystemNotice) -> Self {
        Self::new(
            EnvelopeKind::System,
            None,
            Some(json!({
                "level": notice.level,
                "title": notice.title,
                "content": notice.content,
            })),
        )
    }

    /// Alert notice on the `alerts` topic
    pub fn alert(notice: &AlertNotice) -> Self {
        Self::new(
            EnvelopeKind::Alert,
            Some(topics::ALERTS.to_string()),
            Some(json!({
                "alert": notice.alert,
                "rule": notice.rule,
                "severity": notice.severity,
                "message": notice.message,
            })),
        )
    }

    /// Metrics update on the `metrics` topic
    pub fn metrics(update: &MetricsUpdate) -> Self {
        Self::new(
            EnvelopeKind::Metrics,
            Some(topics::METRICS.to_string()),
            Some(json!({
                "targetId": update.target_id,
                "targetName": update.target_name,
                "metrics": update.metrics,
                "timestamp": update.timestamp.to_rfc3339(),
            })),
        )
    }

    /// Reply to a client `ping`
    pub fn pong(id: Option<String>) -> Self {
        Self::new(EnvelopeKind::Pong, None, Some(json!({ "id": id })))
    }

    /// Greeting unicast to a client right after it was admitted
    pub fn welcome(client_id: impl std::fmt::Display, user_id: Option<&str>) -> Self {
        Self::new(
            EnvelopeKind::System,
            None,
            Some(json!({
                "level": NoticeLevel::Info,
                "title": "welcome",
                "content": "connected to notification hub",
                "clientId": client_id.to_string(),
                "userId": user_id,
            })),
        )
    }

    pub fn kind(&self) -> EnvelopeKind {
        self.kind
    }

    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Serialize into the JSON text frame sent over the wire
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Decoded inbound control message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Subscribe { topics: Vec<String> },
    Unsubscribe { topics: Vec<String> },
    Ping { id: Option<String> },
    Unknown(String),
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(rename = "type")]
    kind: String,

    #[serde(default)]
    data: Option<Value>,

    #[serde(default)]
    id: Option<Value>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum SubscriptionAction {
    #[default]
    Subscribe,
    Unsubscribe,
}

#[derive(Debug, Deserialize)]
struct SubscriptionControl {
    #[serde(default)]
    action: SubscriptionAction,

    #[serde(default)]
    topics: Vec<String>,
}

impl ClientMessage {
    /// Decode a text frame received from a client
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let raw: RawMessage = serde_json::from_str(text)?;

        match raw.kind.as_str() {
            "subscribe" | "unsubscribe" => {
                let data = raw.data.ok_or(if raw.kind == "subscribe" {
                    ProtocolError::MissingData("subscribe")
                } else {
                    ProtocolError::MissingData("unsubscribe")
                })?;
                let control: SubscriptionControl = serde_json::from_value(data)?;

                // the shorthand `unsubscribe` kind wins over a missing action
                let action = if raw.kind == "unsubscribe" {
                    SubscriptionAction::Unsubscribe
                } else {
                    control.action
                };

                let topics = normalize_topics(control.topics);
                Ok(match action {
                    SubscriptionAction::Subscribe => ClientMessage::Subscribe { topics },
                    SubscriptionAction::Unsubscribe => ClientMessage::Unsubscribe { topics },
                })
            }
            "ping" => {
                let id = raw
                    .id
                    .or_else(|| raw.data.and_then(|data| data.get("id").cloned()))
                    .and_then(id_to_string);
                Ok(ClientMessage::Ping { id })
            }
            _ => Ok(ClientMessage::Unknown(raw.kind)),
        }
    }
}

fn normalize_topics(topics: Vec<String>) -> Vec<String> {
    topics
        .into_iter()
        .map(|topic| topic.trim().to_string())
        .filter(|topic| !topic.is_empty())
        .collect()
}

fn id_to_string(id: Value) -> Option<String> {
    match id {
        Value::Null => None,
        Value::String(id) => Some(id),
        other => Some(other.to_string()),
    }
}
