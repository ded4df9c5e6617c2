//! # Notification Normalizer
//!
//! Two server dialects deliver notifications:
//!
//! - **flat**: `{"type":"notification","payload":{"type":"warning","title":..,"message":..}}`
//! - **event**: `{"type":"notification","id":..,"occurred_at":..,"event_type":..,
//!   "payload":{..},"metadata":{"source","priority","ttl"?,"correlation_id"?}}`
//!
//! The frame is classified once into [`NotificationSource`] and then reduced to
//! a single [`NotificationRecord`]. Nothing downstream looks at dialect fields.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::envelope::Envelope;

/// Event type carrying notifications.
pub const NOTIFICATION_EVENT: &str = "notification";

/// Title used when neither the payload nor the event type provide one.
pub const FALLBACK_TITLE: &str = "Notification";

/// Reasons a notification frame cannot be normalized.
#[derive(Debug, Error)]
pub enum NormalizeError {
    /// The payload is not a JSON object.
    #[error("notification payload is not an object")]
    NotAnObject,
    /// A field has the wrong JSON type.
    #[error("malformed notification: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// # Notification Kind
///
/// Presentation severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    /// Neutral information.
    #[default]
    Info,
    /// Something completed.
    Success,
    /// Needs attention.
    Warning,
    /// Something failed.
    Error,
}

impl NotificationKind {
    /// Lenient parse; unknown strings yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" => Some(Self::Info),
            "success" => Some(Self::Success),
            "warning" | "warn" => Some(Self::Warning),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server priority of an event-dialect notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Background.
    Low,
    /// Default.
    Normal,
    /// Elevated.
    High,
    /// Highest; always urgent.
    Critical,
}

impl Priority {
    /// Lenient parse; unknown strings yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "normal" | "medium" => Some(Self::Normal),
            "high" => Some(Self::High),
            "critical" | "urgent" => Some(Self::Critical),
            _ => None,
        }
    }

    /// Kind used when the payload does not name one.
    pub fn fallback_kind(&self) -> NotificationKind {
        match self {
            Self::Low | Self::Normal => NotificationKind::Info,
            Self::High => NotificationKind::Warning,
            Self::Critical => NotificationKind::Error,
        }
    }

    /// `true` for the highest level.
    pub fn is_urgent(&self) -> bool {
        matches!(self, Self::Critical)
    }
}

/// Preference category of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationCategory {
    /// Security alerts.
    Security,
    /// System alerts.
    System,
    /// Subscription reminders.
    Subscription,
    /// User mentions and account activity.
    User,
    /// General information; never gated.
    Info,
    /// Anything else; never gated.
    #[serde(other)]
    Other,
}

impl NotificationCategory {
    /// Lenient parse; unknown names map to [`Self::Other`].
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "security" => Self::Security,
            "system" => Self::System,
            "subscription" => Self::Subscription,
            "user" => Self::User,
            "info" => Self::Info,
            _ => Self::Other,
        }
    }
}

/// Fields of a notification as the flat dialect sends them. Event-dialect
/// payloads use the same field names.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct FlatNotification {
    /// `info` | `success` | `warning` | `error`.
    #[serde(rename = "type", alias = "kind")]
    pub kind: Option<String>,
    /// Headline.
    pub title: Option<String>,
    /// Body text.
    #[serde(alias = "body")]
    pub message: Option<String>,
    /// Navigation target.
    pub link: Option<String>,
    /// Preference category.
    pub category: Option<String>,
    /// Explicit urgency.
    pub urgent: Option<bool>,
    /// Priority, when a flat sender includes one.
    pub priority: Option<String>,
}

/// `metadata` object of the event dialect.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct EventMetadata {
    /// Originating service.
    #[serde(deserialize_with = "lenient_string")]
    pub source: Option<String>,
    /// `low` | `normal` | `high` | `critical`.
    #[serde(deserialize_with = "lenient_string")]
    pub priority: Option<String>,
    /// Time to live in seconds.
    #[serde(deserialize_with = "lenient_seconds")]
    pub ttl: Option<u64>,
    /// Correlation id for tracing across services.
    #[serde(deserialize_with = "lenient_string")]
    pub correlation_id: Option<String>,
}

/// The event dialect.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct EventNotification {
    /// Server event id. Numeric ids are kept as their decimal text.
    #[serde(deserialize_with = "lenient_string")]
    pub id: Option<String>,
    /// RFC 3339 time the event happened. Epoch seconds or milliseconds are
    /// converted on decode.
    #[serde(deserialize_with = "lenient_timestamp")]
    pub occurred_at: Option<String>,
    /// Domain event name, e.g. `user.locked`.
    #[serde(deserialize_with = "lenient_string")]
    pub event_type: Option<String>,
    /// Notification fields.
    pub payload: FlatNotification,
    /// Delivery metadata.
    pub metadata: EventMetadata,
}

// Event-dialect envelope fields are optional server metadata. A wrong type
// reads as absent instead of failing the whole notification.

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn lenient_seconds<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Epoch values above this are taken as milliseconds.
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        Value::Number(n) => n
            .as_i64()
            .and_then(|epoch| {
                if epoch.abs() > EPOCH_MILLIS_THRESHOLD {
                    DateTime::<Utc>::from_timestamp_millis(epoch)
                } else {
                    DateTime::<Utc>::from_timestamp(epoch, 0)
                }
            })
            .map(|t| t.to_rfc3339()),
        _ => None,
    })
}

/// # Notification Source
///
/// A notification frame classified by dialect.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationSource {
    /// Flat payload.
    Flat(FlatNotification),
    /// Event envelope with `metadata`.
    Event(EventNotification),
}

impl NotificationSource {
    /// Classifies an inbound `"notification"` envelope. Frames whose body
    /// carries a `metadata` object are the event dialect.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, NormalizeError> {
        let has_metadata = envelope
            .raw
            .get("metadata")
            .is_some_and(Value::is_object);

        if has_metadata {
            let mut event: EventNotification = serde_json::from_value(envelope.raw.clone())?;
            if !envelope.payload.is_object() {
                return Err(NormalizeError::NotAnObject);
            }
            event.payload = serde_json::from_value(envelope.payload.clone())?;
            return Ok(Self::Event(event));
        }

        if !envelope.payload.is_object() {
            return Err(NormalizeError::NotAnObject);
        }
        Ok(Self::Flat(serde_json::from_value(envelope.payload.clone())?))
    }

    /// Reduces either dialect to the canonical record.
    pub fn normalize(self) -> NotificationRecord {
        match self {
            Self::Flat(flat) => {
                let priority = flat.priority.as_deref().and_then(Priority::parse);
                build_record(flat, priority, None, |record| record)
            }
            Self::Event(event) => {
                let priority = event
                    .metadata
                    .priority
                    .as_deref()
                    .or(event.payload.priority.as_deref())
                    .and_then(Priority::parse);
                let EventNotification {
                    id,
                    occurred_at,
                    event_type,
                    payload,
                    metadata,
                } = event;
                build_record(payload, priority, event_type, |mut record| {
                    record.id = id;
                    record.occurred_at = occurred_at
                        .as_deref()
                        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                        .map(|t| t.with_timezone(&Utc));
                    record.source = metadata.source;
                    record.correlation_id = metadata.correlation_id;
                    record
                })
            }
        }
    }
}

fn build_record(
    fields: FlatNotification,
    priority: Option<Priority>,
    event_type: Option<String>,
    finish: impl FnOnce(NotificationRecord) -> NotificationRecord,
) -> NotificationRecord {
    let kind = fields
        .kind
        .as_deref()
        .and_then(NotificationKind::parse)
        .or_else(|| priority.map(|p| p.fallback_kind()))
        .unwrap_or_default();
    let title = non_empty(fields.title)
        .or_else(|| non_empty(event_type))
        .unwrap_or_else(|| FALLBACK_TITLE.to_string());
    let urgent = fields.urgent.unwrap_or(false) || priority.is_some_and(|p| p.is_urgent());

    finish(NotificationRecord {
        kind,
        title,
        body: fields.message.unwrap_or_default(),
        link: non_empty(fields.link),
        category: fields.category.as_deref().map(NotificationCategory::parse),
        urgent,
        id: None,
        occurred_at: None,
        source: None,
        correlation_id: None,
        priority,
    })
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.trim().is_empty())
}

/// # Notification Record
///
/// Canonical notification handed to the presentation channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    /// Severity.
    pub kind: NotificationKind,
    /// Headline.
    pub title: String,
    /// Body text, possibly empty.
    pub body: String,
    /// Navigation target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    /// Preference category.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<NotificationCategory>,
    /// Bypasses quiet hours when the policy allows it.
    #[serde(default)]
    pub urgent: bool,
    /// Server event id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// When the event happened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurred_at: Option<DateTime<Utc>>,
    /// Originating service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Cross-service correlation id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Server priority.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
}

impl NotificationRecord {
    /// Minimal record.
    pub fn new(kind: NotificationKind, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            body: body.into(),
            link: None,
            category: None,
            urgent: false,
            id: None,
            occurred_at: None,
            source: None,
            correlation_id: None,
            priority: None,
        }
    }

    /// Sets the category.
    pub fn with_category(mut self, category: NotificationCategory) -> Self {
        self.category = Some(category);
        self
    }

    /// Marks the record urgent.
    pub fn urgent(mut self) -> Self {
        self.urgent = true;
        self
    }

    /// Normalizes a `"notification"` envelope.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, NormalizeError> {
        Ok(NotificationSource::from_envelope(envelope)?.normalize())
    }
}
