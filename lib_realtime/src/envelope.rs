//! # Envelope
//!
//! The `{type, payload, timestamp?}` wire unit exchanged over the connection.
//! Inbound frames keep their fully decoded body next to the extracted payload
//! so dialect-specific siblings (the server-native notification `metadata`,
//! for instance) remain reachable by consumers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Reasons an inbound frame is not an envelope.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The frame is not valid JSON.
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// The frame is JSON but not an object.
    #[error("frame is not a JSON object")]
    NotAnObject,
    /// The `type` discriminator is missing or not a string.
    #[error("frame has no string `type` field")]
    MissingType,
}

/// # Envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Event type discriminator.
    #[serde(rename = "type")]
    pub kind: String,
    /// Event data. For inbound frames without a `payload` field this is the
    /// whole decoded body.
    #[serde(default)]
    pub payload: Value,
    /// Optional RFC 3339 timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// The decoded inbound frame. Never serialized.
    #[serde(skip)]
    pub raw: Value,
}

impl Envelope {
    /// Builds an outbound envelope.
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
            timestamp: None,
            raw: Value::Null,
        }
    }

    /// Builds the envelope for an internally generated event (`connected`,
    /// `disconnected`), stamped with the current time.
    pub fn local(kind: impl Into<String>, payload: Value) -> Self {
        let mut envelope = Self::new(kind, payload);
        envelope.timestamp = Some(chrono::Utc::now().to_rfc3339());
        envelope.raw = envelope.to_value();
        envelope
    }

    /// Decodes an inbound text frame.
    pub fn parse(text: &str) -> Result<Self, EnvelopeError> {
        let raw: Value = serde_json::from_str(text)?;
        Self::from_value(raw)
    }

    /// Decodes an already parsed frame.
    pub fn from_value(raw: Value) -> Result<Self, EnvelopeError> {
        let object = raw.as_object().ok_or(EnvelopeError::NotAnObject)?;
        let kind = object
            .get("type")
            .and_then(Value::as_str)
            .ok_or(EnvelopeError::MissingType)?
            .to_string();
        let payload = match object.get("payload") {
            Some(payload) => payload.clone(),
            None => raw.clone(),
        };
        let timestamp = object
            .get("timestamp")
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(Self {
            kind,
            payload,
            timestamp,
            raw,
        })
    }

    /// Serializes for the wire, stamping the current time when no timestamp is set.
    pub fn to_wire(&self) -> Result<String, serde_json::Error> {
        let mut out = Map::new();
        out.insert("type".into(), Value::String(self.kind.clone()));
        out.insert("payload".into(), self.payload.clone());
        let timestamp = self
            .timestamp
            .clone()
            .unwrap_or_else(|| chrono::Utc::now().to_rfc3339());
        out.insert("timestamp".into(), Value::String(timestamp));
        serde_json::to_string(&out)
    }

    fn to_value(&self) -> Value {
        let mut out = Map::new();
        out.insert("type".into(), Value::String(self.kind.clone()));
        out.insert("payload".into(), self.payload.clone());
        if let Some(ts) = &self.timestamp {
            out.insert("timestamp".into(), Value::String(ts.clone()));
        }
        Value::Object(out)
    }
}
