//! # Connection Configuration & State
//!
//! `ConnectionConfig` is supplied on every `connect` and retained for
//! automatic reconnects. `ConnectionState` is owned by the state machine and
//! published to callers as a read-only snapshot.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::core::backoff::BackoffPolicy;
use crate::core::heartbeat::HeartbeatDialect;

/// Endpoint used when nothing else is configured.
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8080/ws";

/// # Connection Configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    /// Server endpoint, without the token query parameter.
    pub url: Url,
    /// Delay before the first reconnect attempt.
    pub reconnect_interval: Duration,
    /// Upper bound for a single reconnect delay. `None` keeps the uncapped
    /// exponential growth.
    pub reconnect_max_delay: Option<Duration>,
    /// Per-attempt growth of the reconnect delay.
    pub reconnect_growth: f64,
    /// Attempts allowed before the connection is declared failed.
    pub max_reconnect_attempts: u32,
    /// Time between heartbeat pings.
    pub heartbeat_interval: Duration,
    /// How long a ping may stay unanswered.
    pub heartbeat_timeout: Duration,
    /// Ping/pong wire shape.
    pub heartbeat_dialect: HeartbeatDialect,
    /// Log every frame at debug level.
    pub debug: bool,
}

impl ConnectionConfig {
    /// Reference defaults for the given endpoint.
    pub fn new(url: Url) -> Self {
        Self {
            url,
            reconnect_interval: Duration::from_millis(3000),
            reconnect_max_delay: None,
            reconnect_growth: crate::core::backoff::GROWTH_FACTOR,
            max_reconnect_attempts: 10,
            heartbeat_interval: Duration::from_millis(30_000),
            heartbeat_timeout: Duration::from_millis(5000),
            heartbeat_dialect: HeartbeatDialect::Generic,
            debug: false,
        }
    }

    /// Parses `url` and applies the reference defaults.
    pub fn parse(url: &str) -> Result<Self, url::ParseError> {
        Ok(Self::new(Url::parse(url)?))
    }

    /// Backoff bounds derived from this configuration.
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            base: self.reconnect_interval,
            factor: self.reconnect_growth,
            max_delay: self.reconnect_max_delay,
        }
    }

    /// The endpoint with `?token=<urlencoded>` appended when a token is present.
    pub fn url_with_token(&self, token: Option<&str>) -> Url {
        let mut url = self.url.clone();
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            url.query_pairs_mut().append_pair("token", token);
        }
        url
    }
}

/// # Connection Status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// No transport, and none scheduled.
    #[default]
    Disconnected,
    /// A transport is being opened.
    Connecting,
    /// The transport is open.
    Connected,
    /// Waiting for the backoff timer before the next attempt.
    Reconnecting,
    /// The transport reported an error. A close usually follows.
    Error,
    /// Reconnect attempts are exhausted. Only a fresh `connect` leaves this state.
    Failed,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Reconnecting => "reconnecting",
            ConnectionStatus::Error => "error",
            ConnectionStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// # Connection State
///
/// Snapshot published by the state machine after every transition.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConnectionState {
    /// Current status.
    pub status: ConnectionStatus,
    /// Reconnects attempted since the last successful open.
    pub reconnect_attempts: u32,
    /// When the transport last opened.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Most recent failure description.
    pub last_error: Option<String>,
}

impl ConnectionState {
    /// `status == Connected`.
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference() {
        let cfg = ConnectionConfig::parse(DEFAULT_ENDPOINT).unwrap();
        assert_eq!(cfg.reconnect_interval, Duration::from_secs(3));
        assert_eq!(cfg.max_reconnect_attempts, 10);
        assert_eq!(cfg.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(cfg.heartbeat_timeout, Duration::from_secs(5));
        assert!(cfg.reconnect_max_delay.is_none());
        assert!(!cfg.debug);
    }

    #[test]
    fn token_is_urlencoded_query_parameter() {
        let cfg = ConnectionConfig::parse("ws://localhost:8080/ws").unwrap();
        let url = cfg.url_with_token(Some("a b&c=d"));
        assert_eq!(url.as_str(), "ws://localhost:8080/ws?token=a+b%26c%3Dd");
        let pairs: Vec<_> = url.query_pairs().collect();
        assert_eq!(pairs[0].1, "a b&c=d");
    }

    #[test]
    fn missing_token_adds_no_query() {
        let cfg = ConnectionConfig::parse("ws://localhost:8080/ws").unwrap();
        assert_eq!(cfg.url_with_token(None).as_str(), "ws://localhost:8080/ws");
        assert_eq!(cfg.url_with_token(Some("")).as_str(), "ws://localhost:8080/ws");
    }

    #[test]
    fn status_display_is_lowercase() {
        assert_eq!(ConnectionStatus::Reconnecting.to_string(), "reconnecting");
        assert_eq!(ConnectionStatus::Failed.to_string(), "failed");
    }
}
