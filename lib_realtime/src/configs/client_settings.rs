use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::core::heartbeat::HeartbeatDialect;
use crate::core::state::{ConnectionConfig, DEFAULT_ENDPOINT};
use crate::notifications::preferences::PreferencePolicy;

#[cfg(feature = "desktop")]
use crate::notifications::channels::SoundFiles;

/// Failures loading or validating client settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The settings file could not be read.
    #[error("cannot read {path}: {source}")]
    Io {
        /// Settings file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The settings file is not valid JSON5 for this schema.
    #[error("cannot parse settings: {0}")]
    Parse(#[from] json5::Error),
    /// The endpoint is not a URL.
    #[error("invalid endpoint {url}: {source}")]
    InvalidUrl {
        /// Offending value.
        url: String,
        /// Parser error.
        #[source]
        source: url::ParseError,
    },
    /// A value is out of range.
    #[error("invalid setting `{field}`: {reason}")]
    Invalid {
        /// camelCase field name.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// # Client Settings
///
/// File representation of the client configuration. Keys are camelCase and
/// every key is optional.
///
/// ```json5
/// {
///   url: "wss://admin.example.com/ws",
///   maxReconnectAttempts: 5,
///   heartbeatDialect: "bare",
///   preferences: { quietHours: { enabled: true } },
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Server endpoint.
    pub url: String,
    /// Base reconnect delay.
    pub reconnect_interval_ms: u64,
    /// Cap for a single reconnect delay.
    pub reconnect_max_delay_ms: Option<u64>,
    /// Per-attempt growth of the reconnect delay.
    pub reconnect_growth: f64,
    /// Attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Time between pings.
    pub heartbeat_interval_ms: u64,
    /// Time a ping may stay unanswered.
    pub heartbeat_timeout_ms: u64,
    /// Ping/pong wire shape.
    pub heartbeat_dialect: HeartbeatDialect,
    /// Per-frame debug logging.
    pub debug: bool,
    /// Environment variable holding the session token.
    pub token_env: Option<String>,
    /// Initial notification preferences.
    pub preferences: PreferencePolicy,
    /// Where edited preferences are persisted.
    pub preferences_path: Option<PathBuf>,
    /// Notification sound files.
    #[cfg(feature = "desktop")]
    pub sounds: SoundFiles,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_ENDPOINT.to_string(),
            reconnect_interval_ms: 3000,
            reconnect_max_delay_ms: None,
            reconnect_growth: crate::core::backoff::GROWTH_FACTOR,
            max_reconnect_attempts: 10,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 5000,
            heartbeat_dialect: HeartbeatDialect::Generic,
            debug: false,
            token_env: None,
            preferences: PreferencePolicy::default(),
            preferences_path: None,
            #[cfg(feature = "desktop")]
            sounds: SoundFiles::default(),
        }
    }
}

impl ClientSettings {
    /// Parses JSON5 text.
    pub fn from_json5_str(text: &str) -> Result<Self, ConfigError> {
        Ok(json5::from_str(text)?)
    }

    /// Reads and parses a JSON5 file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json5_str(&text)
    }

    /// Checks ranges and builds the connection configuration.
    pub fn connection_config(&self) -> Result<ConnectionConfig, ConfigError> {
        let url = Url::parse(&self.url).map_err(|source| ConfigError::InvalidUrl {
            url: self.url.clone(),
            source,
        })?;
        if !self.reconnect_growth.is_finite() || self.reconnect_growth < 1.0 {
            return Err(ConfigError::Invalid {
                field: "reconnectGrowth",
                reason: format!("must be a finite number >= 1, got {}", self.reconnect_growth),
            });
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "heartbeatIntervalMs",
                reason: "must be greater than zero".into(),
            });
        }
        if self.heartbeat_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "heartbeatTimeoutMs",
                reason: "must be greater than zero".into(),
            });
        }

        let mut config = ConnectionConfig::new(url);
        config.reconnect_interval = Duration::from_millis(self.reconnect_interval_ms);
        config.reconnect_max_delay = self.reconnect_max_delay_ms.map(Duration::from_millis);
        config.reconnect_growth = self.reconnect_growth;
        config.max_reconnect_attempts = self.max_reconnect_attempts;
        config.heartbeat_interval = Duration::from_millis(self.heartbeat_interval_ms);
        config.heartbeat_timeout = Duration::from_millis(self.heartbeat_timeout_ms);
        config.heartbeat_dialect = self.heartbeat_dialect;
        config.debug = self.debug;
        Ok(config)
    }
}
