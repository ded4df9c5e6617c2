use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use lib_realtime::configs::ClientSettings;
use lib_realtime::HeartbeatDialect;
use serde::{Deserialize, Serialize};

/// File looked up in the working directory when no path is given.
pub const CONFIG_FILE_NAME: &str = "rt-listen.json5";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Listens to the realtime event server and presents its notifications", version)]
#[serde(rename_all = "camelCase")]
pub struct ListenArgs {
    #[clap(long, env = "REALTIME_WS_URL", help = "Event server WebSocket URL.")]
    pub url: Option<String>,

    #[clap(long, env = "REALTIME_CONFIG_PATH", help = "Path to the JSON5 settings file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "REALTIME_TOKEN_ENV", help = "Environment variable holding the session token.")]
    pub token_env: Option<String>,

    #[clap(long, env = "REALTIME_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "REALTIME_LOG_LEVEL", help = "Logging level used when RUST_LOG is unset (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "REALTIME_RECONNECT_INTERVAL_MS", help = "Base delay in milliseconds before the first reconnect.")]
    pub reconnect_interval_ms: Option<u64>,

    #[clap(long, env = "REALTIME_RECONNECT_MAX_DELAY_MS", help = "Maximum delay in milliseconds for a single reconnect.")]
    pub reconnect_max_delay_ms: Option<u64>,

    #[clap(long, env = "REALTIME_MAX_RECONNECT_ATTEMPTS", help = "Reconnect attempts before giving up.")]
    pub max_reconnect_attempts: Option<u32>,

    #[clap(long, env = "REALTIME_HEARTBEAT_DIALECT", help = "Heartbeat frame shape: generic or bare.")]
    pub heartbeat_dialect: Option<String>,

    #[clap(long, env = "REALTIME_PREFERENCES_PATH", help = "File where notification preferences are persisted.")]
    pub preferences_path: Option<PathBuf>,

    #[clap(long, env = "REALTIME_DEBUG", help = "Log every frame (true/false).")]
    pub debug: Option<bool>,

    #[clap(long, env = "REALTIME_QUIET", help = "Disable desktop pop-ups and sounds (true/false).")]
    pub quiet: Option<bool>,
}

impl ListenArgs {
    // 'other' overrides 'self' for Some values
    fn merge(self, other: ListenArgs) -> ListenArgs {
        ListenArgs {
            url: other.url.or(self.url),
            config_path: other.config_path.or(self.config_path),
            token_env: other.token_env.or(self.token_env),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            reconnect_interval_ms: other.reconnect_interval_ms.or(self.reconnect_interval_ms),
            reconnect_max_delay_ms: other.reconnect_max_delay_ms.or(self.reconnect_max_delay_ms),
            max_reconnect_attempts: other.max_reconnect_attempts.or(self.max_reconnect_attempts),
            heartbeat_dialect: other.heartbeat_dialect.or(self.heartbeat_dialect),
            preferences_path: other.preferences_path.or(self.preferences_path),
            debug: other.debug.or(self.debug),
            quiet: other.quiet.or(self.quiet),
        }
    }

    /// Writes every value given on the command line or in the environment
    /// over the file settings.
    fn overlay(&self, settings: &mut ClientSettings) -> anyhow::Result<()> {
        if let Some(url) = &self.url {
            settings.url = url.clone();
        }
        if let Some(token_env) = &self.token_env {
            settings.token_env = Some(token_env.clone());
        }
        if let Some(ms) = self.reconnect_interval_ms {
            settings.reconnect_interval_ms = ms;
        }
        if let Some(ms) = self.reconnect_max_delay_ms {
            settings.reconnect_max_delay_ms = Some(ms);
        }
        if let Some(max) = self.max_reconnect_attempts {
            settings.max_reconnect_attempts = max;
        }
        if let Some(dialect) = &self.heartbeat_dialect {
            settings.heartbeat_dialect = parse_dialect(dialect)?;
        }
        if let Some(path) = &self.preferences_path {
            settings.preferences_path = Some(path.clone());
        }
        if let Some(debug) = self.debug {
            settings.debug = debug;
        }
        Ok(())
    }
}

fn parse_dialect(value: &str) -> anyhow::Result<HeartbeatDialect> {
    match value.to_ascii_lowercase().as_str() {
        "generic" => Ok(HeartbeatDialect::Generic),
        "bare" => Ok(HeartbeatDialect::Bare),
        other => bail!("unknown heartbeat dialect `{other}` (expected generic or bare)"),
    }
}

/// Fully resolved listener configuration.
#[derive(Debug, Clone)]
pub struct ListenConfig {
    pub args: ListenArgs,
    pub settings: ClientSettings,
    /// Settings file that was read, if any.
    pub source: Option<PathBuf>,
}

impl ListenConfig {
    pub fn log_dir(&self) -> PathBuf {
        self.args.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"))
    }

    pub fn log_level(&self) -> &str {
        self.args.log_level.as_deref().unwrap_or("info")
    }

    /// Default tracing filter. `debug` raises the library target so the
    /// per-frame logs show up without touching the global level.
    pub fn log_filter(&self) -> String {
        let level = self.log_level();
        let already_verbose = matches!(level.trim().to_ascii_lowercase().as_str(), "debug" | "trace");
        if self.settings.debug && !already_verbose {
            format!("{level},lib_realtime=debug")
        } else {
            level.to_string()
        }
    }

    pub fn desktop_enabled(&self) -> bool {
        !self.args.quiet.unwrap_or(false)
    }
}

fn default_args() -> ListenArgs {
    ListenArgs {
        log_dir: Some(PathBuf::from("./logs")),
        log_level: Some("info".to_string()),
        // The listener runs unattended, so single delays are capped at a minute.
        reconnect_max_delay_ms: Some(60_000),
        ..Default::default()
    }
}

/// Candidate settings files, most specific first.
fn config_candidates(explicit: Option<&PathBuf>) -> Vec<PathBuf> {
    if let Some(path) = explicit {
        return vec![path.clone()];
    }
    let mut candidates = vec![PathBuf::from(CONFIG_FILE_NAME)];
    if let Some(dir) = dirs::config_dir() {
        candidates.push(dir.join("rt-listen").join(CONFIG_FILE_NAME));
    }
    candidates
}

/// Resolves defaults, then the settings file, then environment and command line.
pub fn load_config(cli: ListenArgs) -> anyhow::Result<ListenConfig> {
    let args = default_args().merge(cli.clone());
    let explicit = cli.config_path.as_ref();

    let source = config_candidates(explicit).into_iter().find(|p| p.exists());
    if source.is_none() {
        if let Some(path) = explicit {
            bail!("settings file {} does not exist", path.display());
        }
    }

    let mut settings = match &source {
        Some(path) => ClientSettings::from_file(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => ClientSettings::default(),
    };

    // Defaults only fill what the file left unset.
    if cli.reconnect_max_delay_ms.is_none() && settings.reconnect_max_delay_ms.is_none() {
        settings.reconnect_max_delay_ms = args.reconnect_max_delay_ms;
    }
    cli.overlay(&mut settings)?;

    Ok(ListenConfig {
        args,
        settings,
        source,
    })
}
