//! # Loggers Module
//!
//! Installs the process-wide `tracing` subscriber: a colored console layer and
//! a JSON file layer rotated daily, both behind an `EnvFilter`.

use std::io;
use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info";

/// # Logging Options
#[derive(Debug, Clone)]
pub struct LoggingOptions {
    /// Base name of the rolled log files.
    pub app_name: String,
    /// Directory for log files. `None` disables the file layer.
    pub log_dir: Option<PathBuf>,
    /// Filter directive used when `RUST_LOG` is unset.
    pub default_filter: String,
    /// Colored console output.
    pub ansi: bool,
}

impl LoggingOptions {
    /// Console plus `logs/<app_name>.<date>` files.
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            log_dir: Some(PathBuf::from("logs")),
            default_filter: DEFAULT_FILTER.to_string(),
            ansi: true,
        }
    }

    /// Overrides the log directory.
    pub fn log_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.log_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Console only.
    pub fn console_only(mut self) -> Self {
        self.log_dir = None;
        self
    }

    /// Overrides the fallback filter.
    pub fn default_filter(mut self, filter: impl Into<String>) -> Self {
        self.default_filter = filter.into();
        self
    }
}

fn env_filter(default_filter: &str) -> io::Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

/// Installs the global subscriber.
///
/// The returned guard flushes the file writer when dropped; keep it alive for
/// the life of the process. Fails if a global subscriber is already set.
pub fn setup_logging(options: &LoggingOptions) -> io::Result<Option<WorkerGuard>> {
    let filter = env_filter(&options.default_filter)?;
    let console_layer = fmt::layer().with_target(true).with_ansi(options.ansi);

    let (file_layer, guard) = match &options.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = rolling::daily(dir, &options.app_name);
            let (writer, guard) = non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer).json();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::AlreadyExists, e))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_builder() {
        let opts = LoggingOptions::new("rt-listen").log_dir("/tmp/rt").default_filter("debug");
        assert_eq!(opts.log_dir.as_deref(), Some(Path::new("/tmp/rt")));
        assert_eq!(opts.default_filter, "debug");
        assert!(LoggingOptions::new("x").console_only().log_dir.is_none());
    }

    #[test]
    fn file_layer_writes_into_log_dir() {
        let dir = tempfile::tempdir().unwrap();
        let opts = LoggingOptions::new("unit").log_dir(dir.path());
        // Another test binary may already own the global subscriber.
        if let Ok(guard) = setup_logging(&opts) {
            tracing::info!("hello from the test");
            drop(guard);
            let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
            assert!(!files.is_empty());
        }
    }
}
