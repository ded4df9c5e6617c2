//! # rt-listen
//!
//! Connects to the realtime event server, prints every event it receives and
//! presents `notification` events through the in-app list, desktop pop-ups and
//! sounds according to the stored preferences.
//!
//! Configuration is resolved from built-in defaults, then `rt-listen.json5`
//! (or `--config-path`), then environment variables and command line flags.
//! `.env` and `.env.linux` / `.env.windows` are loaded first.

mod listen_config;

use anyhow::Context;
use clap::Parser;
use colored::Colorize;
use lib_realtime::configs::ClientSettings;
use lib_realtime::loggers::{setup_logging, LoggingOptions};
use lib_realtime::notifications::{
    AudioCue, DesktopPopup, NotificationFanout, NotificationList, PreferenceStore, SharedPreferences,
};
use lib_realtime::transport::WsConnector;
use lib_realtime::{ConnectionStatus, EnvToken, Envelope, RealtimeClient};
use serde_json::Value;
use tokio::signal;
use tracing::{info, warn};

use listen_config::{load_config, ListenArgs};

const APP_NAME: &str = "rt-listen";

fn load_env_files() {
    let dotenv_os: &str = if cfg!(target_os = "windows") {
        ".env.windows"
    } else {
        ".env.linux"
    };
    dotenvy::dotenv().ok();
    dotenvy::from_filename(dotenv_os).ok();
}

fn print_event(payload: &Value, envelope: &Envelope) {
    let stamp = envelope
        .timestamp
        .clone()
        .unwrap_or_else(|| chrono::Utc::now().to_rfc3339());
    let kind = match envelope.kind.as_str() {
        "connected" => envelope.kind.green().bold(),
        "disconnected" => envelope.kind.red().bold(),
        "notification" => envelope.kind.yellow().bold(),
        _ => envelope.kind.cyan().bold(),
    };
    println!("{} {} {}", stamp.dimmed(), kind, payload);
}

fn print_status(status: ConnectionStatus, attempts: u32, last_error: Option<&str>) {
    let label = status.to_string();
    let label = match status {
        ConnectionStatus::Connected => label.green(),
        ConnectionStatus::Connecting | ConnectionStatus::Reconnecting => label.yellow(),
        ConnectionStatus::Disconnected => label.normal(),
        ConnectionStatus::Error | ConnectionStatus::Failed => label.red(),
    };
    match last_error {
        Some(err) => println!("[*] status: {label} (attempts {attempts}) {}", err.red()),
        None => println!("[*] status: {label} (attempts {attempts})"),
    }
}

fn preferences(settings: &ClientSettings) -> anyhow::Result<SharedPreferences> {
    let Some(path) = &settings.preferences_path else {
        return Ok(SharedPreferences::new(settings.preferences.clone()));
    };
    let seed = !path.exists();
    let store = PreferenceStore::open(path)
        .with_context(|| format!("opening preferences at {}", path.display()))?;
    if seed {
        store.set(settings.preferences.clone())?;
        info!(path = %path.display(), "preferences file created");
    }
    Ok(store.shared())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Ctrl-C received, shutting down."),
        _ = terminate => info!("SIGTERM received, shutting down."),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env_files();
    let config = load_config(ListenArgs::parse())?;

    let _guard = setup_logging(
        &LoggingOptions::new(APP_NAME)
            .log_dir(config.log_dir())
            .default_filter(config.log_filter()),
    )
    .context("installing the logger")?;

    match &config.source {
        Some(path) => info!(path = %path.display(), "settings loaded"),
        None => info!("no settings file found; using defaults, environment and flags"),
    }

    let settings = &config.settings;
    let connection = settings.connection_config()?;
    let tokens = match &settings.token_env {
        Some(var) => EnvToken::new(var.clone()),
        None => EnvToken::default(),
    };

    let client = RealtimeClient::start(WsConnector::new(), tokens);
    let _printer = client.on("*", print_event);

    let list = NotificationList::new();
    let mut fanout = NotificationFanout::new(preferences(settings)?).with_list(list.clone());
    if config.desktop_enabled() {
        fanout = fanout
            .with_popup(DesktopPopup::new(APP_NAME))
            .with_sound(AudioCue::new(settings.sounds.clone()));
    }
    let _notifications = fanout.attach(client.registry());

    let mut state = client.watch_state();
    let watcher = tokio::spawn(async move {
        while state.changed().await.is_ok() {
            let snapshot = state.borrow_and_update().clone();
            print_status(
                snapshot.status,
                snapshot.reconnect_attempts,
                snapshot.last_error.as_deref(),
            );
            if snapshot.status == ConnectionStatus::Failed {
                println!("{}", "[!] giving up; press Ctrl-C to exit".red().bold());
            }
        }
    });

    println!("[*] connecting to {}", connection.url);
    client.connect(connection);

    shutdown_signal().await;
    client.shutdown().await;
    watcher.abort();

    println!(
        "[*] {} notifications received, {} unread",
        list.len(),
        list.unread_count()
    );
    Ok(())
}
