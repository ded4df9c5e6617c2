//! # Live Connection Test
//!
//! Connects to a running event server, prints every event received during a
//! fixed window and reports the final connection state.

use std::time::Duration;

use clap::Parser;
use lib_realtime::loggers::{setup_logging, LoggingOptions};
use lib_realtime::transport::WsConnector;
use lib_realtime::{ConnectionConfig, EnvToken, RealtimeClient};
use project_tests::EventLog;

#[derive(Parser, Debug)]
#[clap(about = "Live check against a realtime event server")]
struct Args {
    /// Server endpoint.
    #[clap(long, env = "REALTIME_WS_URL", default_value = "ws://localhost:8080/ws")]
    url: String,

    /// Seconds to listen before disconnecting.
    #[clap(long, default_value_t = 15)]
    seconds: u64,
}

// // Statement: Prints the received events as JSON and exits non-zero when the
// // connection never opened.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _guard = setup_logging(&LoggingOptions::new("live_test").console_only())?;

    let config = ConnectionConfig::parse(&args.url)?;
    let client = RealtimeClient::start(WsConnector::new(), EnvToken::default());
    let log = EventLog::new();
    let _all = log.subscribe(&client, "*");

    println!("[*] Connecting to {} for {}s...", args.url, args.seconds);
    client.connect(config);
    tokio::time::sleep(Duration::from_secs(args.seconds)).await;

    let state = client.state();
    let events = log.events();
    client.shutdown().await;

    println!("\n[RESULT] {} events received", events.len());
    println!("-----------------------------------------------");
    for event in &events {
        println!("{} {}", event.kind, serde_json::to_string(&event.payload)?);
    }
    println!("-----------------------------------------------");
    println!("[INFO] Final state: {}", serde_json::to_string_pretty(&state)?);

    if state.last_connected_at.is_none() {
        eprintln!("\n[ERROR] The connection never opened.");
        std::process::exit(1);
    }
    Ok(())
}
