//! # Project Test Harness
//!
//! Shared helpers for the integration suites under `tests/`: a loopback
//! client factory, an event recorder and small timing utilities for tests
//! running on paused tokio time.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use lib_realtime::transport::{LoopbackConnector, LoopbackPeer};
use lib_realtime::{ConnectionConfig, ConnectionState, Envelope, RealtimeClient, Subscription, TokenSource};
use serde_json::Value;

/// Endpoint used by every loopback test.
pub const LOOPBACK_URL: &str = "ws://loopback.test/ws";

/// Reference configuration for [`LOOPBACK_URL`].
pub fn loopback_config() -> ConnectionConfig {
    match ConnectionConfig::parse(LOOPBACK_URL) {
        Ok(config) => config,
        Err(e) => panic!("loopback url must parse: {e}"),
    }
}

/// Lets the connection task drain its queues without moving paused time
/// noticeably.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// A started client plus the connector that plays the server.
pub struct Harness {
    pub client: RealtimeClient,
    pub connector: LoopbackConnector,
}

impl Harness {
    pub fn start(tokens: impl TokenSource + 'static) -> Self {
        let connector = LoopbackConnector::new();
        let client = RealtimeClient::start(connector.clone(), tokens);
        Self { client, connector }
    }

    /// Connects with `config` and returns the server side once it exists.
    pub async fn connect(&self, config: ConnectionConfig) -> LoopbackPeer {
        self.client.connect(config);
        self.next_peer().await
    }

    /// Connects and completes the opening handshake.
    pub async fn connect_open(&self, config: ConnectionConfig) -> LoopbackPeer {
        let peer = self.connect(config).await;
        peer.open();
        self.wait_for(|s| s.is_connected()).await;
        peer
    }

    pub async fn next_peer(&self) -> LoopbackPeer {
        match self.connector.next_peer().await {
            Some(peer) => peer,
            None => panic!("connector closed before a transport was opened"),
        }
    }

    /// Waits until the published state satisfies `predicate`.
    pub async fn wait_for(&self, predicate: impl FnMut(&ConnectionState) -> bool) -> ConnectionState {
        let mut rx = self.client.watch_state();
        let state = match rx.wait_for(predicate).await {
            Ok(state) => state.clone(),
            Err(_) => panic!("connection task stopped while waiting for a state"),
        };
        state
    }
}

/// Records every envelope delivered to a subscription.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<Envelope>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to `kind` on `client`.
    pub fn subscribe(&self, client: &RealtimeClient, kind: &str) -> Subscription {
        let events = Arc::clone(&self.events);
        client.on(kind, move |_payload: &Value, envelope: &Envelope| {
            events
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(envelope.clone());
        })
    }

    pub fn events(&self) -> Vec<Envelope> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn kinds(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.kind).collect()
    }

    pub fn of_kind(&self, kind: &str) -> Vec<Envelope> {
        self.events().into_iter().filter(|e| e.kind == kind).collect()
    }
}
