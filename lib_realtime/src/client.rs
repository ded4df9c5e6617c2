//! # Realtime Client
//!
//! Caller-facing handle over the connection task. Commands are queued to the
//! task and return immediately; `send` writes straight to the current socket
//! and fails fast when there is none. State is observed through snapshots
//! (`state`, `status`) or a `watch` receiver.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::auth::TokenSource;
use crate::core::machine::{read_slot, Command, Machine, SocketSlot};
use crate::core::registry::{HandlerId, Registry, Subscription};
use crate::core::state::{ConnectionConfig, ConnectionState, ConnectionStatus};
use crate::envelope::Envelope;
use crate::transport::{Connector, TransportSocket};

/// # Realtime Client
///
/// Must be created inside a tokio runtime. Dropping the handle stops the
/// connection task and closes the transport.
#[derive(Debug)]
pub struct RealtimeClient {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    socket: SocketSlot,
    registry: Registry,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl RealtimeClient {
    /// Spawns the connection task. Nothing is opened until [`Self::connect`].
    pub fn start<C, T>(connector: C, tokens: T) -> Self
    where
        C: Connector,
        T: TokenSource + 'static,
    {
        Self::start_with_registry(connector, tokens, Registry::new())
    }

    /// Like [`Self::start`], dispatching into an existing registry.
    pub fn start_with_registry<C, T>(connector: C, tokens: T, registry: Registry) -> Self
    where
        C: Connector,
        T: TokenSource + 'static,
    {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::default());
        let socket: SocketSlot = Arc::new(Mutex::new(None));
        let shutdown = CancellationToken::new();

        let machine = Machine::new(
            Arc::new(connector),
            Arc::new(tokens),
            registry.clone(),
            state_tx,
            Arc::clone(&socket),
        );
        let task = tokio::spawn(machine.run(commands_rx, shutdown.clone()));

        Self {
            commands,
            state,
            socket,
            registry,
            shutdown,
            task: Some(task),
        }
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::debug!("connection task already stopped; command ignored");
        }
    }

    /// Opens a connection with `config`, replacing any current one.
    pub fn connect(&self, config: ConnectionConfig) {
        self.command(Command::Connect(Box::new(config)));
    }

    /// Closes the connection and cancels every pending timer. Idempotent.
    pub fn disconnect(&self) {
        self.command(Command::Disconnect);
    }

    /// Drops the current transport and reconnects after the backoff delay.
    /// Ignored before the first `connect`.
    pub fn reconnect(&self) {
        self.command(Command::Reconnect);
    }

    /// Transmits `envelope`. Returns `false` when no open transport exists.
    pub fn send(&self, envelope: &Envelope) -> bool {
        let Some(socket) = read_slot(&self.socket).filter(|s| s.is_open()) else {
            tracing::debug!(kind = %envelope.kind, "send skipped: socket not open");
            return false;
        };
        let frame = match envelope.to_wire() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, kind = %envelope.kind, "envelope not serializable");
                return false;
            }
        };
        match socket.send_text(frame) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, "send failed");
                false
            }
        }
    }

    /// Shorthand for `send(&Envelope::new(kind, payload))`.
    pub fn send_event(&self, kind: &str, payload: Value) -> bool {
        self.send(&Envelope::new(kind, payload))
    }

    /// Subscribes `handler` to `kind` (or `"*"`). Survives reconnects.
    pub fn on<F>(&self, kind: &str, handler: F) -> Subscription
    where
        F: Fn(&Value, &Envelope) + Send + Sync + 'static,
    {
        self.registry.on(kind, handler)
    }

    /// Removes one handler, or every handler of `kind`.
    pub fn off(&self, kind: &str, handler: Option<HandlerId>) {
        self.registry.off(kind, handler);
    }

    /// The dispatch registry this client emits into.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Current state snapshot.
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Current status.
    pub fn status(&self) -> ConnectionStatus {
        self.state.borrow().status
    }

    /// `status == Connected`.
    pub fn is_connected(&self) -> bool {
        self.state.borrow().is_connected()
    }

    /// A receiver notified on every state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Whether the current transport accepts frames.
    pub fn is_socket_open(&self) -> bool {
        read_slot(&self.socket).is_some_and(|s| s.is_open())
    }

    /// The current transport, if any.
    pub fn socket(&self) -> Option<Arc<dyn TransportSocket>> {
        read_slot(&self.socket)
    }

    /// Disconnects and waits for the connection task to finish.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "connection task ended abnormally");
            }
        }
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::NoToken;
    use crate::transport::LoopbackConnector;
    use serde_json::json;
    use std::time::Duration;

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn send_fails_fast_without_transport() {
        let client = RealtimeClient::start(LoopbackConnector::new(), NoToken);
        assert!(!client.send_event("test-event", json!({ "foo": "bar" })));
        assert!(!client.is_socket_open());
        assert_eq!(client.status(), ConnectionStatus::Disconnected);
        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn open_publishes_connected_state() {
        let connector = LoopbackConnector::new();
        let client = RealtimeClient::start(connector.clone(), NoToken);
        let mut rx = client.watch_state();

        client.connect(ConnectionConfig::parse("ws://loopback/ws").unwrap());
        let peer = connector.next_peer().await.unwrap();
        settle().await;
        assert_eq!(client.status(), ConnectionStatus::Connecting);

        peer.open();
        rx.wait_for(|s| s.is_connected()).await.unwrap();
        assert!(client.state().last_connected_at.is_some());
        assert!(client.send_event("hello", Value::Null));
        assert_eq!(peer.sent_json()[0]["type"], "hello");

        client.shutdown().await;
        assert_eq!(peer.close_request(), Some((1000, "Client disconnect".to_string())));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_closes_the_transport() {
        let connector = LoopbackConnector::new();
        let client = RealtimeClient::start(connector.clone(), NoToken);
        client.connect(ConnectionConfig::parse("ws://loopback/ws").unwrap());
        let peer = connector.next_peer().await.unwrap();
        peer.open();
        settle().await;

        drop(client);
        settle().await;
        assert!(peer.close_request().is_some());
    }
}
