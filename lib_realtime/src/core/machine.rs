//! # Connection State Machine
//!
//! One actor task per client. Caller commands, transport events, heartbeat
//! timers and the reconnect timer all arrive through a single `select!` loop,
//! so state transitions are serialized without locks. The resulting
//! [`ConnectionState`] is published on a `watch` channel after every change.
//!
//! ## Reconnect contract:
//! - Only one transport exists at a time. Its event stream is dropped before
//!   the next transport is opened, so a late event from an old socket can never
//!   be mistaken for one from the current socket.
//! - The delay for attempt `n` is computed from the count *before* it is
//!   incremented; the first retry waits exactly the base interval.
//! - A caller `connect` resets the attempt counter. A timer-driven reconnect
//!   does not.

use std::future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::TokenSource;
use crate::core::heartbeat::{HeartbeatEvent, HeartbeatMonitor};
use crate::core::registry::Registry;
use crate::core::state::{ConnectionConfig, ConnectionState, ConnectionStatus};
use crate::envelope::Envelope;
use crate::transport::{
    Connector, TransportEvent, TransportSocket, CLOSE_ABNORMAL, CLOSE_HEARTBEAT_TIMEOUT,
    CLOSE_NORMAL,
};

/// Last error recorded when reconnect attempts run out.
pub const MAX_ATTEMPTS_REACHED: &str = "Max reconnect attempts reached";
/// Close reason used by `disconnect`.
pub const CLIENT_DISCONNECT: &str = "Client disconnect";
/// Close reason used by a caller-forced `reconnect`.
pub const CLIENT_RECONNECT: &str = "Client reconnect";
/// Close reason used when the heartbeat stalls.
pub const HEARTBEAT_TIMEOUT: &str = "Heartbeat timeout";

/// The socket currently owned by the machine, readable by the client handle.
pub(crate) type SocketSlot = Arc<Mutex<Option<Arc<dyn TransportSocket>>>>;

/// Requests from the client handle.
#[derive(Debug)]
pub(crate) enum Command {
    Connect(Box<ConnectionConfig>),
    Disconnect,
    Reconnect,
}

pub(crate) fn read_slot(slot: &SocketSlot) -> Option<Arc<dyn TransportSocket>> {
    slot.lock().unwrap_or_else(|e| e.into_inner()).clone()
}

fn write_slot(slot: &SocketSlot, socket: Option<Arc<dyn TransportSocket>>) {
    *slot.lock().unwrap_or_else(|e| e.into_inner()) = socket;
}

/// # Connection Machine
pub(crate) struct Machine {
    connector: Arc<dyn Connector>,
    tokens: Arc<dyn TokenSource>,
    registry: Registry,
    state: watch::Sender<ConnectionState>,
    socket: SocketSlot,
    config: Option<ConnectionConfig>,
    link_events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    heartbeat: HeartbeatMonitor,
    reconnect_at: Option<Pin<Box<Sleep>>>,
    manual_close: bool,
}

impl Machine {
    pub(crate) fn new(
        connector: Arc<dyn Connector>,
        tokens: Arc<dyn TokenSource>,
        registry: Registry,
        state: watch::Sender<ConnectionState>,
        socket: SocketSlot,
    ) -> Self {
        Self {
            connector,
            tokens,
            registry,
            state,
            socket,
            config: None,
            link_events: None,
            heartbeat: HeartbeatMonitor::new(),
            reconnect_at: None,
            manual_close: false,
        }
    }

    /// Event loop. Returns after `shutdown` fires or every handle is dropped;
    /// either way the connection is torn down like a `disconnect`.
    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    self.disconnect();
                    break;
                }
                cmd = commands.recv() => match cmd {
                    Some(Command::Connect(config)) => self.connect(*config),
                    Some(Command::Disconnect) => self.disconnect(),
                    Some(Command::Reconnect) => self.reconnect(),
                    None => {
                        self.disconnect();
                        break;
                    }
                },
                event = next_link_event(&mut self.link_events) => self.on_transport_event(event),
                hb = self.heartbeat.next_event() => self.on_heartbeat(hb),
                _ = reconnect_due(&mut self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.open_transport();
                }
            }
        }
        debug!("connection task stopped");
    }

    fn update(&self, f: impl FnOnce(&mut ConnectionState)) {
        self.state.send_modify(f);
    }

    fn attempts(&self) -> u32 {
        self.state.borrow().reconnect_attempts
    }

    fn debug_enabled(&self) -> bool {
        self.config.as_ref().is_some_and(|c| c.debug)
    }

    // --- Commands ---

    fn connect(&mut self, config: ConnectionConfig) {
        self.teardown_transport(CLOSE_NORMAL, CLIENT_RECONNECT);
        self.reconnect_at = None;
        self.manual_close = false;
        self.config = Some(config);
        self.update(|s| s.reconnect_attempts = 0);
        self.open_transport();
    }

    fn disconnect(&mut self) {
        info!("disconnecting");
        self.manual_close = true;
        self.reconnect_at = None;
        let closed = self.teardown_transport(CLOSE_NORMAL, CLIENT_DISCONNECT);
        self.update(|s| {
            s.status = ConnectionStatus::Disconnected;
            s.reconnect_attempts = 0;
        });
        if closed {
            self.emit_disconnected(CLOSE_NORMAL, CLIENT_DISCONNECT);
        }
    }

    fn reconnect(&mut self) {
        if self.config.is_none() {
            debug!("reconnect requested before any connect; ignoring");
            return;
        }
        self.manual_close = false;
        self.reconnect_at = None;
        if self.teardown_transport(CLOSE_NORMAL, CLIENT_RECONNECT) {
            self.emit_disconnected(CLOSE_NORMAL, CLIENT_RECONNECT);
        }
        self.schedule_reconnect();
    }

    // --- Transport lifecycle ---

    /// Opens a transport with the retained config and a freshly read token.
    fn open_transport(&mut self) {
        let Some(config) = self.config.as_ref() else {
            return;
        };
        let token = self.tokens.token();
        let url = config.url_with_token(token.as_deref());
        info!(endpoint = %config.url, attempt = self.attempts(), "connecting");

        self.update(|s| {
            s.status = ConnectionStatus::Connecting;
            s.last_error = None;
        });

        match self.connector.open(&url) {
            Ok(link) => {
                write_slot(&self.socket, Some(link.socket));
                self.link_events = Some(link.events);
            }
            Err(e) => {
                warn!(error = %e, "transport could not be created");
                let message = e.to_string();
                self.update(|s| {
                    s.status = ConnectionStatus::Error;
                    s.last_error = Some(message);
                });
                self.schedule_reconnect();
            }
        }
    }

    /// Closes and forgets the current transport. Returns whether one existed.
    fn teardown_transport(&mut self, code: u16, reason: &str) -> bool {
        self.heartbeat.stop();
        self.link_events = None;
        let socket = read_slot(&self.socket);
        write_slot(&self.socket, None);
        match socket {
            Some(socket) => {
                socket.close(code, reason);
                true
            }
            None => false,
        }
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Open => self.on_open(),
            TransportEvent::Message(text) => self.on_message(&text),
            TransportEvent::Error(message) => self.on_error(message),
            TransportEvent::Close { code, reason } => self.on_close(code, reason),
        }
    }

    fn on_open(&mut self) {
        info!("connected");
        self.update(|s| {
            s.status = ConnectionStatus::Connected;
            s.reconnect_attempts = 0;
            s.last_connected_at = Some(chrono::Utc::now());
            s.last_error = None;
        });
        if let Some(config) = self.config.as_ref() {
            self.heartbeat
                .start(config.heartbeat_interval, config.heartbeat_timeout);
        }
        self.registry.emit(&Envelope::local("connected", Value::Null));
    }

    fn on_message(&mut self, text: &str) {
        if self.debug_enabled() {
            debug!(frame = text, "frame received");
        }
        let envelope = match Envelope::parse(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "dropping malformed frame");
                return;
            }
        };

        let is_pong = self
            .config
            .as_ref()
            .map_or(envelope.kind.eq_ignore_ascii_case("pong"), |c| {
                c.heartbeat_dialect.is_pong(&envelope.kind)
            });
        if is_pong {
            if !self.heartbeat.on_pong() {
                debug!("pong without outstanding ping");
            }
            return;
        }

        self.registry.emit(&envelope);
    }

    fn on_error(&mut self, message: String) {
        warn!(error = %message, "transport error");
        self.update(|s| {
            s.status = ConnectionStatus::Error;
            s.last_error = Some(message);
        });
    }

    fn on_close(&mut self, code: u16, reason: String) {
        warn!(code, reason = %reason, "connection closed");
        self.heartbeat.stop();
        self.reconnect_at = None;
        self.link_events = None;
        write_slot(&self.socket, None);

        if !self.manual_close {
            self.update(|s| s.status = ConnectionStatus::Disconnected);
            self.schedule_reconnect();
        }
        self.emit_disconnected(code, &reason);
    }

    fn on_heartbeat(&mut self, event: HeartbeatEvent) {
        match event {
            HeartbeatEvent::SendPing => {
                let Some(socket) = read_slot(&self.socket).filter(|s| s.is_open()) else {
                    return;
                };
                let dialect = self
                    .config
                    .as_ref()
                    .map(|c| c.heartbeat_dialect)
                    .unwrap_or_default();
                if self.debug_enabled() {
                    debug!("sending heartbeat ping");
                }
                match socket.send_text(dialect.ping_frame()) {
                    Ok(()) => self.heartbeat.arm_timeout(),
                    Err(e) => debug!(error = %e, "heartbeat ping not sent"),
                }
            }
            HeartbeatEvent::Stalled => {
                warn!("heartbeat timeout; dropping connection");
                if let Some(socket) = read_slot(&self.socket) {
                    socket.close(CLOSE_HEARTBEAT_TIMEOUT, HEARTBEAT_TIMEOUT);
                }
                self.on_close(CLOSE_HEARTBEAT_TIMEOUT, HEARTBEAT_TIMEOUT.to_string());
            }
        }
    }

    // --- Reconnect ---

    fn schedule_reconnect(&mut self) {
        if self.manual_close {
            return;
        }
        let Some(config) = self.config.as_ref() else {
            return;
        };

        let attempts = self.attempts();
        if attempts >= config.max_reconnect_attempts {
            warn!(attempts, "{MAX_ATTEMPTS_REACHED}");
            self.update(|s| {
                s.status = ConnectionStatus::Failed;
                s.last_error = Some(MAX_ATTEMPTS_REACHED.to_string());
            });
            return;
        }

        let delay = config.backoff().delay_for(attempts);
        info!(?delay, attempt = attempts + 1, "scheduling reconnect");
        self.update(|s| {
            s.status = ConnectionStatus::Reconnecting;
            s.reconnect_attempts = attempts + 1;
        });
        self.reconnect_at = Some(Box::pin(sleep(delay)));
    }

    fn emit_disconnected(&self, code: u16, reason: &str) {
        self.registry.emit(&Envelope::local(
            "disconnected",
            json!({ "code": code, "reason": reason }),
        ));
    }
}

/// Next event of the current link; pending while there is none. A link whose
/// sender vanished without a close frame counts as an abnormal close.
async fn next_link_event(
    events: &mut Option<mpsc::UnboundedReceiver<TransportEvent>>,
) -> TransportEvent {
    match events.as_mut() {
        Some(rx) => rx.recv().await.unwrap_or(TransportEvent::Close {
            code: CLOSE_ABNORMAL,
            reason: "transport dropped".into(),
        }),
        None => future::pending().await,
    }
}

async fn reconnect_due(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer.as_mut() {
        Some(sleep) => sleep.as_mut().await,
        None => future::pending().await,
    }
}
