//! # WebSocket Transport
//!
//! tokio-tungstenite client behind the [`Connector`] seam. `open` returns
//! immediately; a spawned task performs the handshake, pumps inbound frames
//! into the link's event channel and drains the outbound queue. The task ends
//! after reporting exactly one [`TransportEvent::Close`].

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message as WsMessage};
use tokio_tungstenite::connect_async;
use url::Url;

use super::{
    Connector, TransportError, TransportEvent, TransportLink, TransportSocket, CLOSE_ABNORMAL,
};

const CONNECTING: u8 = 0;
const OPEN: u8 = 1;
const CLOSING: u8 = 2;
const CLOSED: u8 = 3;

/// Handshake deadline.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
enum Outgoing {
    Text(String),
    Close(u16, String),
}

#[derive(Debug)]
struct WsSocket {
    url: Url,
    ready_state: Arc<AtomicU8>,
    outbound: mpsc::UnboundedSender<Outgoing>,
}

impl TransportSocket for WsSocket {
    fn url(&self) -> &Url {
        &self.url
    }

    fn is_open(&self) -> bool {
        self.ready_state.load(Ordering::SeqCst) == OPEN
    }

    fn send_text(&self, text: String) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        self.outbound
            .send(Outgoing::Text(text))
            .map_err(|_| TransportError::Closed)
    }

    fn close(&self, code: u16, reason: &str) {
        let previous = self.ready_state.swap(CLOSING, Ordering::SeqCst);
        if previous == CLOSING || previous == CLOSED {
            self.ready_state.store(previous, Ordering::SeqCst);
            return;
        }
        let _ = self.outbound.send(Outgoing::Close(code, reason.to_string()));
    }
}

/// # WebSocket Connector
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl Default for WsConnector {
    fn default() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
        }
    }
}

impl WsConnector {
    /// Connector with the default handshake deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the handshake deadline.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Connector for WsConnector {
    fn open(&self, url: &Url) -> Result<TransportLink, TransportError> {
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(TransportError::InvalidUrl {
                url: url.to_string(),
                reason: format!("unsupported scheme `{}`", url.scheme()),
            });
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let ready_state = Arc::new(AtomicU8::new(CONNECTING));

        tokio::spawn(run_socket(
            url.clone(),
            self.connect_timeout,
            Arc::clone(&ready_state),
            events_tx,
            outbound_rx,
        ));

        Ok(TransportLink {
            socket: Arc::new(WsSocket {
                url: url.clone(),
                ready_state,
                outbound: outbound_tx,
            }),
            events: events_rx,
        })
    }
}

/// Socket task: handshake, then read/write until either side closes.
async fn run_socket(
    url: Url,
    connect_timeout: Duration,
    ready_state: Arc<AtomicU8>,
    events: mpsc::UnboundedSender<TransportEvent>,
    mut outbound: mpsc::UnboundedReceiver<Outgoing>,
) {
    let finish = |code: u16, reason: String| {
        ready_state.store(CLOSED, Ordering::SeqCst);
        let _ = events.send(TransportEvent::Close { code, reason });
    };

    // --- 1. Handshake ---
    let stream = match tokio::time::timeout(connect_timeout, connect_async(url.as_str())).await {
        Ok(Ok((stream, _response))) => stream,
        Ok(Err(e)) => {
            let _ = events.send(TransportEvent::Error(e.to_string()));
            finish(CLOSE_ABNORMAL, e.to_string());
            return;
        }
        Err(_) => {
            let reason = format!("handshake timed out after {:?}", connect_timeout);
            let _ = events.send(TransportEvent::Error(reason.clone()));
            finish(CLOSE_ABNORMAL, reason);
            return;
        }
    };

    // A close requested while the handshake was in flight wins.
    if ready_state
        .compare_exchange(CONNECTING, OPEN, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        let (mut write, _read) = stream.split();
        let _ = write.close().await;
        finish(CLOSE_ABNORMAL, "closed before open".into());
        return;
    }
    let _ = events.send(TransportEvent::Open);

    let (mut write, mut read) = stream.split();
    let mut close: Option<(u16, String)> = None;

    // --- 2. Pump ---
    loop {
        tokio::select! {
            cmd = outbound.recv() => match cmd {
                Some(Outgoing::Text(text)) => {
                    if let Err(e) = write.send(WsMessage::Text(text.into())).await {
                        let _ = events.send(TransportEvent::Error(e.to_string()));
                        break;
                    }
                }
                Some(Outgoing::Close(code, reason)) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.clone().into(),
                    };
                    let _ = write.send(WsMessage::Close(Some(frame))).await;
                    close = Some((code, reason));
                    break;
                }
                // Every socket handle is gone.
                None => {
                    let _ = write.close().await;
                    break;
                }
            },
            msg = read.next() => match msg {
                Some(Ok(WsMessage::Text(text))) => {
                    let _ = events.send(TransportEvent::Message(text.to_string()));
                }
                Some(Ok(WsMessage::Binary(bin))) => match String::from_utf8(bin.to_vec()) {
                    Ok(text) => {
                        let _ = events.send(TransportEvent::Message(text));
                    }
                    Err(_) => tracing::debug!(len = bin.len(), "dropping non UTF-8 binary frame"),
                },
                Some(Ok(WsMessage::Close(frame))) => {
                    close = Some(match frame {
                        Some(f) => (u16::from(f.code), f.reason.to_string()),
                        None => (1005, String::new()),
                    });
                    break;
                }
                // tungstenite answers protocol pings itself.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = events.send(TransportEvent::Error(e.to_string()));
                    break;
                }
                None => break,
            },
        }
    }

    let (code, reason) = close.unwrap_or((CLOSE_ABNORMAL, "connection lost".into()));
    finish(code, reason);
}
