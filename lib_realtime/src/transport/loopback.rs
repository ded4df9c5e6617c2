//! # Loopback Transport
//!
//! A transport with no network behind it. Every `open` produces a
//! [`LoopbackPeer`] that plays the server side: it decides when the
//! connection opens, pushes frames, raises errors and closes, and it records
//! every frame the client sent. The connector is cheap to clone; clones share
//! the same peer queue.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::mpsc;
use url::Url;

use super::{Connector, TransportError, TransportEvent, TransportLink, TransportSocket};

const CONNECTING: u8 = 0;
const OPEN: u8 = 1;
const CLOSED: u8 = 3;

#[derive(Debug, Default)]
struct Shared {
    ready_state: AtomicU8,
    sent: Mutex<Vec<String>>,
    close_request: Mutex<Option<(u16, String)>>,
}

#[derive(Debug)]
struct LoopbackSocket {
    url: Url,
    shared: Arc<Shared>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl TransportSocket for LoopbackSocket {
    fn url(&self) -> &Url {
        &self.url
    }

    fn is_open(&self) -> bool {
        self.shared.ready_state.load(Ordering::SeqCst) == OPEN
    }

    fn send_text(&self, text: String) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        lock(&self.shared.sent).push(text);
        Ok(())
    }

    fn close(&self, code: u16, reason: &str) {
        let previous = self.shared.ready_state.swap(CLOSED, Ordering::SeqCst);
        if previous == CLOSED {
            return;
        }
        *lock(&self.shared.close_request) = Some((code, reason.to_string()));
        let _ = self.events.send(TransportEvent::Close {
            code,
            reason: reason.to_string(),
        });
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// # Loopback Peer
///
/// Server side of one loopback transport.
#[derive(Debug, Clone)]
pub struct LoopbackPeer {
    url: Url,
    shared: Arc<Shared>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl LoopbackPeer {
    /// URL the client opened, token query included.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Completes the opening handshake.
    pub fn open(&self) {
        self.shared.ready_state.store(OPEN, Ordering::SeqCst);
        let _ = self.events.send(TransportEvent::Open);
    }

    /// Pushes a JSON frame.
    pub fn send_json(&self, frame: &Value) {
        self.send_text(frame.to_string());
    }

    /// Pushes a raw text frame.
    pub fn send_text(&self, text: impl Into<String>) {
        let _ = self.events.send(TransportEvent::Message(text.into()));
    }

    /// Raises a transport error without closing.
    pub fn error(&self, message: impl Into<String>) {
        let _ = self.events.send(TransportEvent::Error(message.into()));
    }

    /// Closes from the server side.
    pub fn close(&self, code: u16, reason: impl Into<String>) {
        self.shared.ready_state.store(CLOSED, Ordering::SeqCst);
        let _ = self.events.send(TransportEvent::Close {
            code,
            reason: reason.into(),
        });
    }

    /// Whether the client side considers the socket open.
    pub fn is_open(&self) -> bool {
        self.shared.ready_state.load(Ordering::SeqCst) == OPEN
    }

    /// Text frames the client sent, oldest first.
    pub fn sent_frames(&self) -> Vec<String> {
        lock(&self.shared.sent).clone()
    }

    /// Sent frames decoded as JSON; undecodable frames are skipped.
    pub fn sent_json(&self) -> Vec<Value> {
        self.sent_frames()
            .iter()
            .filter_map(|f| serde_json::from_str(f).ok())
            .collect()
    }

    /// Forgets the recorded outbound frames.
    pub fn clear_sent(&self) {
        lock(&self.shared.sent).clear();
    }

    /// Close code and reason requested by the client, if it closed.
    pub fn close_request(&self) -> Option<(u16, String)> {
        lock(&self.shared.close_request).clone()
    }
}

#[derive(Debug)]
struct Inner {
    peers_tx: mpsc::UnboundedSender<LoopbackPeer>,
    peers_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<LoopbackPeer>>,
    opened: AtomicUsize,
    fail_next: Mutex<Option<TransportError>>,
}

/// # Loopback Connector
#[derive(Debug, Clone)]
pub struct LoopbackConnector {
    inner: Arc<Inner>,
}

impl Default for LoopbackConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackConnector {
    /// Creates a connector with an empty peer queue.
    pub fn new() -> Self {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                peers_tx,
                peers_rx: tokio::sync::Mutex::new(peers_rx),
                opened: AtomicUsize::new(0),
                fail_next: Mutex::new(None),
            }),
        }
    }

    /// Waits for the next transport the client opens.
    pub async fn next_peer(&self) -> Option<LoopbackPeer> {
        self.inner.peers_rx.lock().await.recv().await
    }

    /// Returns an already opened, not yet taken peer without waiting.
    pub fn try_next_peer(&self) -> Option<LoopbackPeer> {
        self.inner.peers_rx.try_lock().ok()?.try_recv().ok()
    }

    /// Number of `open` calls that produced a transport.
    pub fn opened_count(&self) -> usize {
        self.inner.opened.load(Ordering::SeqCst)
    }

    /// Makes the next `open` fail synchronously with `err`.
    pub fn fail_next_open(&self, err: TransportError) {
        *lock(&self.inner.fail_next) = Some(err);
    }
}

impl Connector for LoopbackConnector {
    fn open(&self, url: &Url) -> Result<TransportLink, TransportError> {
        if let Some(err) = lock(&self.inner.fail_next).take() {
            return Err(err);
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());
        shared.ready_state.store(CONNECTING, Ordering::SeqCst);

        let socket = LoopbackSocket {
            url: url.clone(),
            shared: Arc::clone(&shared),
            events: events_tx.clone(),
        };
        let peer = LoopbackPeer {
            url: url.clone(),
            shared,
            events: events_tx,
        };

        self.inner.opened.fetch_add(1, Ordering::SeqCst);
        let _ = self.inner.peers_tx.send(peer);

        Ok(TransportLink {
            socket: Arc::new(socket),
            events: events_rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn peer_drives_link_events() {
        let connector = LoopbackConnector::new();
        let url = Url::parse("ws://loopback/ws").unwrap();
        let mut link = connector.open(&url).unwrap();
        let peer = connector.next_peer().await.unwrap();

        assert!(!link.socket.is_open());
        assert_eq!(link.socket.send_text("early".into()), Err(TransportError::NotOpen));

        peer.open();
        peer.send_json(&json!({ "type": "hello" }));
        assert_eq!(link.events.recv().await, Some(TransportEvent::Open));
        assert_eq!(
            link.events.recv().await,
            Some(TransportEvent::Message(r#"{"type":"hello"}"#.into()))
        );

        link.socket.send_text("out".into()).unwrap();
        assert_eq!(peer.sent_frames(), vec!["out".to_string()]);

        link.socket.close(1000, "bye");
        link.socket.close(1000, "again");
        assert_eq!(peer.close_request(), Some((1000, "bye".to_string())));
        assert_eq!(
            link.events.recv().await,
            Some(TransportEvent::Close { code: 1000, reason: "bye".into() })
        );
    }

    #[tokio::test]
    async fn fail_next_open_is_one_shot() {
        let connector = LoopbackConnector::new();
        let url = Url::parse("ws://loopback/ws").unwrap();
        connector.fail_next_open(TransportError::Connect("unreachable".into()));
        assert!(connector.open(&url).is_err());
        assert!(connector.open(&url).is_ok());
        assert_eq!(connector.opened_count(), 1);
    }
}
