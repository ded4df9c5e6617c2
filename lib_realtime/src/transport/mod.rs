//! # Transport Module
//!
//! The seam between the connection state machine and the actual duplex,
//! message-framed connection. A [`Connector`] opens a transport synchronously
//! and hands back a [`TransportLink`]: a socket handle for outbound traffic
//! plus the stream of [`TransportEvent`]s the state machine consumes.
//!
//! ## Implementations:
//! - **`loopback`**: in-process transport driven by a [`loopback::LoopbackPeer`].
//!   Used by the test suites and by embedders that bridge their own socket.
//! - **`ws`** (feature `ws`): tokio-tungstenite WebSocket client.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use url::Url;

/// In-process transport.
pub mod loopback;
/// tokio-tungstenite transport.
#[cfg(feature = "ws")]
pub mod ws;

pub use loopback::{LoopbackConnector, LoopbackPeer};
#[cfg(feature = "ws")]
pub use ws::WsConnector;

/// Normal closure code.
pub const CLOSE_NORMAL: u16 = 1000;
/// Abnormal closure code (no close frame received).
pub const CLOSE_ABNORMAL: u16 = 1006;
/// Application close code used when the heartbeat detects a dead connection.
pub const CLOSE_HEARTBEAT_TIMEOUT: u16 = 4000;

/// Transport-level failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The endpoint cannot be used by this transport.
    #[error("invalid endpoint {url}: {reason}")]
    InvalidUrl {
        /// Offending endpoint.
        url: String,
        /// Why it was rejected.
        reason: String,
    },
    /// Connecting failed.
    #[error("connection failed: {0}")]
    Connect(String),
    /// The socket is not open.
    #[error("socket is not open")]
    NotOpen,
    /// The socket is gone.
    #[error("socket closed")]
    Closed,
}

/// Lifecycle and data events raised by a transport, in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection is established.
    Open,
    /// A text frame arrived.
    Message(String),
    /// The transport reported an error. A `Close` normally follows.
    Error(String),
    /// The connection is closed. Terminal for this link.
    Close {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

/// Outbound half of an opened transport.
pub trait TransportSocket: Send + Sync + fmt::Debug {
    /// The URL this socket was opened with (token included).
    fn url(&self) -> &Url;
    /// Whether frames can be sent right now.
    fn is_open(&self) -> bool;
    /// Queues a text frame. Never blocks.
    fn send_text(&self, text: String) -> Result<(), TransportError>;
    /// Starts a close handshake. Idempotent.
    fn close(&self, code: u16, reason: &str);
}

/// A freshly opened transport.
pub struct TransportLink {
    /// Outbound handle.
    pub socket: Arc<dyn TransportSocket>,
    /// Inbound lifecycle and message events.
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl fmt::Debug for TransportLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportLink")
            .field("socket", &self.socket)
            .finish_non_exhaustive()
    }
}

/// Opens transports. Called from the connection event loop, so it must not block.
pub trait Connector: Send + Sync + 'static {
    /// Begins opening `url`. Completion is reported as [`TransportEvent::Open`]
    /// or as `Error` + `Close` on the returned link.
    fn open(&self, url: &Url) -> Result<TransportLink, TransportError>;
}

impl<C: Connector + ?Sized> Connector for Arc<C> {
    fn open(&self, url: &Url) -> Result<TransportLink, TransportError> {
        (**self).open(url)
    }
}
