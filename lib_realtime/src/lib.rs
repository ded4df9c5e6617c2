//! # lib_realtime
//!
//! The realtime layer of the admin dashboard: a single authenticated duplex
//! connection to the event server, kept alive with application-level
//! heartbeats and bounded exponential reconnects, whose frames are routed to
//! typed subscribers and to the notification presentation policy.
//!
//! ## Layout
//! - **`core`**: backoff, heartbeat monitor, connection state machine and the
//!   dispatch registry.
//! - **`client`**: the public [`RealtimeClient`] handle.
//! - **`transport`**: the `Connector` seam plus the loopback and (feature `ws`)
//!   tokio-tungstenite implementations.
//! - **`notifications`**: normalization of both server notification dialects,
//!   preference policy, in-app list and fan-out channels.
//! - **`configs`** / **`loggers`**: ambient settings and tracing setup, gated
//!   behind features like the rest of the optional modules.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod auth;
pub mod client;
pub mod core;
pub mod envelope;
pub mod notifications;
pub mod transport;

#[cfg(feature = "configs")]
pub mod configs;
#[cfg(feature = "loggers")]
pub mod loggers;

// --- Public API Re-exports ---
pub use auth::{EnvToken, NoToken, StaticToken, TokenSource};
pub use client::RealtimeClient;
pub use crate::core::backoff::BackoffPolicy;
pub use crate::core::heartbeat::HeartbeatDialect;
pub use crate::core::registry::{HandlerId, Registry, Subscription};
pub use crate::core::state::{ConnectionConfig, ConnectionState, ConnectionStatus};
pub use envelope::Envelope;
pub use transport::{Connector, TransportError, TransportEvent, TransportSocket};
