//! # Core Engine Module
//!
//! The connection engine of the realtime client. Everything in here runs on,
//! or is called from, the single event loop that owns a connection.
//!
//! ## Core Components:
//!
//! - **`backoff`**: pure reconnect-delay arithmetic.
//! - **`heartbeat`**: the ping/pong liveness prober that detects connections
//!   which are open at the TCP layer but dead at the application layer.
//! - **`state`**: connection configuration and the published state snapshot.
//! - **`machine`**: the connection state machine. Owns the transport handle,
//!   the heartbeat monitor and the reconnect timer.
//! - **`registry`**: the publish/subscribe table that routes decoded envelopes
//!   to subscribers by event type.

/// Reconnect delay computation.
pub mod backoff;
/// Application-level liveness probing.
pub mod heartbeat;
/// The connection state machine event loop.
pub mod machine;
/// Event-type keyed publish/subscribe table.
pub mod registry;
/// Connection configuration and state snapshot.
pub mod state;

// --- Public API Re-exports ---
pub use backoff::BackoffPolicy;
pub use heartbeat::{HeartbeatDialect, HeartbeatEvent, HeartbeatMonitor};
pub use registry::{HandlerId, Registry, Subscription, WILDCARD};
pub use state::{ConnectionConfig, ConnectionState, ConnectionStatus};
