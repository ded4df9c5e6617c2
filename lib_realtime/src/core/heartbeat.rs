//! # Heartbeat Monitor
//!
//! Detects connections that are open at the transport layer but silently dead
//! at the application layer (proxies that keep idle TCP sessions around are the
//! usual culprit). The monitor does not own the socket: it tells its owner when
//! to send a ping and when the connection has stalled, and the owner decides
//! what to do about it. This keeps every timer on the owner's event loop.
//!
//! The wire shape of the ping differs between server deployments, so it is a
//! configuration value ([`HeartbeatDialect`]) rather than a branch in the
//! connection code.

use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior, Sleep};

/// # Heartbeat Dialect
///
/// The ping/pong frame codec spoken by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeartbeatDialect {
    /// `{"type":"ping","payload":{"timestamp":<ms>}}`, answered by `{"type":"pong"}`.
    #[default]
    Generic,
    /// Bare `{"type":"Ping"}`, answered by `{"type":"Pong"}`.
    Bare,
}

impl HeartbeatDialect {
    /// Serialized ping frame for this dialect.
    pub fn ping_frame(&self) -> String {
        match self {
            HeartbeatDialect::Generic => {
                let now = chrono::Utc::now();
                json!({
                    "type": "ping",
                    "payload": { "timestamp": now.timestamp_millis() },
                    "timestamp": now.to_rfc3339(),
                })
                .to_string()
            }
            HeartbeatDialect::Bare => json!({ "type": "Ping" }).to_string(),
        }
    }

    /// Whether an inbound envelope type is a heartbeat answer.
    ///
    /// Both dialects are matched case-insensitively so a pong can never leak
    /// through to subscribers.
    pub fn is_pong(&self, kind: &str) -> bool {
        kind.eq_ignore_ascii_case("pong")
    }
}

/// What the monitor wants its owner to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// The interval elapsed: send a ping if the transport is open, then call
    /// [`HeartbeatMonitor::arm_timeout`].
    SendPing,
    /// No pong arrived within the timeout. Probing has stopped.
    Stalled,
}

/// # Heartbeat Monitor
///
/// Interval + one-shot timeout pair, polled through [`HeartbeatMonitor::next_event`].
#[derive(Debug, Default)]
pub struct HeartbeatMonitor {
    ticker: Option<Interval>,
    timeout: Duration,
    deadline: Option<Pin<Box<Sleep>>>,
}

impl HeartbeatMonitor {
    /// Creates a stopped monitor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts probing. The first ping is due one full `interval` from now.
    /// Any previous interval and armed timeout are discarded first.
    pub fn start(&mut self, interval: Duration, timeout: Duration) {
        self.stop();
        let period = interval.max(Duration::from_millis(1));
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.ticker = Some(ticker);
        self.timeout = timeout;
    }

    /// Cancels the interval and any armed timeout. Idempotent.
    pub fn stop(&mut self) {
        self.ticker = None;
        self.deadline = None;
    }

    /// `true` between `start` and `stop`/stall.
    pub fn is_running(&self) -> bool {
        self.ticker.is_some()
    }

    /// `true` while a ping is outstanding.
    pub fn is_awaiting_pong(&self) -> bool {
        self.deadline.is_some()
    }

    /// Arms the pong timeout after a ping went out.
    ///
    /// An already armed timeout is left alone so repeated ticks cannot push a
    /// stall detection further into the future.
    pub fn arm_timeout(&mut self) {
        if self.ticker.is_some() && self.deadline.is_none() {
            self.deadline = Some(Box::pin(sleep(self.timeout)));
        }
    }

    /// Cancels the armed timeout. Returns `false` for a stray or late pong.
    pub fn on_pong(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    /// Waits for the next heartbeat event. Pending forever while stopped.
    ///
    /// Cancel-safe: dropping the future loses no state.
    pub async fn next_event(&mut self) -> HeartbeatEvent {
        let Some(ticker) = self.ticker.as_mut() else {
            return std::future::pending().await;
        };

        let event = match self.deadline.as_mut() {
            Some(deadline) => tokio::select! {
                biased;
                _ = deadline.as_mut() => HeartbeatEvent::Stalled,
                _ = ticker.tick() => HeartbeatEvent::SendPing,
            },
            None => {
                ticker.tick().await;
                HeartbeatEvent::SendPing
            }
        };

        if event == HeartbeatEvent::Stalled {
            self.stop();
        }
        event
    }
}
