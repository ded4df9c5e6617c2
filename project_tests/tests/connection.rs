use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lib_realtime::core::machine::{CLIENT_DISCONNECT, CLIENT_RECONNECT, HEARTBEAT_TIMEOUT, MAX_ATTEMPTS_REACHED};
use lib_realtime::transport::TransportError;
use lib_realtime::{ConnectionStatus, HeartbeatDialect, NoToken, StaticToken};
use project_tests::{loopback_config, settle, EventLog, Harness};
use serde_json::json;
use tokio::time::{sleep, timeout, Instant};

fn assert_waited(start: Instant, expected: Duration) {
    let elapsed = start.elapsed();
    assert!(
        elapsed >= expected && elapsed < expected + Duration::from_millis(50),
        "waited {elapsed:?}, expected about {expected:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn token_is_sent_as_urlencoded_query_parameter() {
    let h = Harness::start(StaticToken("s3cret token".into()));
    let peer = h.connect(loopback_config()).await;
    assert_eq!(peer.url().as_str(), "ws://loopback.test/ws?token=s3cret+token");
    h.client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn token_is_read_again_for_every_attempt() {
    let issued = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&issued);
    let h = Harness::start(move || Some(format!("t{}", counter.fetch_add(1, Ordering::SeqCst))));

    let first = h.connect(loopback_config()).await;
    assert_eq!(first.url().query(), Some("token=t0"));
    first.close(1006, "gone");

    let second = h.next_peer().await;
    assert_eq!(second.url().query(), Some("token=t1"));
    assert_eq!(issued.load(Ordering::SeqCst), 2);
    h.client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn connected_and_disconnected_events_reach_subscribers() {
    let h = Harness::start(NoToken);
    let log = EventLog::new();
    let _all = log.subscribe(&h.client, "*");

    let peer = h.connect(loopback_config()).await;
    settle().await;
    assert_eq!(h.client.status(), ConnectionStatus::Connecting);
    assert!(log.events().is_empty());

    peer.open();
    let state = h.wait_for(|s| s.is_connected()).await;
    assert_eq!(state.reconnect_attempts, 0);
    assert!(state.last_connected_at.is_some());

    peer.close(1001, "going away");
    let state = h.wait_for(|s| s.status == ConnectionStatus::Reconnecting).await;
    assert_eq!(state.reconnect_attempts, 1);

    assert_eq!(log.kinds(), vec!["connected", "disconnected"]);
    let disconnected = &log.of_kind("disconnected")[0];
    assert_eq!(disconnected.payload, json!({ "code": 1001, "reason": "going away" }));
    assert!(disconnected.timestamp.is_some());
    h.client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn reconnect_delays_grow_by_half_each_attempt() {
    let h = Harness::start(NoToken);
    let first = h.connect(loopback_config()).await;

    let start = Instant::now();
    first.close(1006, "refused");
    let second = h.next_peer().await;
    assert_waited(start, Duration::from_millis(3000));

    let start = Instant::now();
    second.close(1006, "refused");
    let third = h.next_peer().await;
    assert_waited(start, Duration::from_millis(4500));

    // An opened connection resets the counter.
    third.open();
    h.wait_for(|s| s.is_connected()).await;
    let start = Instant::now();
    third.close(1006, "dropped");
    let _fourth = h.next_peer().await;
    assert_waited(start, Duration::from_millis(3000));
    h.client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn delay_cap_bounds_each_wait() {
    let h = Harness::start(NoToken);
    let mut config = loopback_config();
    config.reconnect_interval = Duration::from_secs(4);
    config.reconnect_max_delay = Some(Duration::from_secs(5));

    let mut peer = h.connect(config).await;
    for expected in [4000, 5000, 5000] {
        let start = Instant::now();
        peer.close(1006, "refused");
        peer = h.next_peer().await;
        assert_waited(start, Duration::from_millis(expected));
    }
    h.client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn exhausted_attempts_end_in_failed_until_connect() {
    let h = Harness::start(NoToken);
    let mut config = loopback_config();
    config.max_reconnect_attempts = 2;

    let first = h.connect(config.clone()).await;
    first.close(1006, "refused");
    let second = h.next_peer().await;
    second.close(1006, "refused");
    let third = h.next_peer().await;
    third.close(1006, "refused");

    let state = h.wait_for(|s| s.status == ConnectionStatus::Failed).await;
    assert_eq!(state.reconnect_attempts, 2);
    assert_eq!(state.last_error.as_deref(), Some(MAX_ATTEMPTS_REACHED));

    let more = timeout(Duration::from_secs(600), h.connector.next_peer()).await;
    assert!(more.is_err(), "no attempt may follow exhaustion");
    assert_eq!(h.connector.opened_count(), 3);

    // Only a fresh connect leaves the failed state.
    let fresh = h.connect(config).await;
    settle().await;
    let state = h.client.state();
    assert_eq!(state.status, ConnectionStatus::Connecting);
    assert_eq!(state.reconnect_attempts, 0);
    assert_eq!(state.last_error, None);
    fresh.open();
    h.wait_for(|s| s.is_connected()).await;
    h.client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn disconnect_is_final_and_idempotent() {
    let h = Harness::start(NoToken);
    let log = EventLog::new();
    let _sub = log.subscribe(&h.client, "disconnected");

    let peer = h.connect_open(loopback_config()).await;
    h.client.disconnect();
    let state = h.wait_for(|s| s.status == ConnectionStatus::Disconnected).await;
    assert_eq!(state.reconnect_attempts, 0);
    assert_eq!(peer.close_request(), Some((1000, CLIENT_DISCONNECT.to_string())));
    assert!(!h.client.is_socket_open());

    h.client.disconnect();
    settle().await;

    let more = timeout(Duration::from_secs(600), h.connector.next_peer()).await;
    assert!(more.is_err(), "disconnect must cancel reconnects");
    assert_eq!(h.connector.opened_count(), 1);

    let events = log.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].payload, json!({ "code": 1000, "reason": CLIENT_DISCONNECT }));
    h.client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn disconnect_while_waiting_cancels_the_timer() {
    let h = Harness::start(NoToken);
    let peer = h.connect(loopback_config()).await;
    peer.close(1006, "refused");
    h.wait_for(|s| s.status == ConnectionStatus::Reconnecting).await;

    h.client.disconnect();
    let more = timeout(Duration::from_secs(60), h.connector.next_peer()).await;
    assert!(more.is_err());
    assert_eq!(h.client.status(), ConnectionStatus::Disconnected);
    h.client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn forced_reconnect_drops_and_reopens() {
    let h = Harness::start(NoToken);
    let log = EventLog::new();
    let _sub = log.subscribe(&h.client, "disconnected");

    let peer = h.connect_open(loopback_config()).await;
    let start = Instant::now();
    h.client.reconnect();
    let state = h.wait_for(|s| s.status == ConnectionStatus::Reconnecting).await;
    assert_eq!(state.reconnect_attempts, 1);
    assert_eq!(peer.close_request(), Some((1000, CLIENT_RECONNECT.to_string())));

    let next = h.next_peer().await;
    assert_waited(start, Duration::from_millis(3000));
    next.open();
    h.wait_for(|s| s.is_connected()).await;

    let events = log.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].payload["reason"], CLIENT_RECONNECT);
    h.client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn reconnect_before_connect_is_ignored() {
    let h = Harness::start(NoToken);
    h.client.reconnect();
    settle().await;
    let more = timeout(Duration::from_secs(60), h.connector.next_peer()).await;
    assert!(more.is_err());
    assert_eq!(h.client.status(), ConnectionStatus::Disconnected);
    h.client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn connect_replaces_the_current_transport() {
    let h = Harness::start(NoToken);
    let log = EventLog::new();
    let _sub = log.subscribe(&h.client, "update");

    let old = h.connect_open(loopback_config()).await;
    let new = h.connect(loopback_config()).await;
    assert!(old.close_request().is_some());
    assert_eq!(h.connector.opened_count(), 2);

    // Frames from the replaced transport are never delivered.
    old.send_json(&json!({ "type": "update", "payload": { "from": "old" } }));
    new.open();
    h.wait_for(|s| s.is_connected()).await;
    new.send_json(&json!({ "type": "update", "payload": { "from": "new" } }));
    settle().await;

    let updates = log.events();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].payload["from"], "new");
    h.client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn pongs_never_reach_subscribers() {
    let h = Harness::start(NoToken);
    let log = EventLog::new();
    let _all = log.subscribe(&h.client, "*");

    let peer = h.connect_open(loopback_config()).await;
    peer.send_json(&json!({ "type": "pong" }));
    peer.send_json(&json!({ "type": "Pong" }));
    peer.send_json(&json!({ "type": "update", "payload": { "x": 1 } }));
    settle().await;

    assert_eq!(log.kinds(), vec!["connected", "update"]);
    assert_eq!(log.of_kind("update")[0].payload, json!({ "x": 1 }));
    h.client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn malformed_frames_are_dropped_without_closing() {
    let h = Harness::start(NoToken);
    let log = EventLog::new();
    let _sub = log.subscribe(&h.client, "*");

    let peer = h.connect_open(loopback_config()).await;
    peer.send_text("not json");
    peer.send_text("[1, 2, 3]");
    peer.send_json(&json!({ "payload": "no type" }));
    peer.send_json(&json!({ "type": "update" }));
    settle().await;

    assert_eq!(log.kinds(), vec!["connected", "update"]);
    // Without a payload field the whole body is the payload.
    assert_eq!(log.of_kind("update")[0].payload, json!({ "type": "update" }));
    assert!(h.client.is_connected());
    h.client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn heartbeat_pings_and_pong_keeps_the_connection() {
    let h = Harness::start(NoToken);
    let peer = h.connect_open(loopback_config()).await;

    sleep(Duration::from_secs(30)).await;
    settle().await;
    let sent = peer.sent_json();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["type"], "ping");
    assert!(sent[0]["payload"]["timestamp"].is_i64());

    peer.send_json(&json!({ "type": "pong" }));
    sleep(Duration::from_secs(10)).await;
    assert!(h.client.is_connected());
    assert_eq!(peer.close_request(), None);

    sleep(Duration::from_secs(21)).await;
    let pings = peer.sent_json().into_iter().filter(|f| f["type"] == "ping").count();
    assert_eq!(pings, 2);
    h.client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn bare_dialect_heartbeat() {
    let h = Harness::start(NoToken);
    let mut config = loopback_config();
    config.heartbeat_dialect = HeartbeatDialect::Bare;
    config.heartbeat_interval = Duration::from_secs(5);
    config.heartbeat_timeout = Duration::from_secs(2);
    let peer = h.connect_open(config).await;

    sleep(Duration::from_secs(5)).await;
    settle().await;
    assert_eq!(peer.sent_frames(), vec![r#"{"type":"Ping"}"#.to_string()]);
    peer.send_json(&json!({ "type": "Pong" }));

    sleep(Duration::from_secs(4)).await;
    assert!(h.client.is_connected());
    h.client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn missing_pong_drops_and_reconnects() {
    let h = Harness::start(NoToken);
    let log = EventLog::new();
    let _sub = log.subscribe(&h.client, "disconnected");
    let peer = h.connect_open(loopback_config()).await;

    sleep(Duration::from_secs(30)).await;
    settle().await;
    assert_eq!(peer.sent_json().len(), 1);

    sleep(Duration::from_secs(5)).await;
    settle().await;
    assert_eq!(peer.close_request(), Some((4000, HEARTBEAT_TIMEOUT.to_string())));
    let state = h.client.state();
    assert_eq!(state.status, ConnectionStatus::Reconnecting);
    assert_eq!(state.reconnect_attempts, 1);
    assert_eq!(log.events()[0].payload, json!({ "code": 4000, "reason": HEARTBEAT_TIMEOUT }));

    let next = h.next_peer().await;
    next.open();
    h.wait_for(|s| s.is_connected()).await;
    h.client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn transport_error_is_published() {
    let h = Harness::start(NoToken);
    let peer = h.connect_open(loopback_config()).await;

    peer.error("tls alert");
    let state = h.wait_for(|s| s.status == ConnectionStatus::Error).await;
    assert_eq!(state.last_error.as_deref(), Some("tls alert"));

    peer.close(1006, "");
    let state = h.wait_for(|s| s.status == ConnectionStatus::Reconnecting).await;
    assert_eq!(state.reconnect_attempts, 1);
    h.client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn connector_failure_schedules_a_retry() {
    let h = Harness::start(NoToken);
    h.connector
        .fail_next_open(TransportError::Connect("connection refused".into()));

    h.client.connect(loopback_config());
    let state = h.wait_for(|s| s.status == ConnectionStatus::Reconnecting).await;
    assert_eq!(state.reconnect_attempts, 1);
    assert!(state
        .last_error
        .as_deref()
        .is_some_and(|e| e.contains("connection refused")));
    assert_eq!(h.connector.opened_count(), 0);

    let peer = h.next_peer().await;
    peer.open();
    let state = h.wait_for(|s| s.is_connected()).await;
    assert_eq!(state.last_error, None);
    h.client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn send_requires_an_open_transport() {
    let h = Harness::start(NoToken);
    assert!(!h.client.send_event("chat", json!({ "text": "early" })));

    let peer = h.connect(loopback_config()).await;
    settle().await;
    assert!(!h.client.send_event("chat", json!({ "text": "still early" })));

    peer.open();
    h.wait_for(|s| s.is_connected()).await;
    assert!(h.client.send_event("chat", json!({ "text": "hi" })));
    let sent = peer.sent_json();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["type"], "chat");
    assert_eq!(sent[0]["payload"], json!({ "text": "hi" }));
    assert!(sent[0]["timestamp"].is_string());

    peer.close(1006, "gone");
    h.wait_for(|s| s.status == ConnectionStatus::Reconnecting).await;
    assert!(!h.client.send_event("chat", json!({ "text": "late" })));
    h.client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn subscriptions_survive_reconnects() {
    let h = Harness::start(NoToken);
    let log = EventLog::new();
    let sub = log.subscribe(&h.client, "update");

    let first = h.connect_open(loopback_config()).await;
    first.send_json(&json!({ "type": "update", "payload": 1 }));
    settle().await;
    first.close(1006, "dropped");

    let second = h.next_peer().await;
    second.open();
    h.wait_for(|s| s.is_connected()).await;
    second.send_json(&json!({ "type": "update", "payload": 2 }));
    settle().await;
    assert_eq!(log.events().len(), 2);

    assert!(sub.cancel());
    second.send_json(&json!({ "type": "update", "payload": 3 }));
    settle().await;
    assert_eq!(log.events().len(), 2);
    h.client.shutdown().await;
}
