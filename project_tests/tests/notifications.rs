use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use lib_realtime::notifications::{
    ChannelError, ItemSource, NotificationFanout, NotificationKind, NotificationList,
    NotificationRecord, PopupPresenter, PreferencePolicy, PreferenceStore, SharedPreferences,
    SoundPlayer,
};
use lib_realtime::NoToken;
use project_tests::{loopback_config, settle, Harness};
use serde_json::json;

#[derive(Debug, Default, Clone)]
struct Channels {
    calls: Arc<Mutex<Vec<String>>>,
}

impl Channels {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl PopupPresenter for Channels {
    fn present(&self, record: &NotificationRecord) -> Result<(), ChannelError> {
        self.calls.lock().unwrap().push(format!("popup:{}", record.title));
        Ok(())
    }
}

impl SoundPlayer for Channels {
    fn play(&self, kind: NotificationKind) -> Result<(), ChannelError> {
        self.calls.lock().unwrap().push(format!("sound:{kind}"));
        Ok(())
    }
}

/// 23:30 in Taipei.
fn late_evening() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, 15, 30, 0).unwrap()
}

/// 11:00 in Taipei.
fn midday() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, 3, 0, 0).unwrap()
}

struct Wiring {
    list: NotificationList,
    channels: Channels,
}

fn wire(h: &Harness, prefs: SharedPreferences, clock: fn() -> DateTime<Utc>) -> Wiring {
    let list = NotificationList::new();
    let channels = Channels::default();
    let fanout = NotificationFanout::new(prefs)
        .with_list(list.clone())
        .with_popup(channels.clone())
        .with_sound(channels.clone())
        .with_clock(clock);
    let _subscription = fanout.attach(h.client.registry());
    Wiring { list, channels }
}

fn sound_on() -> PreferencePolicy {
    let mut policy = PreferencePolicy::default();
    policy.channels.sound = true;
    policy
}

#[tokio::test(start_paused = true)]
async fn flat_notification_reaches_every_channel() {
    let h = Harness::start(NoToken);
    let w = wire(&h, SharedPreferences::new(sound_on()), midday);
    let peer = h.connect_open(loopback_config()).await;

    peer.send_json(&json!({
        "type": "notification",
        "payload": { "type": "success", "title": "Backup done", "message": "42 GB", "link": "/backups" }
    }));
    settle().await;

    let items = w.list.items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].title, "Backup done");
    assert_eq!(items[0].message, "42 GB");
    assert_eq!(items[0].link.as_deref(), Some("/backups"));
    assert_eq!(items[0].source, ItemSource::Remote);
    assert!(!items[0].read);
    assert_eq!(w.channels.calls(), vec!["popup:Backup done", "sound:success"]);
    h.client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn event_dialect_keeps_the_server_id() {
    let h = Harness::start(NoToken);
    let w = wire(&h, SharedPreferences::new(PreferencePolicy::default()), midday);
    let peer = h.connect_open(loopback_config()).await;

    peer.send_json(&json!({
        "type": "notification",
        "id": "evt-77",
        "occurred_at": "2024-06-03T02:59:00Z",
        "event_type": "user.locked",
        "payload": { "message": "Account alice locked", "category": "security" },
        "metadata": { "source": "auth", "priority": "high" }
    }));
    settle().await;

    let items = w.list.items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, "evt-77");
    assert_eq!(items[0].title, "user.locked");
    assert_eq!(items[0].kind, NotificationKind::Warning);
    // Sound is off by default.
    assert_eq!(w.channels.calls(), vec!["popup:user.locked"]);
    h.client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn redelivered_event_id_is_listed_once() {
    let h = Harness::start(NoToken);
    let w = wire(&h, SharedPreferences::new(PreferencePolicy::default()), midday);
    let peer = h.connect_open(loopback_config()).await;

    let frame = json!({
        "type": "notification",
        "id": "evt-88",
        "event_type": "user.locked",
        "payload": { "title": "Locked", "message": "Account alice locked" },
        "metadata": { "source": "auth", "priority": "normal" }
    });
    peer.send_json(&frame);
    settle().await;
    assert!(w.list.mark_as_read("evt-88"));

    peer.send_json(&frame);
    settle().await;

    let items = w.list.items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, "evt-88");
    assert_eq!(w.list.unread_count(), 1);
    assert!(w.list.mark_as_read("evt-88"));
    assert_eq!(w.list.unread_count(), 0);
    assert!(w.list.remove("evt-88"));
    assert!(w.list.is_empty());
    h.client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn numeric_event_id_still_reaches_the_list() {
    let h = Harness::start(NoToken);
    let w = wire(&h, SharedPreferences::new(PreferencePolicy::default()), midday);
    let peer = h.connect_open(loopback_config()).await;

    peer.send_json(&json!({
        "type": "notification",
        "id": 12345,
        "payload": { "title": "Invoice ready" },
        "metadata": { "priority": "high", "ttl": 3.5 }
    }));
    settle().await;

    let items = w.list.items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, "12345");
    assert_eq!(items[0].kind, NotificationKind::Warning);
    h.client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn disabled_category_suppresses_everything() {
    let h = Harness::start(NoToken);
    let prefs = SharedPreferences::new(sound_on());
    prefs.update(|p| p.categories.subscription_reminders = false);
    let w = wire(&h, prefs.clone(), midday);
    let peer = h.connect_open(loopback_config()).await;

    peer.send_json(&json!({
        "type": "notification",
        "payload": { "title": "Renew", "message": "Plan expires", "category": "subscription" }
    }));
    settle().await;
    assert!(w.list.is_empty());
    assert!(w.channels.calls().is_empty());

    // Preferences are read at delivery time.
    prefs.update(|p| p.categories.subscription_reminders = true);
    peer.send_json(&json!({
        "type": "notification",
        "payload": { "title": "Renew", "message": "Plan expires", "category": "subscription" }
    }));
    settle().await;
    assert_eq!(w.list.len(), 1);
    h.client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn quiet_hours_hold_back_interruptions_but_not_urgent_ones() {
    let h = Harness::start(NoToken);
    let mut policy = sound_on();
    policy.quiet_hours.enabled = true;
    let w = wire(&h, SharedPreferences::new(policy), late_evening);
    let peer = h.connect_open(loopback_config()).await;

    peer.send_json(&json!({
        "type": "notification",
        "payload": { "type": "info", "title": "Digest", "message": "3 new comments" }
    }));
    peer.send_json(&json!({
        "type": "notification",
        "payload": { "type": "error", "title": "Outage", "message": "db down", "urgent": true }
    }));
    settle().await;

    assert_eq!(w.list.len(), 2);
    assert_eq!(w.list.unread_count(), 2);
    assert_eq!(w.channels.calls(), vec!["popup:Outage", "sound:error"]);
    h.client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn malformed_notification_is_dropped() {
    let h = Harness::start(NoToken);
    let w = wire(&h, SharedPreferences::new(PreferencePolicy::default()), midday);
    let peer = h.connect_open(loopback_config()).await;

    peer.send_json(&json!({ "type": "notification", "payload": "just text" }));
    peer.send_json(&json!({ "type": "notification", "payload": { "title": 5 } }));
    settle().await;

    assert!(w.list.is_empty());
    assert!(h.client.is_connected());
    h.client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn stored_preferences_drive_the_fanout() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prefs").join("notifications.json");

    let store = PreferenceStore::open(&path).unwrap();
    store
        .merge(&json!({ "channels": { "popup": false } }))
        .unwrap();
    assert!(path.exists());

    let h = Harness::start(NoToken);
    let reopened = PreferenceStore::open(&path).unwrap();
    let w = wire(&h, reopened.shared(), midday);
    let peer = h.connect_open(loopback_config()).await;

    peer.send_json(&json!({
        "type": "notification",
        "payload": { "type": "warning", "title": "Disk", "message": "93%" }
    }));
    settle().await;
    assert_eq!(w.list.len(), 1);
    assert!(w.channels.calls().is_empty());

    reopened.reset().unwrap();
    assert!(!path.exists());
    peer.send_json(&json!({
        "type": "notification",
        "payload": { "type": "warning", "title": "Disk", "message": "95%" }
    }));
    settle().await;
    assert_eq!(w.channels.calls(), vec!["popup:Disk"]);
    h.client.shutdown().await;
}
