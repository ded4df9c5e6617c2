//! # Notification Fan-out
//!
//! Routes each normalized notification to the three presentation channels.
//!
//! ## Gating:
//! 1. **Category**: a disabled category suppresses every channel.
//! 2. **List**: only its own flag; quiet hours do not apply to history.
//! 3. **Pop-up / sound**: their flag, then quiet hours, which urgent records
//!    bypass when the policy allows it.
//!
//! Channels never fail the delivery. Errors are logged at debug level and the
//! remaining channels still run.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::core::registry::{Registry, Subscription};
use crate::envelope::Envelope;
use crate::notifications::list::{ItemSource, NotificationList};
use crate::notifications::normalize::{NotificationKind, NotificationRecord, NOTIFICATION_EVENT};
use crate::notifications::preferences::PreferenceSource;

/// Failures reported by a presentation channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The platform has no implementation for this channel.
    #[error("channel unsupported on this platform: {0}")]
    Unsupported(String),
    /// The user or OS refused the channel.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// A helper process or device could not be used.
    #[error("channel failed: {0}")]
    Failed(String),
    /// No tokio runtime to run the channel on.
    #[error("no async runtime available")]
    NoRuntime,
}

/// Persisted in-app history.
pub trait NotificationSink: Send + Sync {
    /// Appends `record`.
    fn append(&self, record: &NotificationRecord) -> Result<(), ChannelError>;
}

/// Native pop-up.
pub trait PopupPresenter: Send + Sync {
    /// Shows `record`. Must not block.
    fn present(&self, record: &NotificationRecord) -> Result<(), ChannelError>;
}

/// Audio cue.
pub trait SoundPlayer: Send + Sync {
    /// Plays the cue for `kind`. Must not block.
    fn play(&self, kind: NotificationKind) -> Result<(), ChannelError>;
}

impl NotificationSink for NotificationList {
    fn append(&self, record: &NotificationRecord) -> Result<(), ChannelError> {
        self.add(record, ItemSource::Remote);
        Ok(())
    }
}

/// Which channels a delivery invoked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// The list channel was invoked.
    pub list: bool,
    /// The pop-up channel was invoked.
    pub popup: bool,
    /// The sound channel was invoked.
    pub sound: bool,
}

impl DeliveryReport {
    /// No channel was invoked.
    pub fn is_empty(&self) -> bool {
        !(self.list || self.popup || self.sound)
    }
}

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// # Notification Fan-out
#[derive(Clone)]
pub struct NotificationFanout {
    prefs: Arc<dyn PreferenceSource>,
    list: Option<Arc<dyn NotificationSink>>,
    popup: Option<Arc<dyn PopupPresenter>>,
    sound: Option<Arc<dyn SoundPlayer>>,
    clock: Clock,
}

impl std::fmt::Debug for NotificationFanout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationFanout")
            .field("list", &self.list.is_some())
            .field("popup", &self.popup.is_some())
            .field("sound", &self.sound.is_some())
            .finish_non_exhaustive()
    }
}

impl NotificationFanout {
    /// Fan-out with no channels attached, reading policy from `prefs`.
    pub fn new(prefs: impl PreferenceSource + 'static) -> Self {
        Self {
            prefs: Arc::new(prefs),
            list: None,
            popup: None,
            sound: None,
            clock: Arc::new(Utc::now),
        }
    }

    /// Attaches the list channel.
    pub fn with_list(mut self, sink: impl NotificationSink + 'static) -> Self {
        self.list = Some(Arc::new(sink));
        self
    }

    /// Attaches the pop-up channel.
    pub fn with_popup(mut self, popup: impl PopupPresenter + 'static) -> Self {
        self.popup = Some(Arc::new(popup));
        self
    }

    /// Attaches the sound channel.
    pub fn with_sound(mut self, sound: impl SoundPlayer + 'static) -> Self {
        self.sound = Some(Arc::new(sound));
        self
    }

    /// Replaces the wall clock used for quiet hours.
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Applies the current policy to `record` and invokes the allowed channels.
    pub fn deliver(&self, record: &NotificationRecord) -> DeliveryReport {
        let policy = self.prefs.current();
        let mut report = DeliveryReport::default();

        if !policy.category_allowed(record.category) {
            tracing::debug!(category = ?record.category, title = %record.title, "notification category disabled");
            return report;
        }

        if policy.channels.list {
            if let Some(list) = &self.list {
                report.list = true;
                if let Err(e) = list.append(record) {
                    tracing::debug!(error = %e, "list channel failed");
                }
            }
        }

        let quiet = policy.is_quiet_for(record, (self.clock)());
        if quiet {
            tracing::debug!(title = %record.title, "quiet hours: pop-up and sound suppressed");
        }

        if policy.channels.popup && !quiet {
            if let Some(popup) = &self.popup {
                report.popup = true;
                if let Err(e) = popup.present(record) {
                    tracing::debug!(error = %e, "pop-up channel failed");
                }
            }
        }

        if policy.channels.sound && !quiet {
            if let Some(sound) = &self.sound {
                report.sound = true;
                if let Err(e) = sound.play(record.kind) {
                    tracing::debug!(error = %e, "sound channel failed");
                }
            }
        }

        report
    }

    /// Normalizes a `"notification"` envelope and delivers it. Malformed
    /// notifications are logged and dropped.
    pub fn handle(&self, envelope: &Envelope) -> DeliveryReport {
        match NotificationRecord::from_envelope(envelope) {
            Ok(record) => self.deliver(&record),
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed notification");
                DeliveryReport::default()
            }
        }
    }

    /// Subscribes this fan-out to `"notification"` events on `registry`.
    pub fn attach(self, registry: &Registry) -> Subscription {
        registry.on(NOTIFICATION_EVENT, move |_payload: &Value, envelope| {
            self.handle(envelope);
        })
    }
}
