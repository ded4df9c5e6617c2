//! # Notifications Module
//!
//! Turns `"notification"` events into user-facing presentation.
//!
//! ## Pipeline:
//! - **`normalize`**: classifies the frame by dialect and reduces it to a
//!   [`NotificationRecord`].
//! - **`preferences`**: the [`PreferencePolicy`] consulted at every delivery.
//! - **`fanout`**: gates and invokes the list, pop-up and sound channels.
//! - **`list`**: the in-app history.
//! - **`channels`** (feature `desktop`): OS pop-up and audio implementations.

/// Dialect classification and normalization.
pub mod normalize;
/// Preference policy and persistence.
pub mod preferences;
/// In-app notification history.
pub mod list;
/// Channel gating and dispatch.
pub mod fanout;
/// Native pop-up and audio channels.
#[cfg(feature = "desktop")]
pub mod channels;

pub use fanout::{
    ChannelError, DeliveryReport, NotificationFanout, NotificationSink, PopupPresenter, SoundPlayer,
};
pub use list::{ItemSource, ListItem, NotificationList};
pub use normalize::{
    NormalizeError, NotificationCategory, NotificationKind, NotificationRecord, NotificationSource,
    Priority, NOTIFICATION_EVENT,
};
pub use preferences::{
    PreferencePolicy, PreferenceSource, PreferenceStore, PreferencesError, QuietHours,
    SharedPreferences,
};

#[cfg(feature = "desktop")]
pub use channels::{AudioCue, DesktopPopup, SoundFiles};
