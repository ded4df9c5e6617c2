//! # Notification Preferences
//!
//! The user's presentation policy: which categories may notify, when quiet
//! hours apply, and which channels are enabled. The fan-out reads the policy
//! through [`PreferenceSource`] at every delivery, so edits take effect on the
//! next notification without reconnecting.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, NaiveTime, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::notifications::normalize::{NotificationCategory, NotificationRecord};

/// Failures of the preference store.
#[derive(Debug, Error)]
pub enum PreferencesError {
    /// Reading or writing the settings file failed.
    #[error("preferences file {path}: {source}")]
    Io {
        /// Settings file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The settings do not (de)serialize.
    #[error("invalid preferences: {0}")]
    Json(#[from] serde_json::Error),
}

/// Per-category opt-in flags. Uncategorized and `info` notifications always pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CategoryPreferences {
    /// `security` notifications.
    pub security_alerts: bool,
    /// `system` notifications.
    pub system_alerts: bool,
    /// `subscription` notifications.
    pub subscription_reminders: bool,
    /// `user` notifications.
    pub mentions: bool,
}

impl Default for CategoryPreferences {
    fn default() -> Self {
        Self {
            security_alerts: true,
            system_alerts: true,
            subscription_reminders: true,
            mentions: true,
        }
    }
}

/// # Quiet Hours
///
/// Daily window during which pop-ups and sounds are suppressed. A window whose
/// start is later than its end spans midnight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QuietHours {
    /// Window active at all.
    pub enabled: bool,
    /// `HH:MM`, inclusive.
    #[serde(rename = "startTime")]
    pub start: String,
    /// `HH:MM`, exclusive.
    #[serde(rename = "endTime")]
    pub end: String,
    /// IANA timezone the window is expressed in.
    pub timezone: String,
    /// Urgent notifications pass during the window.
    pub allow_urgent: bool,
}

impl Default for QuietHours {
    fn default() -> Self {
        Self {
            enabled: false,
            start: "22:00".to_string(),
            end: "08:00".to_string(),
            timezone: "Asia/Taipei".to_string(),
            allow_urgent: true,
        }
    }
}

fn minutes_of(hhmm: &str) -> Option<u32> {
    let time = NaiveTime::parse_from_str(hhmm.trim(), "%H:%M").ok()?;
    Some(time.hour() * 60 + time.minute())
}

impl QuietHours {
    /// Whether `now` falls inside the window. Unparseable times disable the
    /// window; an unknown timezone falls back to UTC.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        let (Some(start), Some(end)) = (minutes_of(&self.start), minutes_of(&self.end)) else {
            tracing::debug!(start = %self.start, end = %self.end, "quiet hours ignored: bad time");
            return false;
        };

        let local = match self.timezone.parse::<Tz>() {
            Ok(tz) => now.with_timezone(&tz).time(),
            Err(_) => {
                tracing::debug!(timezone = %self.timezone, "unknown timezone; using UTC");
                now.time()
            }
        };
        let current = local.hour() * 60 + local.minute();

        if start > end {
            current >= start || current < end
        } else {
            current >= start && current < end
        }
    }
}

/// Per-channel enable flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelPreferences {
    /// In-app notification list.
    pub list: bool,
    /// Native pop-up.
    pub popup: bool,
    /// Audio cue.
    pub sound: bool,
}

impl Default for ChannelPreferences {
    fn default() -> Self {
        Self {
            list: true,
            popup: true,
            sound: false,
        }
    }
}

/// # Preference Policy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PreferencePolicy {
    /// Category opt-ins.
    pub categories: CategoryPreferences,
    /// Quiet-hours window.
    pub quiet_hours: QuietHours,
    /// Channel flags.
    pub channels: ChannelPreferences,
}

impl PreferencePolicy {
    /// Category gate. `false` suppresses every channel.
    pub fn category_allowed(&self, category: Option<NotificationCategory>) -> bool {
        match category {
            Some(NotificationCategory::Security) => self.categories.security_alerts,
            Some(NotificationCategory::System) => self.categories.system_alerts,
            Some(NotificationCategory::Subscription) => self.categories.subscription_reminders,
            Some(NotificationCategory::User) => self.categories.mentions,
            Some(NotificationCategory::Info) | Some(NotificationCategory::Other) | None => true,
        }
    }

    /// Whether quiet hours hold `record` back from the interruptive channels.
    pub fn is_quiet_for(&self, record: &NotificationRecord, now: DateTime<Utc>) -> bool {
        if !self.quiet_hours.is_active_at(now) {
            return false;
        }
        !(record.urgent && self.quiet_hours.allow_urgent)
    }
}

/// Supplies the policy in force right now.
pub trait PreferenceSource: Send + Sync {
    /// Current policy snapshot.
    fn current(&self) -> PreferencePolicy;
}

impl PreferenceSource for PreferencePolicy {
    fn current(&self) -> PreferencePolicy {
        self.clone()
    }
}

/// In-memory policy shared between an editor and the fan-out.
#[derive(Debug, Clone, Default)]
pub struct SharedPreferences {
    inner: Arc<RwLock<PreferencePolicy>>,
}

impl SharedPreferences {
    /// Wraps `policy`.
    pub fn new(policy: PreferencePolicy) -> Self {
        Self {
            inner: Arc::new(RwLock::new(policy)),
        }
    }

    /// Replaces the policy.
    pub fn set(&self, policy: PreferencePolicy) {
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = policy;
    }

    /// Edits the policy in place.
    pub fn update(&self, f: impl FnOnce(&mut PreferencePolicy)) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        f(&mut *guard);
    }
}

impl PreferenceSource for SharedPreferences {
    fn current(&self) -> PreferencePolicy {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// # Preference Store
///
/// A [`SharedPreferences`] persisted as JSON. Every mutation is written
/// through to the file.
#[derive(Debug, Clone)]
pub struct PreferenceStore {
    path: PathBuf,
    shared: SharedPreferences,
}

impl PreferenceStore {
    /// Loads `path`, or starts from defaults when it does not exist. A file
    /// that cannot be parsed is ignored with a warning.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PreferencesError> {
        let path = path.into();
        let policy = match fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(policy) => policy,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "preferences unreadable; using defaults");
                    PreferencePolicy::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PreferencePolicy::default(),
            Err(source) => return Err(PreferencesError::Io { path, source }),
        };
        Ok(Self {
            path,
            shared: SharedPreferences::new(policy),
        })
    }

    /// Settings file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Handle for readers such as the fan-out.
    pub fn shared(&self) -> SharedPreferences {
        self.shared.clone()
    }

    /// Writes the current policy.
    pub fn save(&self) -> Result<(), PreferencesError> {
        let text = serde_json::to_string_pretty(&self.shared.current())?;
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|source| PreferencesError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        fs::write(&self.path, text).map_err(|source| PreferencesError::Io {
            path: self.path.clone(),
            source,
        })
    }

    /// Replaces the whole policy and saves.
    pub fn set(&self, policy: PreferencePolicy) -> Result<(), PreferencesError> {
        self.shared.set(policy);
        self.save()
    }

    /// Edits the policy and saves.
    pub fn update(&self, f: impl FnOnce(&mut PreferencePolicy)) -> Result<(), PreferencesError> {
        self.shared.update(f);
        self.save()
    }

    /// Merges a partial camelCase JSON document into the policy and saves.
    /// Sections absent from `partial` are left as they are.
    pub fn merge(&self, partial: &Value) -> Result<(), PreferencesError> {
        let mut current = serde_json::to_value(self.shared.current())?;
        merge_json(&mut current, partial);
        let merged: PreferencePolicy = serde_json::from_value(current)?;
        self.set(merged)
    }

    /// Restores defaults and removes the file.
    pub fn reset(&self) -> Result<(), PreferencesError> {
        self.shared.set(PreferencePolicy::default());
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(PreferencesError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

impl PreferenceSource for PreferenceStore {
    fn current(&self) -> PreferencePolicy {
        self.shared.current()
    }
}

fn merge_json(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            for (key, value) in patch {
                match base.get_mut(key) {
                    Some(slot) => merge_json(slot, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (slot, value) => *slot = value.clone(),
    }
}
