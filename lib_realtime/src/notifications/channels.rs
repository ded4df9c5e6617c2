//! # Desktop Channels
//!
//! Native implementations of the pop-up and sound channels.
//!
//! - **`DesktopPopup`**: `notify-send` on Linux, `osascript` on macOS. The
//!   helper process runs on a blocking task; only one pop-up is spawned at a
//!   time.
//! - **`AudioCue`**: plays a per-kind sound file through `rodio` at a fixed
//!   volume, or a short tone through `actually_beep` when no file is
//!   configured for the kind.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use rodio::{Decoder, OutputStreamBuilder, Sink};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio::task;

use crate::notifications::fanout::{ChannelError, PopupPresenter, SoundPlayer};
use crate::notifications::normalize::{NotificationKind, NotificationRecord};

/// Pop-ups that are not urgent and not errors expire after this long.
pub const POPUP_EXPIRY: Duration = Duration::from_secs(8);

/// Playback volume of notification sounds.
pub const SOUND_VOLUME: f32 = 0.5;

fn runtime() -> Result<Handle, ChannelError> {
    Handle::try_current().map_err(|_| ChannelError::NoRuntime)
}

/// # Desktop Pop-up
#[derive(Debug, Clone)]
pub struct DesktopPopup {
    app_name: String,
    lock: Arc<Mutex<()>>,
}

impl DesktopPopup {
    /// Pop-ups attributed to `app_name`.
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Whether the pop-up stays until dismissed.
    pub fn is_sticky(record: &NotificationRecord) -> bool {
        record.urgent || record.kind == NotificationKind::Error
    }

    fn command(&self, record: &NotificationRecord) -> Result<Command, ChannelError> {
        if cfg!(target_os = "linux") {
            let (urgency, expiry) = if Self::is_sticky(record) {
                ("critical", 0)
            } else {
                ("normal", POPUP_EXPIRY.as_millis())
            };
            let mut cmd = Command::new("notify-send");
            cmd.arg("-a")
                .arg(&self.app_name)
                .arg("-u")
                .arg(urgency)
                .arg("-t")
                .arg(expiry.to_string())
                .arg(&record.title)
                .arg(&record.body);
            Ok(cmd)
        } else if cfg!(target_os = "macos") {
            let script = format!(
                "display notification \"{}\" with title \"{}\" subtitle \"{}\"",
                applescript_escape(&record.body),
                applescript_escape(&self.app_name),
                applescript_escape(&record.title),
            );
            let mut cmd = Command::new("osascript");
            cmd.arg("-e").arg(script);
            Ok(cmd)
        } else {
            Err(ChannelError::Unsupported(std::env::consts::OS.to_string()))
        }
    }
}

fn applescript_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

impl PopupPresenter for DesktopPopup {
    fn present(&self, record: &NotificationRecord) -> Result<(), ChannelError> {
        let handle = runtime()?;
        let mut cmd = self.command(record)?;
        let lock = Arc::clone(&self.lock);
        let title = record.title.clone();

        handle.spawn(async move {
            let _guard = lock.lock().await;
            let outcome = task::spawn_blocking(move || cmd.output()).await;
            match outcome {
                Ok(Ok(output)) if output.status.success() => {}
                Ok(Ok(output)) => {
                    let err = ChannelError::PermissionDenied(
                        String::from_utf8_lossy(&output.stderr).trim().to_string(),
                    );
                    tracing::debug!(%title, error = %err, "pop-up refused");
                }
                Ok(Err(e)) => {
                    let err = ChannelError::Failed(e.to_string());
                    tracing::debug!(%title, error = %err, "pop-up helper not available");
                }
                Err(e) => tracing::debug!(%title, error = %e, "pop-up task failed"),
            }
        });
        Ok(())
    }
}

/// Sound files per notification kind. `default` is used for `info` and for
/// any kind without its own file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SoundFiles {
    /// Fallback sound.
    pub default: Option<PathBuf>,
    /// Success sound.
    pub success: Option<PathBuf>,
    /// Warning sound.
    pub warning: Option<PathBuf>,
    /// Error sound.
    pub error: Option<PathBuf>,
}

impl SoundFiles {
    /// Resolves the file for `kind`.
    pub fn for_kind(&self, kind: NotificationKind) -> Option<&PathBuf> {
        let specific = match kind {
            NotificationKind::Info => None,
            NotificationKind::Success => self.success.as_ref(),
            NotificationKind::Warning => self.warning.as_ref(),
            NotificationKind::Error => self.error.as_ref(),
        };
        specific.or(self.default.as_ref())
    }
}

/// # Audio Cue
#[derive(Debug, Clone)]
pub struct AudioCue {
    files: SoundFiles,
    volume: f32,
    lock: Arc<Mutex<()>>,
}

impl AudioCue {
    /// Plays `files` at [`SOUND_VOLUME`].
    pub fn new(files: SoundFiles) -> Self {
        Self {
            files,
            volume: SOUND_VOLUME,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Overrides the playback volume.
    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume.clamp(0.0, 1.0);
        self
    }
}

fn beep(kind: NotificationKind) -> Result<(), ChannelError> {
    let outcome = match kind {
        NotificationKind::Info => actually_beep::beep_with_hz_and_millis(660, 150),
        NotificationKind::Success => actually_beep::beep_with_hz_and_millis(880, 150),
        NotificationKind::Warning => actually_beep::beep_with_hz_and_millis(440, 300),
        NotificationKind::Error => actually_beep::beep_with_hz_and_millis(329, 600),
    };
    outcome.map_err(|e| ChannelError::Failed(format!("beep: {e}")))
}

fn play_file(path: &Path, volume: f32) -> Result<(), ChannelError> {
    let stream = OutputStreamBuilder::open_default_stream()
        .map_err(|e| ChannelError::Unsupported(format!("no audio output: {e}")))?;
    let sink = Sink::connect_new(stream.mixer());

    let file = File::open(path)
        .map_err(|e| ChannelError::Failed(format!("{}: {e}", path.display())))?;
    let source = Decoder::new(BufReader::new(file))
        .map_err(|e| ChannelError::Failed(format!("{}: {e}", path.display())))?;

    sink.set_volume(volume);
    sink.append(source);
    sink.sleep_until_end();
    Ok(())
}

impl SoundPlayer for AudioCue {
    fn play(&self, kind: NotificationKind) -> Result<(), ChannelError> {
        let handle = runtime()?;
        let file = self.files.for_kind(kind).cloned();
        let volume = self.volume;
        let lock = Arc::clone(&self.lock);

        handle.spawn(async move {
            let _guard = lock.lock().await;
            let outcome = task::spawn_blocking(move || match file {
                Some(path) => play_file(&path, volume),
                None => beep(kind),
            })
            .await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(%kind, error = %e, "notification sound failed"),
                Err(e) => tracing::debug!(%kind, error = %e, "sound task failed"),
            }
        });
        Ok(())
    }
}
