//! Local capture: device seam, error taxonomy and the track guard.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::network::CaptureSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// A live capture track. `stop` releases the device and must be idempotent.
pub trait LocalTrack: Send + Sync {
    fn id(&self) -> &str;
    fn kind(&self) -> TrackKind;
    fn set_enabled(&self, enabled: bool);
    fn is_enabled(&self) -> bool;
    fn stop(&self);
}

#[async_trait]
pub trait MediaDevices: Send + Sync + 'static {
    async fn open_video(&self, settings: &CaptureSettings) -> Result<Arc<dyn LocalTrack>, MediaError>;
    async fn open_audio(&self) -> Result<Arc<dyn LocalTrack>, MediaError>;
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MediaError {
    #[error("camera or microphone access denied")]
    PermissionDenied,
    #[error("no camera or microphone found")]
    DeviceNotFound,
    #[error("camera or microphone is in use by another application")]
    DeviceBusy,
    #[error("media capture cancelled")]
    Cancelled,
    #[error("media capture failed: {0}")]
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    MacOs,
    Windows,
    Linux,
    Ios,
    Android,
    Other,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            Platform::MacOs
        } else if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "ios") {
            Platform::Ios
        } else if cfg!(target_os = "android") {
            Platform::Android
        } else if cfg!(target_os = "linux") {
            Platform::Linux
        } else {
            Platform::Other
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Browser {
    Chrome,
    Safari,
    Firefox,
    Other,
}

impl MediaError {
    /// What the operator can do about it on their platform.
    pub fn remediation(&self, platform: Platform, browser: Browser) -> String {
        match self {
            MediaError::PermissionDenied => {
                let site = match browser {
                    Browser::Chrome => "Click the camera icon in the address bar and choose Always allow.",
                    Browser::Safari => "Open Safari > Settings for This Website and allow Camera and Microphone.",
                    Browser::Firefox => "Click the permissions icon left of the address and clear the blocked camera.",
                    Browser::Other => "Allow camera and microphone access for this site.",
                };
                let system = match platform {
                    Platform::MacOs => "Also check System Settings > Privacy & Security > Camera and Microphone.",
                    Platform::Windows => "Also check Settings > Privacy & security > Camera and Microphone.",
                    Platform::Linux => "Make sure your user can access /dev/video* (video group).",
                    Platform::Ios => "Open Settings, find your browser and enable Camera and Microphone.",
                    Platform::Android => "Open Settings > Apps > your browser > Permissions.",
                    Platform::Other => "Check your system privacy settings.",
                };
                format!("{site} {system}")
            }
            MediaError::DeviceNotFound => match platform {
                Platform::Ios | Platform::Android => {
                    "No camera was detected. Restart the device and try again.".to_string()
                }
                _ => "Connect a camera and microphone, then retry.".to_string(),
            },
            MediaError::DeviceBusy => match platform {
                Platform::Windows => {
                    "Close other apps using the camera (Teams, Zoom, Camera) and retry.".to_string()
                }
                Platform::MacOs => {
                    "Quit other apps using the camera (FaceTime, Zoom, Photo Booth) and retry.".to_string()
                }
                _ => "Close other apps or tabs using the camera and retry.".to_string(),
            },
            MediaError::Cancelled => "Capture was cancelled.".to_string(),
            MediaError::Other(_) => "Reload and try again. If it persists, try another browser.".to_string(),
        }
    }
}

/// Stops the held track on drop unless disarmed.
struct TrackGuard {
    track: Arc<dyn LocalTrack>,
    armed: bool,
}

impl TrackGuard {
    fn new(track: Arc<dyn LocalTrack>) -> Self {
        Self { track, armed: true }
    }

    fn disarm(mut self) -> Arc<dyn LocalTrack> {
        self.armed = false;
        Arc::clone(&self.track)
    }
}

impl Drop for TrackGuard {
    fn drop(&mut self) {
        if self.armed {
            self.track.stop();
        }
    }
}

/// Acquired audio and video. Both tracks are stopped exactly once, on
/// `release` or drop.
pub struct LocalMedia {
    video: Arc<dyn LocalTrack>,
    audio: Arc<dyn LocalTrack>,
    settings: CaptureSettings,
    released: bool,
}

impl LocalMedia {
    pub fn new(video: Arc<dyn LocalTrack>, audio: Arc<dyn LocalTrack>, settings: CaptureSettings) -> Self {
        Self {
            video,
            audio,
            settings,
            released: false,
        }
    }

    pub fn video(&self) -> &Arc<dyn LocalTrack> {
        &self.video
    }

    pub fn audio(&self) -> &Arc<dyn LocalTrack> {
        &self.audio
    }

    pub fn settings(&self) -> CaptureSettings {
        self.settings
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.video.stop();
        self.audio.stop();
        tracing::debug!(video = self.video.id(), audio = self.audio.id(), "Local media released");
    }
}

impl Drop for LocalMedia {
    fn drop(&mut self) {
        self.release();
    }
}

pub struct MediaAcquirer {
    devices: Arc<dyn MediaDevices>,
}

impl MediaAcquirer {
    pub fn new(devices: Arc<dyn MediaDevices>) -> Self {
        Self { devices }
    }

    /// Opens video then audio. Anything opened is stopped again if a later
    /// step fails or `cancel` fires.
    pub async fn acquire(
        &self,
        settings: CaptureSettings,
        cancel: &CancellationToken,
    ) -> Result<LocalMedia, MediaError> {
        let video = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(MediaError::Cancelled),
            video = self.devices.open_video(&settings) => TrackGuard::new(video?),
        };
        let audio = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(MediaError::Cancelled),
            audio = self.devices.open_audio() => audio?,
        };

        tracing::info!(
            resolution = %settings.resolution(),
            frame_rate = settings.frame_rate,
            bitrate = settings.bitrate,
            "Local media acquired"
        );
        Ok(LocalMedia::new(video.disarm(), audio, settings))
    }
}
