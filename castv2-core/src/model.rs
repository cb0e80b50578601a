//! Domain records carried inside JSON payloads.
//!
//! Receivers omit fields freely and add new ones between firmware
//! releases, so every record is tolerant: missing fields take their
//! defaults and unknown fields are ignored.

use std::collections::HashMap;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Receiver status ──────────────────────────────────────────────

/// Receiver-wide status: volume and running applications.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Status {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<Volume>,
    pub applications: Vec<Application>,
    pub is_active_input: bool,
    pub is_stand_by: bool,
}

impl Status {
    /// The foreground application, if any.
    pub fn running_app(&self) -> Option<&Application> {
        self.applications.first()
    }

    pub fn is_app_running(&self, app_id: &str) -> bool {
        self.running_app().is_some_and(|app| app.app_id == app_id)
    }
}

/// An application running on the receiver.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Application {
    pub app_id: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    pub session_id: String,
    pub status_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport_id: Option<String>,
    pub is_idle_screen: bool,
    pub launched_from_cloud: bool,
    pub namespaces: Vec<AppNamespace>,
}

impl Application {
    /// Destination id for media and custom messages to this app.
    ///
    /// Older firmware omits `transportId`; the session id is used then.
    pub fn transport_id(&self) -> &str {
        self.transport_id.as_deref().unwrap_or(&self.session_id)
    }
}

/// A namespace an application listens on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppNamespace {
    pub name: String,
}

// ── Volume ───────────────────────────────────────────────────────

/// Volume step used when the receiver does not report one.
pub const DEFAULT_VOLUME_INCREMENT: f32 = 0.05;
/// Volume control type used when the receiver does not report one.
pub const DEFAULT_CONTROL_TYPE: &str = "attenuation";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Volume {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<f32>,
    pub muted: bool,
    pub increment: f32,
    pub step_interval: f64,
    pub control_type: String,
}

impl Default for Volume {
    fn default() -> Self {
        Self {
            level: None,
            muted: false,
            increment: DEFAULT_VOLUME_INCREMENT,
            step_interval: f64::from(DEFAULT_VOLUME_INCREMENT),
            control_type: DEFAULT_CONTROL_TYPE.into(),
        }
    }
}

impl Volume {
    /// A volume change to `level` (0.0 ..= 1.0), unmuted.
    pub fn level(level: f32) -> Self {
        Self {
            level: Some(level.clamp(0.0, 1.0)),
            ..Self::default()
        }
    }

    /// A mute toggle that leaves the level untouched.
    pub fn muted(muted: bool) -> Self {
        Self {
            muted,
            ..Self::default()
        }
    }
}

// ── Media ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamType {
    #[serde(alias = "buffered")]
    Buffered,
    #[serde(alias = "live")]
    Live,
    #[serde(alias = "none")]
    None,
}

/// Media descriptor for `LOAD`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Media {
    pub content_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_type: Option<StreamType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_data: Option<Value>,
}

impl Media {
    pub fn new(content_id: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            content_id: content_id.into(),
            content_type: Some(content_type.into()),
            stream_type: Some(StreamType::Buffered),
            ..Self::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.metadata
            .get_or_insert_with(HashMap::new)
            .insert("title".into(), Value::String(title.into()));
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlayerState {
    #[default]
    Idle,
    Buffering,
    Loading,
    Playing,
    Paused,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepeatMode {
    RepeatOff,
    RepeatAll,
    RepeatSingle,
    RepeatAllAndShuffle,
    #[serde(other)]
    Unknown,
}

bitflags! {
    /// Media commands the current session accepts.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SupportedCommands: u32 {
        const PAUSE = 1;
        const SEEK = 2;
        const STREAM_VOLUME = 4;
        const STREAM_MUTE = 8;
        const SKIP_FORWARD = 16;
        const SKIP_BACKWARD = 32;
    }
}

/// A queue item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Item {
    pub item_id: u64,
    pub autoplay: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<Media>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_data: Option<Value>,
}

/// Status of one media session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MediaStatus {
    pub media_session_id: u64,
    pub playback_rate: f32,
    pub player_state: PlayerState,
    pub current_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_item_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_reason: Option<String>,
    pub supported_media_commands: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<Volume>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<Media>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repeat_mode: Option<RepeatMode>,
    pub items: Vec<Item>,
}

impl MediaStatus {
    pub fn supported_commands(&self) -> SupportedCommands {
        SupportedCommands::from_bits_truncate(self.supported_media_commands)
    }
}

// ── Multizone ────────────────────────────────────────────────────

/// A member of a speaker group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Device {
    pub name: String,
    pub capabilities: u32,
    pub device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<Volume>,
}

// ── Application events ───────────────────────────────────────────

/// A message pushed by a receiver application on its own namespace.
/// The payload is left undecoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppEvent {
    pub namespace: String,
    pub message: String,
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_tolerates_missing_fields() {
        let status: Status = serde_json::from_value(json!({
            "applications": [{
                "appId": "CC1AD845",
                "displayName": "Default Media Receiver",
                "sessionId": "abc",
                "transportId": "web-5",
                "somethingNew": true
            }],
            "volume": {"level": 0.5, "muted": false}
        }))
        .unwrap();

        let app = status.running_app().unwrap();
        assert_eq!(app.transport_id(), "web-5");
        assert!(status.is_app_running("CC1AD845"));
        assert!(!status.is_stand_by);
        let volume = status.volume.unwrap();
        assert_eq!(volume.level, Some(0.5));
        assert_eq!(volume.increment, DEFAULT_VOLUME_INCREMENT);
    }

    #[test]
    fn transport_id_falls_back_to_session() {
        let app = Application {
            session_id: "SESSION_ID".into(),
            ..Default::default()
        };
        assert_eq!(app.transport_id(), "SESSION_ID");
    }

    #[test]
    fn mute_volume_omits_level() {
        let v = serde_json::to_value(Volume::muted(true)).unwrap();
        assert!(v.get("level").is_none());
        assert_eq!(v["muted"], json!(true));
        assert_eq!(v["controlType"], json!("attenuation"));
    }

    #[test]
    fn volume_level_is_clamped() {
        assert_eq!(Volume::level(1.7).level, Some(1.0));
        assert_eq!(Volume::level(-0.2).level, Some(0.0));
    }

    #[test]
    fn media_status_unknown_player_state() {
        let ms: MediaStatus = serde_json::from_value(json!({
            "mediaSessionId": 3,
            "playerState": "WARPING",
            "supportedMediaCommands": 15,
            "currentTime": 12.5
        }))
        .unwrap();
        assert_eq!(ms.player_state, PlayerState::Unknown);
        assert!(ms.supported_commands().contains(SupportedCommands::SEEK));
        assert!(!ms.supported_commands().contains(SupportedCommands::SKIP_FORWARD));
    }

    #[test]
    fn stream_type_accepts_lowercase() {
        let media: Media = serde_json::from_value(json!({
            "contentId": "http://example.com/a.mp4",
            "streamType": "live"
        }))
        .unwrap();
        assert_eq!(media.stream_type, Some(StreamType::Live));
    }

    #[test]
    fn media_builder_sets_title() {
        let media = Media::new("http://example.com/a.mp4", "video/mp4").with_title("A");
        let v = serde_json::to_value(&media).unwrap();
        assert_eq!(v["metadata"]["title"], json!("A"));
        assert_eq!(v["streamType"], json!("BUFFERED"));
        assert!(v.get("duration").is_none());
    }
}
