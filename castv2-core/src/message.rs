//! JSON message schema.
//!
//! Outbound payloads name their variant in `"type"`; inbound payloads
//! use `"responseType"` for the same concept. Both sides share the
//! `PING` / `PONG` vocabulary. Anything outside the well-known set is
//! carried as raw JSON.

use std::borrow::Cow;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CastError;
use crate::model::{Device, Media, MediaStatus, Status, Volume};

/// Identifier echoed by a reply to its request. Zero is reserved.
pub type RequestId = u64;

const REQUEST_ID_KEY: &str = "requestId";
const OUTBOUND_TAG: &str = "\"type\"";
const INBOUND_TAG: &str = "\"responseType\"";

// ── Requests ─────────────────────────────────────────────────────

/// Empty `origin` object sent with `CONNECT`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum RequestBody {
    Ping,
    Pong,
    Connect {
        #[serde(default)]
        origin: Origin,
    },
    GetStatus,
    GetAppAvailability {
        app_id: Vec<String>,
    },
    Launch {
        app_id: String,
    },
    Stop {
        session_id: String,
    },
    Load {
        session_id: String,
        media: Media,
        autoplay: bool,
        current_time: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        custom_data: Option<Value>,
    },
    Play {
        session_id: String,
        media_session_id: u64,
    },
    Pause {
        session_id: String,
        media_session_id: u64,
    },
    Seek {
        session_id: String,
        media_session_id: u64,
        current_time: f64,
    },
    SetVolume {
        volume: Volume,
    },
}

impl RequestBody {
    pub fn connect() -> Self {
        Self::Connect {
            origin: Origin::default(),
        }
    }

    /// `PING`, `PONG` and `CONNECT` are notifications: they never carry
    /// a request id and nothing answers them by id.
    pub fn is_notification(&self) -> bool {
        matches!(self, Self::Ping | Self::Pong | Self::Connect { .. })
    }
}

/// An outbound message: a well-known request or an application payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Standard(RequestBody),
    Custom(Value),
}

impl From<RequestBody> for Request {
    fn from(body: RequestBody) -> Self {
        Self::Standard(body)
    }
}

impl Request {
    /// Whether a send of this request should be stamped with an id.
    ///
    /// Standard requests other than notifications always are; custom
    /// payloads only when the caller waits for a reply.
    pub fn wants_request_id(&self, expect_reply: bool) -> bool {
        match self {
            Self::Standard(body) => !body.is_notification(),
            Self::Custom(_) => expect_reply,
        }
    }

    /// Serialize to the JSON text carried in the envelope, stamping
    /// `requestId` when one is given.
    pub fn to_payload(&self, request_id: Option<RequestId>) -> Result<String, CastError> {
        let mut value = match self {
            Self::Standard(body) => serde_json::to_value(body)?,
            Self::Custom(value) => value.clone(),
        };
        if let (Some(id), Value::Object(map)) = (request_id, &mut value) {
            map.insert(REQUEST_ID_KEY.into(), Value::from(id));
        }
        Ok(serde_json::to_string(&value)?)
    }
}

// ── Responses ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "responseType",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ResponseBody {
    Ping,
    Pong,
    ReceiverStatus {
        #[serde(default)]
        status: Status,
    },
    GetAppAvailability {
        #[serde(default)]
        availability: HashMap<String, String>,
    },
    InvalidRequest {
        #[serde(default)]
        reason: String,
    },
    MediaStatus {
        #[serde(default)]
        status: Vec<MediaStatus>,
    },
    Close,
    LoadFailed,
    LaunchError {
        #[serde(default)]
        reason: String,
    },
    DeviceAdded {
        #[serde(default)]
        device: Device,
    },
    DeviceUpdated {
        #[serde(default)]
        device: Device,
    },
    DeviceRemoved {
        #[serde(default)]
        device_id: String,
    },
}

impl ResponseBody {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ping => "PING",
            Self::Pong => "PONG",
            Self::ReceiverStatus { .. } => "RECEIVER_STATUS",
            Self::GetAppAvailability { .. } => "GET_APP_AVAILABILITY",
            Self::InvalidRequest { .. } => "INVALID_REQUEST",
            Self::MediaStatus { .. } => "MEDIA_STATUS",
            Self::Close => "CLOSE",
            Self::LoadFailed => "LOAD_FAILED",
            Self::LaunchError { .. } => "LAUNCH_ERROR",
            Self::DeviceAdded { .. } => "DEVICE_ADDED",
            Self::DeviceUpdated { .. } => "DEVICE_UPDATED",
            Self::DeviceRemoved { .. } => "DEVICE_REMOVED",
        }
    }
}

/// A decoded inbound payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Standard {
        request_id: Option<RequestId>,
        body: ResponseBody,
    },
    /// Unrecognized discriminator or application payload.
    Custom(Value),
}

impl Response {
    /// Classify an already renamed JSON structure.
    pub fn from_value(value: Value) -> Self {
        let request_id = value.get(REQUEST_ID_KEY).and_then(Value::as_u64);
        match ResponseBody::deserialize(&value) {
            Ok(body) => Self::Standard { request_id, body },
            Err(_) => Self::Custom(value),
        }
    }

    /// Parse a payload as sent by the peer (outbound tag name).
    pub fn parse(payload: &str) -> Result<Self, CastError> {
        let value: Value = serde_json::from_str(&rename_discriminator(payload))?;
        Ok(Self::from_value(value))
    }

    /// The correlation id, if any. `0` never correlates and reads as none.
    pub fn request_id(&self) -> Option<RequestId> {
        let id = match self {
            Self::Standard { request_id, .. } => *request_id,
            Self::Custom(value) => value.get(REQUEST_ID_KEY).and_then(Value::as_u64),
        };
        id.filter(|id| *id != 0)
    }

    pub fn body(&self) -> Option<&ResponseBody> {
        match self {
            Self::Standard { body, .. } => Some(body),
            Self::Custom(_) => None,
        }
    }

    /// Turn the three failure replies into typed errors.
    pub fn into_result(self) -> Result<Self, CastError> {
        match self {
            Self::Standard {
                body: ResponseBody::InvalidRequest { reason },
                ..
            } => Err(CastError::InvalidRequest { reason }),
            Self::Standard {
                body: ResponseBody::LoadFailed,
                ..
            } => Err(CastError::LoadFailed),
            Self::Standard {
                body: ResponseBody::LaunchError { reason },
                ..
            } => Err(CastError::LaunchError { reason }),
            other => Ok(other),
        }
    }

    /// Discriminator name for logs and error messages.
    pub fn describe(&self) -> &str {
        match self {
            Self::Standard { body, .. } => body.name(),
            Self::Custom(value) => value
                .get("responseType")
                .and_then(Value::as_str)
                .unwrap_or("custom"),
        }
    }
}

/// Rename the first `"type"` key to `"responseType"`.
///
/// Payloads without the outbound key are returned untouched.
pub fn rename_discriminator(payload: &str) -> Cow<'_, str> {
    match payload.find(OUTBOUND_TAG) {
        Some(at) => {
            let mut renamed = String::with_capacity(payload.len() + INBOUND_TAG.len());
            renamed.push_str(&payload[..at]);
            renamed.push_str(INBOUND_TAG);
            renamed.push_str(&payload[at + OUTBOUND_TAG.len()..]);
            Cow::Owned(renamed)
        }
        None => Cow::Borrowed(payload),
    }
}

// ── Tests ────────────────────────────────────────────────────────
