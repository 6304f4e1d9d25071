//! Structured control actions and their native API encoding.
//!
//! The UI posts actions as JSON (`{"action": "volume", "level": 30}`); each
//! maps to one or more native requests. Key actions are a press followed by a
//! release, which is how the physical remote talks to the device.

use serde::Deserialize;
use thiserror::Error;

use super::discovery::DeviceEndpoint;
use super::forwarder::{CommandForwarder, DeviceResponse, ForwardError, NativeRequest};
use crate::protocol_constants::{KEY_SENDER, MAX_VOLUME, PRESET_COUNT};

/// Errors from building or performing an action.
#[derive(Debug, Error)]
pub enum ActionError {
    /// Preset outside 1..=6.
    #[error("preset must be between 1 and {max}, got {0}", max = PRESET_COUNT)]
    InvalidPreset(u8),

    /// Source selection without a source name.
    #[error("source must not be empty")]
    EmptySource,

    /// A native request failed.
    #[error(transparent)]
    Forward(#[from] ForwardError),
}

/// Convenient Result alias for action operations.
pub type ActionResult<T> = Result<T, ActionError>;

/// Remote-control keys understood by `/key`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Play,
    Pause,
    PlayPause,
    Stop,
    NextTrack,
    PrevTrack,
    Power,
    Mute,
    Preset(u8),
    ShuffleOn,
    ShuffleOff,
    RepeatOne,
    RepeatAll,
    RepeatOff,
    ThumbsUp,
    ThumbsDown,
}

impl Key {
    /// Key name as the device expects it.
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            Self::Play => "PLAY".into(),
            Self::Pause => "PAUSE".into(),
            Self::PlayPause => "PLAY_PAUSE".into(),
            Self::Stop => "STOP".into(),
            Self::NextTrack => "NEXT_TRACK".into(),
            Self::PrevTrack => "PREV_TRACK".into(),
            Self::Power => "POWER".into(),
            Self::Mute => "MUTE".into(),
            Self::Preset(n) => format!("PRESET_{}", n),
            Self::ShuffleOn => "SHUFFLE_ON".into(),
            Self::ShuffleOff => "SHUFFLE_OFF".into(),
            Self::RepeatOne => "REPEAT_ONE".into(),
            Self::RepeatAll => "REPEAT_ALL".into(),
            Self::RepeatOff => "REPEAT_OFF".into(),
            Self::ThumbsUp => "THUMBS_UP".into(),
            Self::ThumbsDown => "THUMBS_DOWN".into(),
        }
    }
}

/// Builds a `/key` request for one key state.
fn key_request(key: Key, state: &str) -> NativeRequest {
    NativeRequest::post(
        "/key",
        format!(
            r#"<key state="{}" sender="{}">{}</key>"#,
            state,
            KEY_SENDER,
            key.name()
        ),
    )
}

/// Press and release of a key.
#[must_use]
pub fn key_press(key: Key) -> Vec<NativeRequest> {
    vec![key_request(key, "press"), key_request(key, "release")]
}

/// Builds a `/volume` request; levels above 100 are clamped.
#[must_use]
pub fn volume_request(level: u8) -> NativeRequest {
    NativeRequest::post("/volume", format!("<volume>{}</volume>", level.min(MAX_VOLUME)))
}

/// Builds a `/select` request for a source.
#[must_use]
pub fn select_request(source: &str, source_account: Option<&str>) -> NativeRequest {
    let source = html_escape::encode_double_quoted_attribute(source);
    let account = html_escape::encode_double_quoted_attribute(source_account.unwrap_or(""));
    NativeRequest::post(
        "/select",
        format!(
            r#"<ContentItem source="{}" sourceAccount="{}"></ContentItem>"#,
            source, account
        ),
    )
}

/// A control action posted by the UI.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ControlAction {
    Play,
    Pause,
    PlayPause,
    Stop,
    Next,
    Previous,
    Power,
    Mute,
    ShuffleOn,
    ShuffleOff,
    RepeatOne,
    RepeatAll,
    RepeatOff,
    ThumbsUp,
    ThumbsDown,
    Volume {
        level: u8,
    },
    Preset {
        number: u8,
    },
    Source {
        source: String,
        #[serde(default, rename = "sourceAccount", alias = "source_account")]
        source_account: Option<String>,
    },
}

impl ControlAction {
    /// The native requests that carry out this action, in order.
    pub fn requests(&self) -> ActionResult<Vec<NativeRequest>> {
        let key = match self {
            Self::Play => Key::Play,
            Self::Pause => Key::Pause,
            Self::PlayPause => Key::PlayPause,
            Self::Stop => Key::Stop,
            Self::Next => Key::NextTrack,
            Self::Previous => Key::PrevTrack,
            Self::Power => Key::Power,
            Self::Mute => Key::Mute,
            Self::ShuffleOn => Key::ShuffleOn,
            Self::ShuffleOff => Key::ShuffleOff,
            Self::RepeatOne => Key::RepeatOne,
            Self::RepeatAll => Key::RepeatAll,
            Self::RepeatOff => Key::RepeatOff,
            Self::ThumbsUp => Key::ThumbsUp,
            Self::ThumbsDown => Key::ThumbsDown,
            Self::Preset { number } => {
                if !(1..=PRESET_COUNT).contains(number) {
                    return Err(ActionError::InvalidPreset(*number));
                }
                Key::Preset(*number)
            }
            Self::Volume { level } => return Ok(vec![volume_request(*level)]),
            Self::Source {
                source,
                source_account,
            } => {
                if source.trim().is_empty() {
                    return Err(ActionError::EmptySource);
                }
                return Ok(vec![select_request(source, source_account.as_deref())]);
            }
        };
        Ok(key_press(key))
    }
}

/// Performs an action against one device.
///
/// Requests are sent in order and the first failure stops the sequence.
/// Returns the last device response.
pub async fn perform(
    forwarder: &dyn CommandForwarder,
    endpoint: &DeviceEndpoint,
    action: &ControlAction,
) -> ActionResult<DeviceResponse> {
    let requests = action.requests()?;
    log::info!("[Action] {:?} -> {}", action, endpoint.address);

    let (last, leading) = requests.split_last().ok_or(ActionError::EmptySource)?;
    for request in leading {
        forwarder.forward(endpoint, request).await?;
    }
    Ok(forwarder.forward(endpoint, last).await?)
}
