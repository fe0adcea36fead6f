//! JSON input commands for the socket side channel
//!
//! The socket backend carries input as text messages:
//!
//! ```json
//! {"sessionId": "S1", "command": {"type": "mouse", "action": "move", "x": 640, "y": 360}}
//! ```
//!
//! Mouse coordinates are pixels in the native video resolution. The host
//! may send `{"type": "status", "message": "..."}` back.

use serde::{Deserialize, Serialize};

use super::keymap::vk_to_name;
use super::types::{ButtonAction, InputEvent, KeyAction};

/// Command kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandType {
    Keyboard,
    Mouse,
}

/// Command action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandAction {
    Press,
    Release,
    Move,
    Click,
    Scroll,
}

/// One input command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputCommand {
    #[serde(rename = "type")]
    pub kind: CommandType,
    pub action: CommandAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button: Option<String>,
}

/// Envelope sent over the socket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputMessage {
    pub session_id: String,
    pub command: InputCommand,
}

impl InputMessage {
    pub fn new(session_id: impl Into<String>, command: InputCommand) -> Self {
        Self {
            session_id: session_id.into(),
            command,
        }
    }
}

/// Native video resolution used to turn normalized coordinates into pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoSize {
    pub width: u32,
    pub height: u32,
}

impl VideoSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    fn to_pixels(self, x: f64, y: f64) -> (i32, i32) {
        (scale(x, self.width), scale(y, self.height))
    }
}

impl Default for VideoSize {
    fn default() -> Self {
        Self::new(1920, 1080)
    }
}

fn scale(value: f64, extent: u32) -> i32 {
    if extent == 0 || value.is_nan() {
        return 0;
    }
    (value.clamp(0.0, 1.0) * (extent - 1) as f64).round() as i32
}

impl InputCommand {
    /// Translate an input event into a JSON command
    ///
    /// Returns `None` for keys without a name on the host side.
    pub fn from_event(event: &InputEvent, video: VideoSize) -> Option<Self> {
        let command = match *event {
            InputEvent::Key { action, vk } => Self {
                kind: CommandType::Keyboard,
                action: match action {
                    KeyAction::Down => CommandAction::Press,
                    KeyAction::Up => CommandAction::Release,
                },
                key: Some(vk_to_name(vk)?),
                x: None,
                y: None,
                button: None,
            },
            InputEvent::MouseMove { x, y } => {
                let (x, y) = video.to_pixels(x, y);
                Self {
                    kind: CommandType::Mouse,
                    action: CommandAction::Move,
                    key: None,
                    x: Some(x),
                    y: Some(y),
                    button: None,
                }
            }
            InputEvent::MouseButton {
                action,
                button,
                x,
                y,
            } => {
                let (x, y) = video.to_pixels(x, y);
                Self {
                    kind: CommandType::Mouse,
                    action: match action {
                        ButtonAction::Down => CommandAction::Press,
                        ButtonAction::Up => CommandAction::Release,
                        ButtonAction::Click => CommandAction::Click,
                    },
                    key: None,
                    x: Some(x),
                    y: Some(y),
                    button: Some(button.as_str().to_string()),
                }
            }
            InputEvent::Wheel { delta_y } => Self {
                kind: CommandType::Mouse,
                action: CommandAction::Scroll,
                key: None,
                x: None,
                y: Some(super::codec::clamp_wheel_delta(delta_y) as i32),
                button: None,
            },
        };
        Some(command)
    }
}

/// Message received from the host over the socket
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HostMessage {
    Status { message: String },
}

impl HostMessage {
    /// Parse a text frame; unknown or malformed messages yield `None`
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}
