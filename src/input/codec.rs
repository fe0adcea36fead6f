//! Binary input frame encoding
//!
//! Every input event is a fixed 10-byte frame, multi-byte fields little-endian:
//!
//! | Offset | Size | Field    |
//! |--------|------|----------|
//! | 0      | 1    | type: 0 = key, 1 = move, 2 = mouse button, 3 = wheel |
//! | 1      | 1    | action: key 0 = down, 1 = up; move 2; button 0 = down, 1 = up, 3 = click; wheel 0 |
//! | 2      | 1    | button: 1 = left, 2 = right, 3 = middle; 0 otherwise |
//! | 3      | 1    | reserved, always 0 |
//! | 4      | 2    | virtual key code (u16), 0 for mouse events |
//! | 6      | 2    | x as a u16 fraction of the content width |
//! | 8      | 2    | y as a u16 fraction of the content height; wheel: i16 delta |

use tracing::warn;

use super::types::{ButtonAction, InputEvent, KeyAction, MouseButton};

/// Frame length in bytes
pub const FRAME_LEN: usize = 10;

/// Frame types
pub const TYPE_KEY: u8 = 0;
pub const TYPE_MOVE: u8 = 1;
pub const TYPE_MOUSE_BUTTON: u8 = 2;
pub const TYPE_WHEEL: u8 = 3;

/// Actions
pub const ACTION_DOWN: u8 = 0;
pub const ACTION_UP: u8 = 1;
pub const ACTION_MOVE: u8 = 2;
pub const ACTION_CLICK: u8 = 3;

/// Button code for events without a button
pub const BUTTON_NONE: u8 = 0;

/// Scale a normalized coordinate to u16: `round(clamp(v, 0, 1) * 65535)`
pub fn normalize_to_u16(value: f64) -> u16 {
    if value.is_nan() {
        return 0;
    }
    (value.clamp(0.0, 1.0) * 65535.0).round() as u16
}

/// Clamp a wheel delta to the i16 range; out-of-range values saturate
pub fn clamp_wheel_delta(delta: f64) -> i16 {
    if delta.is_nan() {
        return 0;
    }
    delta.clamp(i16::MIN as f64, i16::MAX as f64) as i16
}

/// One encoded input frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputFrame([u8; FRAME_LEN]);

impl InputFrame {
    /// Build a frame from raw field values
    pub fn from_fields(kind: u8, action: u8, button: u8, vk: u16, x: u16, y: u16) -> Self {
        let mut buf = [0u8; FRAME_LEN];
        buf[0] = kind;
        buf[1] = action;
        buf[2] = button;
        buf[3] = 0;
        buf[4..6].copy_from_slice(&vk.to_le_bytes());
        buf[6..8].copy_from_slice(&x.to_le_bytes());
        buf[8..10].copy_from_slice(&y.to_le_bytes());
        Self(buf)
    }

    /// Encode an input event
    pub fn encode(event: &InputEvent) -> Self {
        match *event {
            InputEvent::Key { action, vk } => {
                let action = match action {
                    KeyAction::Down => ACTION_DOWN,
                    KeyAction::Up => ACTION_UP,
                };
                Self::from_fields(TYPE_KEY, action, BUTTON_NONE, vk, 0, 0)
            }
            InputEvent::MouseMove { x, y } => Self::from_fields(
                TYPE_MOVE,
                ACTION_MOVE,
                BUTTON_NONE,
                0,
                normalize_to_u16(x),
                normalize_to_u16(y),
            ),
            InputEvent::MouseButton {
                action,
                button,
                x,
                y,
            } => {
                let action = match action {
                    ButtonAction::Down => ACTION_DOWN,
                    ButtonAction::Up => ACTION_UP,
                    ButtonAction::Click => ACTION_CLICK,
                };
                Self::from_fields(
                    TYPE_MOUSE_BUTTON,
                    action,
                    button.wire_code(),
                    0,
                    normalize_to_u16(x),
                    normalize_to_u16(y),
                )
            }
            InputEvent::Wheel { delta_y } => {
                let delta = clamp_wheel_delta(delta_y);
                Self::from_fields(
                    TYPE_WHEEL,
                    0,
                    BUTTON_NONE,
                    0,
                    0,
                    u16::from_le_bytes(delta.to_le_bytes()),
                )
            }
        }
    }

    /// Decode a frame back into an event
    ///
    /// Returns `None` for short frames and unknown types or actions.
    pub fn decode(data: &[u8]) -> Option<InputEvent> {
        if data.len() < FRAME_LEN {
            warn!("Input frame too short: {} bytes", data.len());
            return None;
        }

        let kind = data[0];
        let action = data[1];
        let button = data[2];
        let vk = u16::from_le_bytes([data[4], data[5]]);
        let x = u16::from_le_bytes([data[6], data[7]]) as f64 / 65535.0;
        let y = u16::from_le_bytes([data[8], data[9]]) as f64 / 65535.0;

        match kind {
            TYPE_KEY => {
                let action = match action {
                    ACTION_DOWN => KeyAction::Down,
                    ACTION_UP => KeyAction::Up,
                    _ => return None,
                };
                Some(InputEvent::Key { action, vk })
            }
            TYPE_MOVE => Some(InputEvent::MouseMove { x, y }),
            TYPE_MOUSE_BUTTON => {
                let action = match action {
                    ACTION_DOWN => ButtonAction::Down,
                    ACTION_UP => ButtonAction::Up,
                    ACTION_CLICK => ButtonAction::Click,
                    _ => return None,
                };
                let button = MouseButton::from_wire_code(button)?;
                Some(InputEvent::MouseButton {
                    action,
                    button,
                    x,
                    y,
                })
            }
            TYPE_WHEEL => {
                let delta = i16::from_le_bytes([data[8], data[9]]);
                Some(InputEvent::Wheel {
                    delta_y: delta as f64,
                })
            }
            _ => {
                warn!("Unknown input frame type: 0x{:02X}", kind);
                None
            }
        }
    }

    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl From<&InputEvent> for InputFrame {
    fn from(event: &InputEvent) -> Self {
        Self::encode(event)
    }
}

impl AsRef<[u8]> for InputFrame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
