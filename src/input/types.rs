//! Input event types for keyboard and mouse

use serde::{Deserialize, Serialize};

/// Keyboard action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyAction {
    /// Key pressed down
    Down,
    /// Key released
    Up,
}

/// Mouse button action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ButtonAction {
    Down,
    Up,
    /// Press and release in one event
    Click,
}

/// Mouse button
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

impl MouseButton {
    /// Map a native (DOM-style) button index: 0 = left, 1 = middle, 2 = right
    ///
    /// Any other index falls back to left.
    pub fn from_native(index: i16) -> Self {
        match index {
            1 => MouseButton::Middle,
            2 => MouseButton::Right,
            _ => MouseButton::Left,
        }
    }

    /// Wire code: 1 = left, 2 = right, 3 = middle
    pub fn wire_code(&self) -> u8 {
        match self {
            MouseButton::Left => 1,
            MouseButton::Right => 2,
            MouseButton::Middle => 3,
        }
    }

    pub fn from_wire_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(MouseButton::Left),
            2 => Some(MouseButton::Right),
            3 => Some(MouseButton::Middle),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MouseButton::Left => "left",
            MouseButton::Right => "right",
            MouseButton::Middle => "middle",
        }
    }
}

/// One discrete input event
///
/// Mouse coordinates are normalized to `[0, 1]` over the rendered video
/// content box (see `geometry::ContentBox`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputEvent {
    Key {
        action: KeyAction,
        /// Virtual key code
        vk: u16,
    },
    MouseMove {
        x: f64,
        y: f64,
    },
    MouseButton {
        action: ButtonAction,
        button: MouseButton,
        x: f64,
        y: f64,
    },
    Wheel {
        /// Vertical scroll delta
        delta_y: f64,
    },
}

impl InputEvent {
    pub fn key_down(vk: u16) -> Self {
        Self::Key {
            action: KeyAction::Down,
            vk,
        }
    }

    pub fn key_up(vk: u16) -> Self {
        Self::Key {
            action: KeyAction::Up,
            vk,
        }
    }

    pub fn mouse_move(x: f64, y: f64) -> Self {
        Self::MouseMove { x, y }
    }

    pub fn mouse_down(button: MouseButton, x: f64, y: f64) -> Self {
        Self::MouseButton {
            action: ButtonAction::Down,
            button,
            x,
            y,
        }
    }

    pub fn mouse_up(button: MouseButton, x: f64, y: f64) -> Self {
        Self::MouseButton {
            action: ButtonAction::Up,
            button,
            x,
            y,
        }
    }

    pub fn click(button: MouseButton, x: f64, y: f64) -> Self {
        Self::MouseButton {
            action: ButtonAction::Click,
            button,
            x,
            y,
        }
    }

    pub fn wheel(delta_y: f64) -> Self {
        Self::Wheel { delta_y }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_button_mapping() {
        assert_eq!(MouseButton::from_native(0).wire_code(), 1);
        assert_eq!(MouseButton::from_native(2).wire_code(), 2);
        assert_eq!(MouseButton::from_native(1).wire_code(), 3);
        // Back/forward buttons fall back to left
        assert_eq!(MouseButton::from_native(3), MouseButton::Left);
    }

    #[test]
    fn test_wire_code_roundtrip() {
        for button in [MouseButton::Left, MouseButton::Right, MouseButton::Middle] {
            assert_eq!(MouseButton::from_wire_code(button.wire_code()), Some(button));
        }
        assert_eq!(MouseButton::from_wire_code(0), None);
    }
}
