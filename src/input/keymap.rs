//! Keyboard code mapping
//!
//! Maps DOM `KeyboardEvent.code` names (`"KeyA"`, `"Enter"`, `"ArrowUp"`) to the
//! virtual-key codes carried in input frames, and virtual-key codes to the
//! lowercase key names used by the JSON command fallback.

/// Virtual-key codes understood by the host
pub mod vk {
    pub const BACKSPACE: u16 = 0x08;
    pub const TAB: u16 = 0x09;
    pub const ENTER: u16 = 0x0D;
    pub const SHIFT: u16 = 0x10;
    pub const CONTROL: u16 = 0x11;
    pub const ALT: u16 = 0x12;
    pub const CAPS_LOCK: u16 = 0x14;
    pub const ESCAPE: u16 = 0x1B;
    pub const SPACE: u16 = 0x20;
    pub const LEFT: u16 = 0x25;
    pub const UP: u16 = 0x26;
    pub const RIGHT: u16 = 0x27;
    pub const DOWN: u16 = 0x28;
    pub const DELETE: u16 = 0x2E;

    // Digits 0-9 (0x30 - 0x39)
    pub const DIGIT_0: u16 = 0x30;
    pub const DIGIT_9: u16 = 0x39;

    // Punctuation, as assigned by the host's key table
    pub const SEMICOLON: u16 = 0x3A;
    pub const EQUALS: u16 = 0x3B;
    pub const COMMA: u16 = 0x3C;
    pub const MINUS: u16 = 0x3D;
    pub const PERIOD: u16 = 0x3E;
    pub const SLASH: u16 = 0x3F;

    // Letters A-Z (0x41 - 0x5A)
    pub const KEY_A: u16 = 0x41;
    pub const KEY_Z: u16 = 0x5A;

    pub const OPEN_BRACKET: u16 = 0x5B;
    pub const BACKSLASH: u16 = 0x5C;
    pub const CLOSE_BRACKET: u16 = 0x5D;
    pub const CARET: u16 = 0x5E;
    pub const UNDERSCORE: u16 = 0x5F;
    pub const BACKQUOTE: u16 = 0x60;
}

/// Convert a DOM key code name to a virtual-key code
///
/// Unknown names map to `0`.
pub fn code_to_vk(code: &str) -> u16 {
    if let Some(letter) = code.strip_prefix("Key") {
        if let [c @ b'A'..=b'Z'] = letter.as_bytes() {
            return vk::KEY_A + (c - b'A') as u16;
        }
    }
    if let Some(digit) = code.strip_prefix("Digit") {
        if let [c @ b'0'..=b'9'] = digit.as_bytes() {
            return vk::DIGIT_0 + (c - b'0') as u16;
        }
    }

    match code {
        "Escape" => vk::ESCAPE,
        "Enter" | "NumpadEnter" => vk::ENTER,
        "Space" => vk::SPACE,
        "Backspace" => vk::BACKSPACE,
        "Tab" => vk::TAB,
        "Delete" => vk::DELETE,
        "CapsLock" => vk::CAPS_LOCK,
        "ShiftLeft" | "ShiftRight" => vk::SHIFT,
        "ControlLeft" | "ControlRight" => vk::CONTROL,
        "AltLeft" | "AltRight" => vk::ALT,
        "ArrowLeft" => vk::LEFT,
        "ArrowUp" => vk::UP,
        "ArrowRight" => vk::RIGHT,
        "ArrowDown" => vk::DOWN,
        "Semicolon" => vk::SEMICOLON,
        "Equal" => vk::EQUALS,
        "Comma" => vk::COMMA,
        "Minus" => vk::MINUS,
        "Period" => vk::PERIOD,
        "Slash" => vk::SLASH,
        "Backquote" => vk::BACKQUOTE,
        "BracketLeft" => vk::OPEN_BRACKET,
        "Backslash" => vk::BACKSLASH,
        "BracketRight" => vk::CLOSE_BRACKET,
        _ => 0,
    }
}

/// Convert a virtual-key code to the key name used in JSON commands
pub fn vk_to_name(code: u16) -> Option<String> {
    if (vk::KEY_A..=vk::KEY_Z).contains(&code) {
        let c = (b'a' + (code - vk::KEY_A) as u8) as char;
        return Some(c.to_string());
    }
    if (vk::DIGIT_0..=vk::DIGIT_9).contains(&code) {
        let c = (b'0' + (code - vk::DIGIT_0) as u8) as char;
        return Some(c.to_string());
    }

    let name = match code {
        vk::ESCAPE => "escape",
        vk::ENTER => "enter",
        vk::SPACE => "space",
        vk::BACKSPACE => "backspace",
        vk::TAB => "tab",
        vk::DELETE => "delete",
        vk::CAPS_LOCK => "capslock",
        vk::SHIFT => "shift",
        vk::CONTROL => "ctrl",
        vk::ALT => "alt",
        vk::LEFT => "left",
        vk::UP => "up",
        vk::RIGHT => "right",
        vk::DOWN => "down",
        vk::SEMICOLON => ";",
        vk::EQUALS => "=",
        vk::COMMA => ",",
        vk::MINUS => "-",
        vk::PERIOD => ".",
        vk::SLASH => "/",
        vk::BACKQUOTE => "`",
        vk::OPEN_BRACKET => "[",
        vk::BACKSLASH => "\\",
        vk::CLOSE_BRACKET => "]",
        vk::CARET => "^",
        vk::UNDERSCORE => "_",
        _ => return None,
    };
    Some(name.to_string())
}

/// Check if a virtual-key code is a modifier
pub fn is_modifier(code: u16) -> bool {
    matches!(code, vk::SHIFT | vk::CONTROL | vk::ALT)
}
