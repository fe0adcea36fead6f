//! Remote input
//!
//! Keyboard and mouse events captured by the client, their 10-byte binary
//! frame encoding for the peer side channel and the JSON command form used
//! by the socket fallback.

pub mod codec;
pub mod command;
pub mod geometry;
pub mod keymap;
pub mod types;

pub use codec::{InputFrame, FRAME_LEN};
pub use command::{HostMessage, InputCommand, InputMessage, VideoSize};
pub use geometry::{ContentBox, Rect};
pub use keymap::code_to_vk;
pub use types::{ButtonAction, InputEvent, KeyAction, MouseButton};
