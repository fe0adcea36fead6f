//! Imperium session client
//!
//! Client side of a remote-desktop session: the lifecycle orchestrator,
//! HTTP signaling with answer polling, the receive-only WebRTC transport
//! and the input side channel with its 10-byte wire format.

pub mod channel;
pub mod config;
pub mod error;
pub mod events;
pub mod input;
pub mod orchestrator;
pub mod session;
pub mod utils;
pub mod webrtc;

#[cfg(test)]
mod mock;

pub use error::{AppError, Result};
