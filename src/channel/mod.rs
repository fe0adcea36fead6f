//! Input side channel
//!
//! Input events reach the host over one of two backends, selected by
//! configuration:
//!
//! - `PeerSideChannel`: the `"input"` data channel on the peer connection,
//!   carrying 10-byte binary frames
//! - `SocketSideChannel`: a WebSocket to the host carrying JSON commands,
//!   with its own reconnection loop
//!
//! Both share the `ReconnectSupervisor` backoff logic.

pub mod peer;
pub mod reconnect;
pub mod socket;

use async_trait::async_trait;

pub use crate::config::SideChannelBackend;
use crate::error::Result;
use crate::input::InputEvent;

pub use peer::PeerSideChannel;
pub use reconnect::{ReconnectDecision, ReconnectPolicy, ReconnectSupervisor};
pub use socket::SocketSideChannel;

/// A channel that carries input events to the host
#[async_trait]
pub trait SideChannel: Send + Sync {
    fn backend(&self) -> SideChannelBackend;

    /// Channel is open and accepting input
    fn is_ready(&self) -> bool;

    /// Send one event
    ///
    /// Events sent while the channel is not ready are dropped without error
    /// and are never replayed.
    async fn send(&self, event: &InputEvent) -> Result<()>;

    /// Close the channel; safe to call repeatedly
    async fn close(&self);
}
