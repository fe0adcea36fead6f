//! Session records, signaling and state
//!
//! - `model`: the session record exchanged with the backend
//! - `signaling`: create/start/end/get calls against the backend
//! - `poll`: waiting for the host's answer
//! - `store`: single-writer view of the active session

pub mod model;
pub mod poll;
pub mod signaling;
pub mod store;

pub use model::{
    CreateSessionRequest, EndSessionRequest, HostDescriptor, Session, SessionStatus,
    StartSessionRequest,
};
pub use poll::{poll_until_active, PollOptions};
pub use signaling::{HttpSignalingClient, SignalingClient};
pub use store::{SessionSnapshot, SessionStateStore};
