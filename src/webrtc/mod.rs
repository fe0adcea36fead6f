//! WebRTC peer transport
//!
//! ```text
//! Client                          Session backend                Host
//!   | create_offer()                     |                          |
//!   |------ start(offer) --------------->|------ offer ------------>|
//!   |<----- poll get() ... ACTIVE -------|<----- answer ------------|
//!   | apply_answer()                                                |
//!   |<=============== media (recvonly) =============================|
//!   |================ "input" data channel ========================>|
//! ```

pub mod config;
pub mod peer;
pub mod signaling;

pub use config::{TurnServer, WebRtcConfig};
pub use peer::{
    MediaKind, PeerTransport, PeerTransportFactory, TransportCallbacks, WebRtcPeerTransport,
    WebRtcTransportFactory,
};
pub use signaling::ConnectionState;
