//! Peer transport
//!
//! Owns the client side of the peer connection: receive-only media, the
//! host-created `"input"` data channel and offer/answer negotiation.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice::mdns::MulticastDnsMode;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_remote::TrackRemote;

use super::config::WebRtcConfig;
use super::signaling::ConnectionState;
use crate::channel::{PeerSideChannel, SideChannel};
use crate::error::{AppError, Result};

/// How long to wait for ICE gathering before sending the offer as-is
const GATHERING_TIMEOUT: Duration = Duration::from_secs(5);

/// Inbound media kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        }
    }
}

type StateCallback = Box<dyn Fn(ConnectionState) + Send + Sync>;
type MediaCallback = Box<dyn Fn(MediaKind) + Send + Sync>;
type ChannelReadyCallback = Box<dyn Fn(Arc<dyn SideChannel>) + Send + Sync>;
type ChannelLostCallback = Box<dyn Fn() + Send + Sync>;

/// Named callback slots a transport reports through
///
/// Each slot fires at most once per transition: state changes are
/// deduplicated, media fires once per kind, and the side channel slots
/// fire on open and close of the input channel only.
#[derive(Default)]
pub struct TransportCallbacks {
    pub on_connection_state_changed: Option<StateCallback>,
    pub on_media_ready: Option<MediaCallback>,
    pub on_side_channel_ready: Option<ChannelReadyCallback>,
    pub on_side_channel_lost: Option<ChannelLostCallback>,
}

impl TransportCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_connection_state_changed(
        mut self,
        f: impl Fn(ConnectionState) + Send + Sync + 'static,
    ) -> Self {
        self.on_connection_state_changed = Some(Box::new(f));
        self
    }

    pub fn on_media_ready(mut self, f: impl Fn(MediaKind) + Send + Sync + 'static) -> Self {
        self.on_media_ready = Some(Box::new(f));
        self
    }

    pub fn on_side_channel_ready(
        mut self,
        f: impl Fn(Arc<dyn SideChannel>) + Send + Sync + 'static,
    ) -> Self {
        self.on_side_channel_ready = Some(Box::new(f));
        self
    }

    pub fn on_side_channel_lost(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_side_channel_lost = Some(Box::new(f));
        self
    }

    pub(crate) fn connection_state_changed(&self, state: ConnectionState) {
        if let Some(ref f) = self.on_connection_state_changed {
            f(state);
        }
    }

    pub(crate) fn media_ready(&self, kind: MediaKind) {
        if let Some(ref f) = self.on_media_ready {
            f(kind);
        }
    }

    pub(crate) fn side_channel_ready(&self, channel: Arc<dyn SideChannel>) {
        if let Some(ref f) = self.on_side_channel_ready {
            f(channel);
        }
    }

    pub(crate) fn side_channel_lost(&self) {
        if let Some(ref f) = self.on_side_channel_lost {
            f();
        }
    }
}

/// Client side of a peer connection
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Allocate the underlying connection; no-op when already allocated
    async fn allocate(&self) -> Result<()>;

    /// Allocate, declare receive-only media, open the bootstrap channel and
    /// return the local offer
    async fn create_offer(&self) -> Result<String>;

    /// Apply the remote answer
    ///
    /// Fails with `NoActiveTransport` before `allocate` and with
    /// `MissingAnswer` for an absent or empty payload.
    async fn apply_answer(&self, answer: Option<&str>) -> Result<()>;

    fn state(&self) -> ConnectionState;

    /// Release all resources; safe to call repeatedly
    async fn close(&self);
}

/// Creates one transport per connection attempt
pub trait PeerTransportFactory: Send + Sync {
    fn create(&self, session_id: &str, callbacks: TransportCallbacks) -> Arc<dyn PeerTransport>;
}

/// Factory for `WebRtcPeerTransport`
pub struct WebRtcTransportFactory {
    config: WebRtcConfig,
}

impl WebRtcTransportFactory {
    pub fn new(config: WebRtcConfig) -> Self {
        Self { config }
    }
}

impl PeerTransportFactory for WebRtcTransportFactory {
    fn create(&self, session_id: &str, callbacks: TransportCallbacks) -> Arc<dyn PeerTransport> {
        Arc::new(WebRtcPeerTransport::new(
            self.config.clone(),
            session_id.to_string(),
            callbacks,
        ))
    }
}

/// State shared with the webrtc-rs event handlers
struct Shared {
    session_id: String,
    callbacks: TransportCallbacks,
    state: watch::Sender<ConnectionState>,
    input_channel: Mutex<Option<Arc<PeerSideChannel>>>,
    video_ready: AtomicBool,
    audio_ready: AtomicBool,
    closed: AtomicBool,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
        if changed && !self.closed.load(Ordering::SeqCst) {
            info!("Peer {} connection state: {}", self.session_id, state);
            self.callbacks.connection_state_changed(state);
        }
    }

    fn track_arrived(&self, kind: RTPCodecType) {
        let (flag, kind) = match kind {
            RTPCodecType::Video => (&self.video_ready, MediaKind::Video),
            RTPCodecType::Audio => (&self.audio_ready, MediaKind::Audio),
            _ => return,
        };
        if !flag.swap(true, Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst) {
            info!("Peer {} {} track ready", self.session_id, kind.as_str());
            self.callbacks.media_ready(kind);
        }
    }
}

/// webrtc-rs backed transport
pub struct WebRtcPeerTransport {
    config: WebRtcConfig,
    pc: tokio::sync::Mutex<Option<Arc<RTCPeerConnection>>>,
    shared: Arc<Shared>,
}

impl WebRtcPeerTransport {
    pub fn new(config: WebRtcConfig, session_id: String, callbacks: TransportCallbacks) -> Self {
        let (state, _) = watch::channel(ConnectionState::New);
        Self {
            config,
            pc: tokio::sync::Mutex::new(None),
            shared: Arc::new(Shared {
                session_id,
                callbacks,
                state,
                input_channel: Mutex::new(None),
                video_ready: AtomicBool::new(false),
                audio_ready: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    async fn build_peer_connection(&self) -> Result<Arc<RTCPeerConnection>> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| AppError::WebRtc(format!("Failed to register codecs: {}", e)))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| AppError::WebRtc(format!("Failed to register interceptors: {}", e)))?;

        let mut setting_engine = SettingEngine::default();
        setting_engine.set_ice_multicast_dns_mode(MulticastDnsMode::Disabled);

        let api = APIBuilder::new()
            .with_setting_engine(setting_engine)
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: self.config.ice_servers(),
            ..Default::default()
        };

        let pc = api.new_peer_connection(rtc_config).await.map_err(|e| {
            AppError::WebRtc(format!("Failed to create peer connection: {}", e))
        })?;

        Ok(Arc::new(pc))
    }

    fn setup_event_handlers(&self, pc: &RTCPeerConnection) {
        let shared = self.shared.clone();
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            if let Some(state) = ConnectionState::from_rtc(s) {
                shared.set_state(state);
            }
            Box::pin(async {})
        }));

        let shared = self.shared.clone();
        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _, _| {
            shared.track_arrived(track.kind());

            // Nothing renders here; drain RTP so the interceptors keep running
            tokio::spawn(async move {
                while track.read_rtp().await.is_ok() {}
                debug!("Remote {} track ended", track.kind());
            });
            Box::pin(async {})
        }));

        let shared = self.shared.clone();
        let input_label = self.config.input_channel_label.clone();
        pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let shared = shared.clone();
            let input_label = input_label.clone();

            Box::pin(async move {
                let label = dc.label().to_string();
                if label != input_label {
                    debug!("Ignoring data channel '{}'", label);
                    return;
                }

                let channel = Arc::new(PeerSideChannel::new(dc.clone()));
                *shared.input_channel.lock() = Some(channel.clone());

                let on_open = shared.clone();
                dc.on_open(Box::new(move || {
                    if !on_open.closed.load(Ordering::SeqCst) {
                        info!("Input channel open for peer {}", on_open.session_id);
                        on_open.callbacks.side_channel_ready(channel.clone());
                    }
                    Box::pin(async {})
                }));

                let on_close = shared.clone();
                dc.on_close(Box::new(move || {
                    on_close.input_channel.lock().take();
                    if !on_close.closed.load(Ordering::SeqCst) {
                        info!("Input channel closed for peer {}", on_close.session_id);
                        on_close.callbacks.side_channel_lost();
                    }
                    Box::pin(async {})
                }));
            })
        }));
    }

    async fn peer_connection(&self) -> Option<Arc<RTCPeerConnection>> {
        self.pc.lock().await.clone()
    }

    /// Receive-only transceivers plus the bootstrap channel, so that the
    /// offer includes a data section for the host's input channel
    async fn declare_media(&self, pc: &RTCPeerConnection) -> Result<()> {
        let mut kinds = vec![RTPCodecType::Video];
        if self.config.receive_audio {
            kinds.push(RTPCodecType::Audio);
        }
        for kind in kinds {
            pc.add_transceiver_from_kind(
                kind,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await
            .map_err(|e| AppError::WebRtc(format!("Failed to add {} transceiver: {}", kind, e)))?;
        }

        let bootstrap = pc
            .create_data_channel(&self.config.bootstrap_channel_label, None)
            .await
            .map_err(|e| AppError::WebRtc(format!("Failed to create data channel: {}", e)))?;

        let weak: Weak<RTCDataChannel> = Arc::downgrade(&bootstrap);
        bootstrap.on_open(Box::new(move || {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(dc) = weak.upgrade() {
                    debug!("Bootstrap channel open, closing");
                    if let Err(e) = dc.close().await {
                        debug!("Failed to close bootstrap channel: {}", e);
                    }
                }
            })
        }));

        Ok(())
    }

    /// Set a local offer and wait for ICE gathering
    async fn set_local_offer(&self, pc: &RTCPeerConnection) -> Result<String> {
        let offer = pc
            .create_offer(None)
            .await
            .map_err(|e| AppError::OfferCreationFailed(e.to_string()))?;

        let mut gather_complete = pc.gathering_complete_promise().await;
        pc.set_local_description(offer)
            .await
            .map_err(|e| AppError::OfferCreationFailed(e.to_string()))?;

        if tokio::time::timeout(GATHERING_TIMEOUT, gather_complete.recv())
            .await
            .is_err()
        {
            warn!(
                "ICE gathering not complete after {:?}, sending partial offer",
                GATHERING_TIMEOUT
            );
        }

        let sdp = pc
            .local_description()
            .await
            .map(|d| d.sdp)
            .unwrap_or_default();
        if sdp.trim().is_empty() {
            return Err(AppError::OfferCreationFailed(
                "local description has no SDP".to_string(),
            ));
        }
        Ok(sdp)
    }
}

#[async_trait]
impl PeerTransport for WebRtcPeerTransport {
    async fn allocate(&self) -> Result<()> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(AppError::NoActiveTransport);
        }

        let mut guard = self.pc.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let pc = self.build_peer_connection().await?;
        self.setup_event_handlers(&pc);
        *guard = Some(pc);
        debug!("Peer connection allocated for session {}", self.shared.session_id);
        Ok(())
    }

    async fn create_offer(&self) -> Result<String> {
        self.allocate().await?;
        let pc = self
            .peer_connection()
            .await
            .ok_or(AppError::NoActiveTransport)?;

        self.declare_media(&pc).await?;
        let sdp = self.set_local_offer(&pc).await?;
        info!(
            "Created offer for session {} ({} bytes)",
            self.shared.session_id,
            sdp.len()
        );
        Ok(sdp)
    }

    async fn apply_answer(&self, answer: Option<&str>) -> Result<()> {
        let pc = self
            .peer_connection()
            .await
            .ok_or(AppError::NoActiveTransport)?;
        let answer = answer
            .filter(|sdp| !sdp.trim().is_empty())
            .ok_or(AppError::MissingAnswer)?;

        // A resumed session has no local description yet; one is needed
        // before any answer can be applied
        if pc.local_description().await.is_none() {
            self.declare_media(&pc).await?;
            self.set_local_offer(&pc).await?;
        }

        let description = RTCSessionDescription::answer(answer.to_string())
            .map_err(|e| AppError::WebRtc(format!("Invalid SDP answer: {}", e)))?;
        pc.set_remote_description(description)
            .await
            .map_err(|e| AppError::WebRtc(format!("Failed to set remote description: {}", e)))?;

        info!("Applied answer for session {}", self.shared.session_id);
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let channel = self.shared.input_channel.lock().take();
        if let Some(channel) = channel {
            channel.close().await;
        }

        let pc = self.pc.lock().await.take();
        if let Some(pc) = pc {
            if let Err(e) = pc.close().await {
                warn!(
                    "Failed to close peer connection for session {}: {}",
                    self.shared.session_id, e
                );
            }
        }

        self.shared.state.send_replace(ConnectionState::Closed);
        debug!("Peer transport closed for session {}", self.shared.session_id);
    }
}
