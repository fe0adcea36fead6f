//! Data-channel side channel

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, warn};
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;

use super::{SideChannel, SideChannelBackend};
use crate::error::{AppError, Result};
use crate::input::{InputEvent, InputFrame};
use crate::utils::LogThrottler;

/// Input side channel over the peer connection's `"input"` data channel
pub struct PeerSideChannel {
    dc: Arc<RTCDataChannel>,
    throttler: LogThrottler,
}

impl PeerSideChannel {
    pub fn new(dc: Arc<RTCDataChannel>) -> Self {
        Self {
            dc,
            throttler: LogThrottler::with_secs(5),
        }
    }

    pub fn label(&self) -> &str {
        self.dc.label()
    }
}

#[async_trait]
impl SideChannel for PeerSideChannel {
    fn backend(&self) -> SideChannelBackend {
        SideChannelBackend::Peer
    }

    fn is_ready(&self) -> bool {
        self.dc.ready_state() == RTCDataChannelState::Open
    }

    async fn send(&self, event: &InputEvent) -> Result<()> {
        if !self.is_ready() {
            crate::debug_throttled!(
                self.throttler,
                "input_dropped",
                "Input channel not open ({}), dropping input",
                self.dc.ready_state()
            );
            return Ok(());
        }

        let frame = InputFrame::encode(event);
        self.dc
            .send(&Bytes::copy_from_slice(frame.as_bytes()))
            .await
            .map_err(|e| AppError::WebRtc(format!("Failed to send input frame: {}", e)))?;
        Ok(())
    }

    async fn close(&self) {
        if matches!(
            self.dc.ready_state(),
            RTCDataChannelState::Closing | RTCDataChannelState::Closed
        ) {
            return;
        }
        if let Err(e) = self.dc.close().await {
            warn!("Failed to close data channel '{}': {}", self.dc.label(), e);
        } else {
            debug!("Data channel '{}' closed", self.dc.label());
        }
    }
}
