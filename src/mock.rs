//! In-memory signaling backend and peer transport for tests

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::channel::{SideChannel, SideChannelBackend};
use crate::error::{AppError, Result};
use crate::input::InputEvent;
use crate::session::{CreateSessionRequest, Session, SessionStatus, SignalingClient};
use crate::webrtc::{
    ConnectionState, MediaKind, PeerTransport, PeerTransportFactory, TransportCallbacks,
};

pub const MOCK_ANSWER: &str = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\n";

pub fn session_with(id: &str, status: SessionStatus) -> Session {
    let now = Utc::now();
    Session {
        id: id.to_string(),
        host_id: "host-1".to_string(),
        host_name: "desk".to_string(),
        client_id: "client-1".to_string(),
        client_name: "laptop".to_string(),
        status,
        session_token: format!("token-{}", id),
        webrtc_offer: None,
        webrtc_answer: None,
        created_at: now,
        expires_at: now + ChronoDuration::hours(1),
        started_at: None,
        ended_at: None,
        end_reason: None,
    }
}

pub fn active_with_answer(id: &str) -> Session {
    let mut session = session_with(id, SessionStatus::Active);
    session.webrtc_answer = Some(MOCK_ANSWER.to_string());
    session
}

/// Scripted signaling backend
///
/// `get` pops records pushed with `push_get`; an empty script answers 404.
#[derive(Default)]
pub struct MockSignaling {
    gets: Mutex<VecDeque<Session>>,
    get_gate: Mutex<Option<Arc<Notify>>>,
    get_calls: AtomicUsize,
    start_calls: Mutex<Vec<(String, String)>>,
    end_calls: Mutex<Vec<(String, Option<String>)>>,
    fail_end: AtomicBool,
}

impl MockSignaling {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_get(&self, session: Session) {
        self.gets.lock().push_back(session);
    }

    /// Make every `get` wait for a notification before answering
    pub fn hold_gets(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.get_gate.lock() = Some(notify.clone());
        notify
    }

    pub fn fail_end(&self, fail: bool) {
        self.fail_end.store(fail, Ordering::SeqCst);
    }

    pub fn get_count(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn start_calls(&self) -> Vec<(String, String)> {
        self.start_calls.lock().clone()
    }

    pub fn end_calls(&self) -> Vec<(String, Option<String>)> {
        self.end_calls.lock().clone()
    }
}

#[async_trait]
impl SignalingClient for MockSignaling {
    async fn create(&self, request: CreateSessionRequest) -> Result<Session> {
        let mut session = session_with("created", SessionStatus::Pending);
        session.host_id = request.host_id;
        session.client_id = request.client_id;
        Ok(session)
    }

    async fn start(&self, session_id: &str, offer_sdp: &str) -> Result<Session> {
        let mut calls = self.start_calls.lock();
        if calls.iter().any(|(id, _)| id == session_id) {
            return Err(AppError::Api {
                status: 409,
                message: "session already started".to_string(),
            });
        }
        calls.push((session_id.to_string(), offer_sdp.to_string()));

        let mut session = session_with(session_id, SessionStatus::Pending);
        session.webrtc_offer = Some(offer_sdp.to_string());
        Ok(session)
    }

    async fn end(&self, session_id: &str, reason: Option<&str>) -> Result<Session> {
        self.end_calls
            .lock()
            .push((session_id.to_string(), reason.map(|r| r.to_string())));

        if self.fail_end.load(Ordering::SeqCst) {
            return Err(AppError::Api {
                status: 500,
                message: "internal error".to_string(),
            });
        }

        let mut session = session_with(session_id, SessionStatus::Ended);
        session.end_reason = reason.map(|r| r.to_string());
        session.ended_at = Some(Utc::now());
        Ok(session)
    }

    async fn get(&self, session_id: &str) -> Result<Session> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.get_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        self.gets.lock().pop_front().ok_or_else(|| AppError::Api {
            status: 404,
            message: format!("session {} not found", session_id),
        })
    }
}

/// Peer transport that reports `connected` as soon as an answer is applied
pub struct MockTransport {
    callbacks: TransportCallbacks,
    connect_on_answer: bool,
    allocated: AtomicBool,
    state: Mutex<ConnectionState>,
    pub offers: AtomicUsize,
    pub answers: AtomicUsize,
    pub closes: AtomicUsize,
}

impl MockTransport {
    pub fn new(callbacks: TransportCallbacks, connect_on_answer: bool) -> Self {
        Self {
            callbacks,
            connect_on_answer,
            allocated: AtomicBool::new(false),
            state: Mutex::new(ConnectionState::New),
            offers: AtomicUsize::new(0),
            answers: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }

    /// Simulate a state change reported by the underlying connection
    pub fn fire_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
        self.callbacks.connection_state_changed(state);
    }

    pub fn fire_media(&self, kind: MediaKind) {
        self.callbacks.media_ready(kind);
    }

    pub fn fire_side_channel(&self, channel: Arc<dyn SideChannel>) {
        self.callbacks.side_channel_ready(channel);
    }

    pub fn fire_side_channel_lost(&self) {
        self.callbacks.side_channel_lost();
    }

    pub fn offer_count(&self) -> usize {
        self.offers.load(Ordering::SeqCst)
    }

    pub fn answer_count(&self) -> usize {
        self.answers.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerTransport for MockTransport {
    async fn allocate(&self) -> Result<()> {
        self.allocated.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn create_offer(&self) -> Result<String> {
        self.allocate().await?;
        self.offers.fetch_add(1, Ordering::SeqCst);
        Ok("v=0 offer".to_string())
    }

    async fn apply_answer(&self, answer: Option<&str>) -> Result<()> {
        if !self.allocated.load(Ordering::SeqCst) {
            return Err(AppError::NoActiveTransport);
        }
        answer
            .filter(|sdp| !sdp.trim().is_empty())
            .ok_or(AppError::MissingAnswer)?;
        self.answers.fetch_add(1, Ordering::SeqCst);

        if self.connect_on_answer {
            self.fire_state(ConnectionState::Connecting);
            self.fire_state(ConnectionState::Connected);
            self.fire_media(MediaKind::Video);
        }
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        *self.state.lock() = ConnectionState::Closed;
    }
}

/// Factory that keeps every transport it creates
pub struct MockTransportFactory {
    connect_on_answer: AtomicBool,
    created: Mutex<Vec<Arc<MockTransport>>>,
}

impl MockTransportFactory {
    pub fn new() -> Self {
        Self {
            connect_on_answer: AtomicBool::new(true),
            created: Mutex::new(Vec::new()),
        }
    }

    pub fn connect_on_answer(&self, connect: bool) {
        self.connect_on_answer.store(connect, Ordering::SeqCst);
    }

    pub fn transports(&self) -> Vec<Arc<MockTransport>> {
        self.created.lock().clone()
    }

    pub fn last(&self) -> Option<Arc<MockTransport>> {
        self.created.lock().last().cloned()
    }
}

impl PeerTransportFactory for MockTransportFactory {
    fn create(&self, _session_id: &str, callbacks: TransportCallbacks) -> Arc<dyn PeerTransport> {
        let transport = Arc::new(MockTransport::new(
            callbacks,
            self.connect_on_answer.load(Ordering::SeqCst),
        ));
        self.created.lock().push(transport.clone());
        transport
    }
}

/// Side channel that records what it was asked to send
pub struct RecordingChannel {
    ready: AtomicBool,
    pub sent: Mutex<Vec<InputEvent>>,
    pub closes: AtomicUsize,
}

impl RecordingChannel {
    pub fn new(ready: bool) -> Self {
        Self {
            ready: AtomicBool::new(ready),
            sent: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<InputEvent> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl SideChannel for RecordingChannel {
    fn backend(&self) -> SideChannelBackend {
        SideChannelBackend::Peer
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn send(&self, event: &InputEvent) -> Result<()> {
        if self.is_ready() {
            self.sent.lock().push(*event);
        }
        Ok(())
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.ready.store(false, Ordering::SeqCst);
    }
}
