//! WebSocket side channel
//!
//! Sends JSON input commands to `ws://{host}:{port}{path}?session_id=..` and
//! relays `{"type":"status"}` messages from the host. Unexpected closes are
//! retried through a `ReconnectSupervisor`.

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::{FutureExt, SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use super::reconnect::{ReconnectPolicy, ReconnectSupervisor};
use super::{SideChannel, SideChannelBackend};
use crate::config::SideChannelConfig;
use crate::error::{AppError, Result};
use crate::events::{EventBus, SystemEvent};
use crate::input::{HostMessage, InputCommand, InputEvent, InputMessage, VideoSize};
use crate::session::{HostDescriptor, Session, SessionStateStore, SessionStatus};
use crate::utils::LogThrottler;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Build the socket endpoint URL for a session
pub fn socket_url(host: &HostDescriptor, session: &Session, path: &str) -> Result<Url> {
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };
    let mut url = Url::parse(&format!("ws://{}:{}{}", host.ip_address, host.port, path))
        .map_err(|e| AppError::Config(format!("Invalid socket endpoint: {}", e)))?;
    url.query_pairs_mut()
        .append_pair("session_id", &session.id)
        .append_pair("token", &session.session_token);
    Ok(url)
}

/// Input side channel over a WebSocket to the host
pub struct SocketSideChannel {
    inner: Arc<SocketInner>,
}

struct SocketInner {
    url: Url,
    session_id: String,
    video: VideoSize,
    store: Arc<SessionStateStore>,
    events: Option<Arc<EventBus>>,
    supervisor: ReconnectSupervisor,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    ready: AtomicBool,
    closed: AtomicBool,
    /// Bumped per connection so a stale reader cannot report a close
    generation: AtomicU64,
    throttler: LogThrottler,
}

impl SocketSideChannel {
    /// Create the channel; nothing is connected until `connect`
    ///
    /// Fails with `SideChannelUnavailable` when the session carries no token.
    pub fn new(
        host: &HostDescriptor,
        session: &Session,
        config: &SideChannelConfig,
        policy: ReconnectPolicy,
        store: Arc<SessionStateStore>,
        events: Option<Arc<EventBus>>,
    ) -> Result<Self> {
        if !session.can_authorize_side_channel() {
            return Err(AppError::SideChannelUnavailable);
        }

        let url = socket_url(host, session, &config.socket_path)?;
        let mut supervisor = ReconnectSupervisor::new("socket", policy);
        if let Some(ref events) = events {
            supervisor = supervisor.with_events(events.clone());
        }

        Ok(Self {
            inner: Arc::new(SocketInner {
                url,
                session_id: session.id.clone(),
                video: VideoSize::new(config.video_width, config.video_height),
                store,
                events,
                supervisor,
                outbound: Mutex::new(None),
                ready: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                throttler: LogThrottler::with_secs(5),
            }),
        })
    }

    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    pub fn supervisor(&self) -> &ReconnectSupervisor {
        &self.inner.supervisor
    }

    /// Open the socket
    ///
    /// A failed attempt is handed to the supervisor like any unexpected close.
    pub async fn connect(&self) -> Result<()> {
        self.inner.clone().connect().await
    }

    /// Manual reconnect: reset the retry budget and connect now
    pub async fn reconnect(&self) -> Result<()> {
        info!("Manual reconnect requested for session {}", self.inner.session_id);
        self.inner.supervisor.reset();
        if let Some(tx) = self.inner.detach() {
            let _ = tx.send(Message::Close(None));
        }
        self.inner.closed.store(false, Ordering::SeqCst);
        self.connect().await
    }
}

impl SocketInner {
    fn connect(self: Arc<Self>) -> BoxFuture<'static, Result<()>> {
        async move {
            if self.closed.load(Ordering::SeqCst) {
                return Ok(());
            }

            debug!("Connecting socket side channel to {}", self.url);
            match connect_async(self.url.as_str()).await {
                Ok((mut ws, _)) => {
                    if self.closed.load(Ordering::SeqCst) {
                        let _ = ws.close(None).await;
                        return Ok(());
                    }
                    self.attach(ws);
                    Ok(())
                }
                Err(e) => {
                    warn!("Socket side channel connect failed: {}", e);
                    self.handle_close(false);
                    Err(AppError::WebSocket(e.to_string()))
                }
            }
        }
        .boxed()
    }

    fn attach(self: &Arc<Self>, ws: WsStream) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (mut sink, mut stream) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

        *self.outbound.lock() = Some(tx);
        self.ready.store(true, Ordering::SeqCst);
        self.supervisor.on_open();
        self.throttler.clear("input_dropped");
        self.set_connected(true);
        info!("Socket side channel open for session {}", self.session_id);

        let writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let is_close = matches!(msg, Message::Close(_));
                if sink.send(msg).await.is_err() || is_close {
                    break;
                }
            }
        });

        let inner = self.clone();
        tokio::spawn(async move {
            let mut clean = false;
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => inner.handle_text(&text),
                    Ok(Message::Close(frame)) => {
                        clean = frame
                            .map(|f| f.code == CloseCode::Normal)
                            .unwrap_or(false);
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        debug!("Socket side channel read error: {}", e);
                        break;
                    }
                }
            }
            writer.abort();
            inner.on_disconnected(generation, clean);
        });
    }

    fn handle_text(&self, text: &str) {
        match HostMessage::parse(text) {
            Some(HostMessage::Status { message }) => {
                debug!("Host status: {}", message);
                self.store.set_status_message(message.clone());
                self.publish(SystemEvent::HostStatus { message });
            }
            None => debug!("Ignoring socket message: {}", text),
        }
    }

    fn on_disconnected(self: &Arc<Self>, generation: u64, clean: bool) {
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        self.outbound.lock().take();
        self.ready.store(false, Ordering::SeqCst);
        self.set_connected(false);
        info!(
            "Socket side channel closed for session {} (clean: {})",
            self.session_id, clean
        );
        self.handle_close(clean);
    }

    fn handle_close(self: &Arc<Self>, clean: bool) {
        let decision = self.supervisor.on_close(clean, self.session_active());
        if let Some(message) = decision.status_message(self.supervisor.policy().max_attempts) {
            self.store.set_status_message(message);
        }
        if let super::ReconnectDecision::Retry { delay, .. } = decision {
            let inner = self.clone();
            self.supervisor.schedule(delay, move || async move {
                let _ = inner.connect().await;
            });
        }
    }

    fn session_active(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
            && self
                .store
                .session()
                .map(|s| s.id == self.session_id && s.status == SessionStatus::Active)
                .unwrap_or(false)
    }

    /// Forget the current connection without reporting its close
    fn detach(&self) -> Option<mpsc::UnboundedSender<Message>> {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let was_ready = self.ready.swap(false, Ordering::SeqCst);
        if was_ready {
            self.set_connected(false);
        }
        self.outbound.lock().take()
    }

    fn set_connected(&self, connected: bool) {
        self.store.set_input_connected(connected);
        self.publish(SystemEvent::InputChannelChanged {
            backend: SideChannelBackend::Socket.to_string(),
            connected,
        });
    }

    fn publish(&self, event: SystemEvent) {
        if let Some(ref events) = self.events {
            events.publish(event);
        }
    }
}

#[async_trait]
impl SideChannel for SocketSideChannel {
    fn backend(&self) -> SideChannelBackend {
        SideChannelBackend::Socket
    }

    fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::SeqCst)
    }

    async fn send(&self, event: &InputEvent) -> Result<()> {
        let inner = &self.inner;
        let Some(command) = InputCommand::from_event(event, inner.video) else {
            debug!("No socket command for {:?}", event);
            return Ok(());
        };

        let tx = inner.outbound.lock().clone();
        let Some(tx) = tx.filter(|_| self.is_ready()) else {
            crate::debug_throttled!(
                inner.throttler,
                "input_dropped",
                "Socket side channel not open, dropping input"
            );
            return Ok(());
        };

        let json = serde_json::to_string(&InputMessage::new(&inner.session_id, command))?;
        if tx.send(Message::Text(json)).is_err() {
            crate::warn_throttled!(
                inner.throttler,
                "send_failed",
                "Socket side channel writer gone, dropping input"
            );
        }
        Ok(())
    }

    async fn close(&self) {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        inner.supervisor.cancel();

        if let Some(tx) = inner.detach() {
            let _ = tx.send(Message::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "session ended".into(),
            })));
        }
        debug!("Socket side channel closed for session {}", inner.session_id);
    }
}
