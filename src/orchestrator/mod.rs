//! Session lifecycle orchestrator
//!
//! Drives one session from its id to a connected peer transport and back
//! down again:
//!
//! ```text
//! load(id) -> Loading -> ACTIVE  -> Resuming -> apply stored answer ----+
//!                     -> PENDING -> Starting -> offer, start, poll -----+-> Connecting -> Connected
//! end(reason) -> Ending -> close channel + transport -> signaling end -> Terminated
//! ```
//!
//! Every `load` creates a fresh `SessionContext`. Transport callbacks are
//! funnelled into a per-run event loop tagged with the transport generation,
//! so events from a replaced transport or a superseded run are dropped.

mod context;
mod state;

pub use context::SessionContext;
pub use state::LifecycleState;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::channel::reconnect::EXHAUSTED_MESSAGE;
use crate::channel::{
    ReconnectDecision, ReconnectPolicy, ReconnectSupervisor, SideChannel, SideChannelBackend,
    SocketSideChannel,
};
use crate::config::{AppConfig, SideChannelConfig};
use crate::error::{AppError, Result};
use crate::events::{EventBus, SystemEvent};
use crate::input::InputEvent;
use crate::session::{
    poll_until_active, HostDescriptor, PollOptions, Session, SessionStateStore, SessionStatus,
    SignalingClient,
};
use crate::utils::LogThrottler;
use crate::webrtc::{
    ConnectionState, MediaKind, PeerTransport, PeerTransportFactory, TransportCallbacks,
};

/// End reason used when the user closes the session
pub const END_REASON_USER: &str = "Ended by user";
/// End reason used when the transport cannot be re-established
pub const END_REASON_CONNECTION_FAILED: &str = "Connection failed";

/// Status line while the answer is applied after polling
const STATUS_ESTABLISHING: &str = "Establishing video connection...";

/// Orchestrator tuning, usually derived from `AppConfig`
#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfig {
    pub poll: PollOptions,
    pub reconnect: ReconnectPolicy,
    pub side_channel: SideChannelConfig,
}

impl From<&AppConfig> for OrchestratorConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            poll: PollOptions::from(&config.signaling),
            reconnect: ReconnectPolicy::from(&config.reconnect),
            side_channel: config.side_channel.clone(),
        }
    }
}

enum TransportSignal {
    State(ConnectionState),
    Media(MediaKind),
    ChannelReady(Arc<dyn SideChannel>),
    ChannelLost,
}

struct TransportEvent {
    generation: u64,
    signal: TransportSignal,
}

/// One `load` invocation
struct Run {
    ctx: Arc<SessionContext>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
}

/// Lifecycle orchestrator
///
/// The orchestrator is the only writer of its `SessionStateStore`.
pub struct SessionOrchestrator {
    signaling: Arc<dyn SignalingClient>,
    transports: Arc<dyn PeerTransportFactory>,
    store: Arc<SessionStateStore>,
    events: Arc<EventBus>,
    config: OrchestratorConfig,
    current: Mutex<Option<Arc<Run>>>,
    throttler: LogThrottler,
}

impl SessionOrchestrator {
    pub fn new(
        signaling: Arc<dyn SignalingClient>,
        transports: Arc<dyn PeerTransportFactory>,
        events: Arc<EventBus>,
        config: OrchestratorConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            signaling,
            transports,
            store: Arc::new(SessionStateStore::with_events(events.clone())),
            events,
            config,
            current: Mutex::new(None),
            throttler: LogThrottler::with_secs(5),
        })
    }

    pub fn store(&self) -> &Arc<SessionStateStore> {
        &self.store
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Host address used by the socket side channel
    pub fn set_host(&self, host: Option<HostDescriptor>) {
        self.store.set_host(host);
    }

    /// Context of the current run, if any
    pub fn context(&self) -> Option<Arc<SessionContext>> {
        self.current.lock().as_ref().map(|run| run.ctx.clone())
    }

    /// Load a session and bring up its transport
    ///
    /// Supersedes any previous run. Returns once the answer has been
    /// applied; `Connected` follows asynchronously when the transport
    /// reports it. Returns `Err(Cancelled)` if the run was torn down or
    /// replaced in the meantime.
    pub async fn load(self: &Arc<Self>, session_id: Option<&str>) -> Result<Session> {
        let Some(session_id) = session_id.map(str::trim).filter(|id| !id.is_empty()) else {
            let err = AppError::MissingSessionId;
            warn!("{}", err);
            self.store.set_error(err.to_string());
            return Err(err);
        };

        let run = self.begin_run(session_id).await;
        match self.drive(&run).await {
            Ok(session) => Ok(session),
            Err(AppError::Cancelled) => {
                debug!(session_id, "Session run cancelled");
                Err(AppError::Cancelled)
            }
            Err(err) => {
                self.fail_run(&run, &err).await;
                Err(err)
            }
        }
    }

    /// End the current session
    ///
    /// Closes the side channel and transport, then ends the record with the
    /// backend. A failed end leaves the lifecycle in `Ending` so it can be
    /// retried; a successful end is not repeated.
    pub async fn end(self: &Arc<Self>, reason: Option<&str>) -> Result<Session> {
        let run = self
            .current
            .lock()
            .clone()
            .ok_or(AppError::MissingSessionId)?;
        self.end_run(&run, reason).await
    }

    /// Abandon the current run without ending the session record
    pub async fn teardown(&self) {
        let run = self.current.lock().take();
        if let Some(run) = run {
            info!(session_id = run.ctx.session_id(), "Tearing down session run");
            run.ctx.cancel();
            run.ctx.release().await;
            self.store.clear_connection();
            self.apply_state(LifecycleState::Idle);
        }
    }

    /// Manual reconnect of the input path
    ///
    /// Resets the retry budget. The socket backend reopens its socket; the
    /// peer backend rebuilds the transport from the stored answer.
    pub async fn reconnect(self: &Arc<Self>) -> Result<()> {
        let run = self
            .current
            .lock()
            .clone()
            .ok_or(AppError::NoActiveTransport)?;
        run.ctx.check()?;

        match self.config.side_channel.backend {
            SideChannelBackend::Socket => {
                let socket = run.ctx.socket().ok_or(AppError::SideChannelUnavailable)?;
                socket.reconnect().await
            }
            SideChannelBackend::Peer => {
                info!(session_id = run.ctx.session_id(), "Manual transport rebuild");
                run.ctx.supervisor.reset();
                self.clone().rebuild_transport(run).await;
                Ok(())
            }
        }
    }

    /// Send one input event over the current side channel
    ///
    /// Without a ready channel the event is dropped.
    pub async fn send_input(&self, event: &InputEvent) -> Result<()> {
        let channel = self
            .current
            .lock()
            .as_ref()
            .and_then(|run| run.ctx.side_channel());

        match channel {
            Some(channel) => channel.send(event).await,
            None => {
                crate::debug_throttled!(
                    self.throttler,
                    "no_side_channel",
                    "No input channel, dropping input"
                );
                Ok(())
            }
        }
    }

    async fn begin_run(self: &Arc<Self>, session_id: &str) -> Arc<Run> {
        let previous = self.current.lock().take();
        if let Some(previous) = previous {
            debug!(
                "Superseding run for session {}",
                previous.ctx.session_id()
            );
            previous.ctx.cancel();
            previous.ctx.release().await;
        }

        let supervisor = ReconnectSupervisor::new("peer", self.config.reconnect)
            .with_events(self.events.clone());
        let ctx = Arc::new(SessionContext::new(session_id, supervisor));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let run = Arc::new(Run { ctx, events_tx });

        *self.current.lock() = Some(run.clone());
        self.store.clear_error();
        self.store.clear_connection();

        tokio::spawn(Self::event_loop(Arc::downgrade(self), run.clone(), events_rx));
        run
    }

    async fn drive(self: &Arc<Self>, run: &Arc<Run>) -> Result<Session> {
        let ctx = &run.ctx;
        let session_id = ctx.session_id().to_string();

        self.set_state(ctx, LifecycleState::Loading)?;
        let session = ctx.guard(self.signaling.get(&session_id).await)?;
        self.store.set_session(session.clone());
        info!(session_id = %session_id, status = %session.status, "Session loaded");

        let session = match session.status {
            SessionStatus::Active => {
                self.set_state(ctx, LifecycleState::Resuming)?;
                let transport = self.install_transport(run).await;
                ctx.guard(transport.allocate().await)?;
                ctx.guard(transport.apply_answer(session.answer()).await)?;
                session
            }
            SessionStatus::Pending => {
                self.set_state(ctx, LifecycleState::Starting)?;
                let transport = self.install_transport(run).await;
                let offer = ctx.guard(transport.create_offer().await)?;

                self.store
                    .set_status_message(LifecycleState::Connecting.status_message());
                let started = ctx.guard(self.signaling.start(&session_id, &offer).await)?;
                self.store.set_session(started);

                let active = poll_until_active(
                    self.signaling.as_ref(),
                    &session_id,
                    |record| {
                        if !ctx.is_cancelled() {
                            self.store.set_session(record.clone());
                        }
                    },
                    self.config.poll,
                    ctx.token(),
                )
                .await;
                let active = ctx.guard(active)?;

                self.store.set_status_message(STATUS_ESTABLISHING);
                ctx.guard(transport.apply_answer(active.answer()).await)?;
                active
            }
            status => {
                return Err(AppError::SessionAlreadyTerminal { session_id, status });
            }
        };

        {
            let _transition = ctx.lock_transition();
            ctx.check()?;
            let connected = ctx
                .transport()
                .is_some_and(|t| t.state() == ConnectionState::Connected);
            self.apply_state(if connected {
                LifecycleState::Connected
            } else {
                LifecycleState::Connecting
            });
        }

        if self.config.side_channel.backend == SideChannelBackend::Socket {
            self.open_socket_channel(run, &session).await?;
        }

        Ok(session)
    }

    /// Create a transport for the run and retire the previous one
    async fn install_transport(&self, run: &Arc<Run>) -> Arc<dyn PeerTransport> {
        let generation = run.ctx.next_generation();
        let callbacks = Self::callbacks_for(&run.events_tx, generation);
        let transport = self.transports.create(run.ctx.session_id(), callbacks);

        if let Some(previous) = run.ctx.replace_transport(transport.clone()) {
            previous.close().await;
        }
        debug!(
            session_id = run.ctx.session_id(),
            generation, "Installed peer transport"
        );
        transport
    }

    fn callbacks_for(
        events_tx: &mpsc::UnboundedSender<TransportEvent>,
        generation: u64,
    ) -> TransportCallbacks {
        let emit = {
            let tx = events_tx.clone();
            move |signal: TransportSignal| {
                let _ = tx.send(TransportEvent { generation, signal });
            }
        };

        let on_state = emit.clone();
        let on_media = emit.clone();
        let on_ready = emit.clone();
        TransportCallbacks::new()
            .on_connection_state_changed(move |state| on_state(TransportSignal::State(state)))
            .on_media_ready(move |kind| on_media(TransportSignal::Media(kind)))
            .on_side_channel_ready(move |channel| on_ready(TransportSignal::ChannelReady(channel)))
            .on_side_channel_lost(move || emit(TransportSignal::ChannelLost))
    }

    async fn event_loop(
        this: Weak<Self>,
        run: Arc<Run>,
        mut events_rx: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        loop {
            let event = tokio::select! {
                _ = run.ctx.token().cancelled() => break,
                event = events_rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            if event.generation != run.ctx.generation() {
                debug!(
                    "Ignoring event from replaced transport (generation {})",
                    event.generation
                );
                continue;
            }

            let Some(this) = this.upgrade() else {
                break;
            };
            this.handle_transport_event(&run, event.signal);
        }
        debug!("Event loop for session {} stopped", run.ctx.session_id());
    }

    fn handle_transport_event(self: &Arc<Self>, run: &Arc<Run>, signal: TransportSignal) {
        let ctx = &run.ctx;
        if ctx.is_cancelled() {
            return;
        }

        match signal {
            TransportSignal::State(state) => {
                debug!(session_id = ctx.session_id(), "Transport state: {}", state);
                self.events.publish(SystemEvent::TransportStateChanged {
                    session_id: ctx.session_id().to_string(),
                    state,
                });

                if state == ConnectionState::Connected {
                    ctx.supervisor.on_open();
                    let _transition = ctx.lock_transition();
                    if !ctx.is_cancelled() && self.store.lifecycle() == LifecycleState::Connecting
                    {
                        info!(session_id = ctx.session_id(), "Peer transport connected");
                        self.apply_state(LifecycleState::Connected);
                    }
                } else if state.is_lost() {
                    self.handle_transport_loss(run, state);
                }
            }
            TransportSignal::Media(kind) => {
                match kind {
                    MediaKind::Video => self.store.set_media_connected(true),
                    MediaKind::Audio => self.store.set_audio_connected(true),
                }
                self.events.publish(SystemEvent::MediaConnected {
                    session_id: ctx.session_id().to_string(),
                    connected: true,
                    kind: kind.as_str().to_string(),
                });
            }
            TransportSignal::ChannelReady(channel) => {
                if self.config.side_channel.backend != SideChannelBackend::Peer {
                    debug!("Peer input channel opened but socket backend is configured");
                    return;
                }
                ctx.set_side_channel(Some(channel));
                self.set_input_connected(true);
            }
            TransportSignal::ChannelLost => {
                if self.config.side_channel.backend != SideChannelBackend::Peer {
                    return;
                }
                ctx.set_side_channel(None);
                self.set_input_connected(false);
            }
        }
    }

    fn handle_transport_loss(self: &Arc<Self>, run: &Arc<Run>, state: ConnectionState) {
        let ctx = &run.ctx;
        if ctx.is_cancelled() || ctx.is_ending() {
            return;
        }
        if !ctx.mark_lost() {
            debug!(session_id = ctx.session_id(), "Peer transport {} after loss", state);
            return;
        }

        warn!(session_id = ctx.session_id(), "Peer transport {}", state);
        self.store.set_media_connected(false);
        self.store.set_audio_connected(false);
        self.events.publish(SystemEvent::MediaConnected {
            session_id: ctx.session_id().to_string(),
            connected: false,
            kind: MediaKind::Video.as_str().to_string(),
        });

        let session_active = self
            .store
            .session()
            .is_some_and(|s| s.id == ctx.session_id() && s.status == SessionStatus::Active);

        let decision = ctx.supervisor.on_close(false, session_active);
        if let Some(message) = decision.status_message(self.config.reconnect.max_attempts) {
            self.store.set_status_message(message);
        }

        match decision {
            ReconnectDecision::Ignore => {}
            ReconnectDecision::Retry { delay, .. } => {
                {
                    let _transition = ctx.lock_transition();
                    if self.store.lifecycle() == LifecycleState::Connected {
                        self.store.set_lifecycle(LifecycleState::Connecting);
                    }
                }
                let this = self.clone();
                let run = run.clone();
                ctx.supervisor
                    .schedule(delay, move || this.rebuild_transport(run));
            }
            ReconnectDecision::Exhausted => {
                let this = self.clone();
                let run = run.clone();
                tokio::spawn(async move { this.fail_transport(run, state).await });
            }
        }
    }

    /// Replace the transport and re-apply the stored answer
    fn rebuild_transport(self: Arc<Self>, run: Arc<Run>) -> BoxFuture<'static, ()> {
        async move {
            let ctx = &run.ctx;
            if ctx.is_cancelled() || ctx.is_ending() {
                return;
            }
            info!(
                session_id = ctx.session_id(),
                attempt = ctx.supervisor.attempt(),
                "Rebuilding peer transport"
            );

            {
                let _transition = ctx.lock_transition();
                if self.store.lifecycle() == LifecycleState::Connected {
                    self.store.set_lifecycle(LifecycleState::Connecting);
                }
            }

            if self.config.side_channel.backend == SideChannelBackend::Peer {
                if let Some(channel) = ctx.side_channel() {
                    ctx.set_side_channel(None);
                    channel.close().await;
                    self.set_input_connected(false);
                }
            }

            let answer = self.store.session().and_then(|s| s.webrtc_answer);
            let transport = self.install_transport(&run).await;
            let result = match transport.allocate().await {
                Ok(()) => transport.apply_answer(answer.as_deref()).await,
                Err(e) => Err(e),
            };

            match ctx.guard(result) {
                Ok(()) => debug!(session_id = ctx.session_id(), "Answer re-applied"),
                Err(AppError::Cancelled) => {}
                Err(e) => {
                    warn!(session_id = ctx.session_id(), "Transport rebuild failed: {}", e);
                    self.handle_transport_loss(&run, ConnectionState::Failed);
                }
            }
        }
        .boxed()
    }

    async fn fail_transport(self: Arc<Self>, run: Arc<Run>, state: ConnectionState) {
        let err = AppError::TransportFailed(format!("peer connection {}", state));
        error!(session_id = run.ctx.session_id(), "{}", err);
        self.store.set_error(err.to_string());

        if let Err(e) = self.end_run(&run, Some(END_REASON_CONNECTION_FAILED)).await {
            warn!("Ending session after transport failure failed: {}", e);
        }
        self.store.set_status_message(EXHAUSTED_MESSAGE);
    }

    async fn open_socket_channel(&self, run: &Arc<Run>, session: &Session) -> Result<()> {
        let host = self.store.host().ok_or(AppError::SideChannelUnavailable)?;
        let socket = Arc::new(SocketSideChannel::new(
            &host,
            session,
            &self.config.side_channel,
            self.config.reconnect,
            self.store.clone(),
            Some(self.events.clone()),
        )?);

        run.ctx.check()?;
        run.ctx.set_socket(socket.clone());
        info!(session_id = %session.id, url = %socket.url(), "Opening socket side channel");

        if let Err(e) = socket.connect().await {
            // The socket schedules its own retry
            warn!(session_id = %session.id, "Socket side channel not connected: {}", e);
        }
        Ok(())
    }

    async fn end_run(&self, run: &Arc<Run>, reason: Option<&str>) -> Result<Session> {
        let ctx = &run.ctx;
        if !ctx.begin_ending() {
            if self.store.lifecycle().is_terminated() {
                return self.store.session().ok_or(AppError::MissingSessionId);
            }
            return Err(AppError::EndSessionFailed(
                "end already in progress".to_string(),
            ));
        }

        info!(session_id = ctx.session_id(), reason = reason.unwrap_or(""), "Ending session");
        self.apply_state(LifecycleState::Ending);

        ctx.cancel();
        ctx.release().await;
        self.store.clear_connection();

        match self.signaling.end(ctx.session_id(), reason).await {
            Ok(session) => {
                self.store.set_session(session.clone());
                self.apply_state(LifecycleState::Terminated {
                    reason: reason.map(str::to_string),
                });
                Ok(session)
            }
            Err(e) => {
                let err = AppError::EndSessionFailed(e.to_string());
                error!(session_id = ctx.session_id(), "{}", err);
                self.store.set_error(err.to_string());
                ctx.abort_ending();
                Err(err)
            }
        }
    }

    /// Stop the run after a fatal error, keeping the last status line
    async fn fail_run(&self, run: &Arc<Run>, err: &AppError) {
        error!(session_id = run.ctx.session_id(), "Session run failed: {}", err);
        self.store.set_error(err.to_string());

        run.ctx.cancel();
        run.ctx.release().await;
        self.store.clear_connection();
        self.store.set_lifecycle(LifecycleState::Terminated {
            reason: Some(err.to_string()),
        });
    }

    fn set_input_connected(&self, connected: bool) {
        self.store.set_input_connected(connected);
        self.events.publish(SystemEvent::InputChannelChanged {
            backend: SideChannelBackend::Peer.as_str().to_string(),
            connected,
        });
    }

    /// Move to `state` unless the run was cancelled
    fn set_state(&self, ctx: &SessionContext, state: LifecycleState) -> Result<()> {
        ctx.check()?;
        self.apply_state(state);
        Ok(())
    }

    fn apply_state(&self, state: LifecycleState) {
        self.store.set_status_message(state.status_message());
        self.store.set_lifecycle(state);
    }
}

impl Drop for SessionOrchestrator {
    fn drop(&mut self) {
        if let Some(run) = self.current.lock().take() {
            run.ctx.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{
        active_with_answer, session_with, MockSignaling, MockTransportFactory, RecordingChannel,
        MOCK_ANSWER,
    };
    use futures::StreamExt;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::Message;

    struct Harness {
        signaling: Arc<MockSignaling>,
        transports: Arc<MockTransportFactory>,
        orchestrator: Arc<SessionOrchestrator>,
    }

    fn harness_with(config: OrchestratorConfig) -> Harness {
        let signaling = Arc::new(MockSignaling::new());
        let transports = Arc::new(MockTransportFactory::new());
        let orchestrator = SessionOrchestrator::new(
            signaling.clone(),
            transports.clone(),
            Arc::new(EventBus::new()),
            config,
        );
        Harness {
            signaling,
            transports,
            orchestrator,
        }
    }

    fn fast_config() -> OrchestratorConfig {
        OrchestratorConfig {
            poll: PollOptions {
                max_attempts: 30,
                interval: Duration::from_millis(1),
            },
            ..Default::default()
        }
    }

    fn harness() -> Harness {
        harness_with(fast_config())
    }

    async fn wait_for_lifecycle(store: &SessionStateStore, expected: LifecycleState) {
        let mut rx = store.subscribe();
        tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|s| s.lifecycle == expected),
        )
        .await
        .expect("lifecycle not reached")
        .expect("store dropped");
    }

    #[tokio::test]
    async fn test_pending_session_offers_once_and_connects() {
        let h = harness();
        h.signaling.push_get(session_with("S1", SessionStatus::Pending));
        for _ in 0..3 {
            h.signaling.push_get(session_with("S1", SessionStatus::Pending));
        }
        h.signaling.push_get(active_with_answer("S1"));

        let session = h.orchestrator.load(Some("S1")).await.unwrap();
        assert_eq!(session.status, SessionStatus::Active);

        let transports = h.transports.transports();
        assert_eq!(transports.len(), 1);
        assert_eq!(transports[0].offer_count(), 1);
        assert_eq!(transports[0].answer_count(), 1);
        assert_eq!(h.signaling.start_calls().len(), 1);
        assert_eq!(h.signaling.start_calls()[0].0, "S1");
        // One load plus four polls
        assert_eq!(h.signaling.get_count(), 5);

        let store = h.orchestrator.store();
        wait_for_lifecycle(store, LifecycleState::Connected).await;
        let snapshot = store.snapshot();
        assert_eq!(snapshot.status_message, "Connected");
        assert_eq!(
            snapshot.session.unwrap().webrtc_answer.as_deref(),
            Some(MOCK_ANSWER)
        );
        assert!(snapshot.last_error.is_none());
    }

    #[tokio::test]
    async fn test_active_session_resumes_without_offer() {
        let h = harness();
        h.signaling.push_get(active_with_answer("S1"));

        h.orchestrator.load(Some("S1")).await.unwrap();

        let transport = h.transports.last().unwrap();
        assert_eq!(transport.offer_count(), 0);
        assert_eq!(transport.answer_count(), 1);
        assert!(h.signaling.start_calls().is_empty());
        assert_eq!(h.signaling.get_count(), 1);

        wait_for_lifecycle(h.orchestrator.store(), LifecycleState::Connected).await;
    }

    #[tokio::test]
    async fn test_connecting_until_transport_reports() {
        let h = harness();
        h.transports.connect_on_answer(false);
        h.signaling.push_get(active_with_answer("S1"));

        h.orchestrator.load(Some("S1")).await.unwrap();
        assert_eq!(h.orchestrator.store().lifecycle(), LifecycleState::Connecting);

        let transport = h.transports.last().unwrap();
        transport.fire_state(ConnectionState::Connecting);
        transport.fire_state(ConnectionState::Connected);
        wait_for_lifecycle(h.orchestrator.store(), LifecycleState::Connected).await;
    }

    #[tokio::test]
    async fn test_terminal_session_is_rejected() {
        let h = harness();
        h.signaling.push_get(session_with("S1", SessionStatus::Ended));

        let err = h.orchestrator.load(Some("S1")).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::SessionAlreadyTerminal {
                status: SessionStatus::Ended,
                ..
            }
        ));
        assert!(h.transports.transports().is_empty());

        let snapshot = h.orchestrator.store().snapshot();
        assert!(snapshot.lifecycle.is_terminated());
        assert!(snapshot.last_error.is_some());
    }

    #[tokio::test]
    async fn test_missing_session_id() {
        let h = harness();

        assert!(matches!(
            h.orchestrator.load(None).await,
            Err(AppError::MissingSessionId)
        ));
        assert!(matches!(
            h.orchestrator.load(Some("  ")).await,
            Err(AppError::MissingSessionId)
        ));
        assert_eq!(h.signaling.get_count(), 0);
        assert_eq!(
            h.orchestrator.store().snapshot().last_error.as_deref(),
            Some("No session id supplied")
        );
    }

    #[tokio::test]
    async fn test_terminal_during_poll_releases_transport() {
        let h = harness();
        h.signaling.push_get(session_with("S2", SessionStatus::Pending));
        h.signaling.push_get(session_with("S2", SessionStatus::Pending));
        let mut failed = session_with("S2", SessionStatus::Failed);
        failed.end_reason = Some("host unreachable".to_string());
        h.signaling.push_get(failed);

        let err = h.orchestrator.load(Some("S2")).await.unwrap_err();
        assert_eq!(err.to_string(), "session failed: host unreachable");

        let transport = h.transports.last().unwrap();
        assert_eq!(transport.close_count(), 1);

        let snapshot = h.orchestrator.store().snapshot();
        assert_eq!(
            snapshot.last_error.as_deref(),
            Some("session failed: host unreachable")
        );
        assert_eq!(
            snapshot.lifecycle,
            LifecycleState::Terminated {
                reason: Some("session failed: host unreachable".to_string())
            }
        );
        // The status line keeps the last phase
        assert_eq!(snapshot.status_message, "Connecting to host...");
    }

    #[tokio::test]
    async fn test_teardown_discards_in_flight_fetch() {
        let h = harness();
        let gate = h.signaling.hold_gets();
        h.signaling.push_get(active_with_answer("S1"));

        let orchestrator = h.orchestrator.clone();
        let load = tokio::spawn(async move { orchestrator.load(Some("S1")).await });

        while h.signaling.get_count() == 0 {
            tokio::task::yield_now().await;
        }
        h.orchestrator.teardown().await;
        gate.notify_one();

        let result = load.await.unwrap();
        assert!(matches!(result, Err(AppError::Cancelled)));

        let snapshot = h.orchestrator.store().snapshot();
        assert!(snapshot.session.is_none());
        assert_eq!(snapshot.lifecycle, LifecycleState::Idle);
        assert!(h.transports.transports().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_stops_answer_polling() {
        let h = harness_with(OrchestratorConfig {
            poll: PollOptions {
                max_attempts: 30,
                interval: Duration::from_secs(2),
            },
            ..Default::default()
        });
        for _ in 0..30 {
            h.signaling.push_get(session_with("S1", SessionStatus::Pending));
        }

        let orchestrator = h.orchestrator.clone();
        let load = tokio::spawn(async move { orchestrator.load(Some("S1")).await });

        // Initial fetch plus at least one poll
        while h.signaling.get_count() < 2 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        h.orchestrator.teardown().await;

        let result = load.await.unwrap();
        assert!(matches!(result, Err(AppError::Cancelled)));

        let polled = h.signaling.get_count();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.signaling.get_count(), polled);
        assert_eq!(h.orchestrator.store().lifecycle(), LifecycleState::Idle);
    }

    #[tokio::test]
    async fn test_new_load_supersedes_previous_run() {
        let h = harness();
        h.signaling.push_get(active_with_answer("S1"));
        h.orchestrator.load(Some("S1")).await.unwrap();
        let first = h.transports.last().unwrap();

        h.signaling.push_get(active_with_answer("S2"));
        h.orchestrator.load(Some("S2")).await.unwrap();

        assert_eq!(first.close_count(), 1);
        assert_eq!(h.transports.transports().len(), 2);
        assert_eq!(h.orchestrator.context().unwrap().session_id(), "S2");
    }

    #[tokio::test]
    async fn test_end_closes_once_and_terminates() {
        let h = harness();
        h.signaling.push_get(active_with_answer("S1"));
        h.orchestrator.load(Some("S1")).await.unwrap();

        let ended = h.orchestrator.end(Some(END_REASON_USER)).await.unwrap();
        assert_eq!(ended.status, SessionStatus::Ended);

        // A second end is a no-op
        h.orchestrator.end(Some(END_REASON_USER)).await.unwrap();

        assert_eq!(
            h.signaling.end_calls(),
            vec![("S1".to_string(), Some(END_REASON_USER.to_string()))]
        );
        assert_eq!(h.transports.last().unwrap().close_count(), 1);

        let snapshot = h.orchestrator.store().snapshot();
        assert_eq!(
            snapshot.lifecycle,
            LifecycleState::Terminated {
                reason: Some(END_REASON_USER.to_string())
            }
        );
        assert!(!snapshot.media_connected);
        assert!(!snapshot.input_connected);
    }

    #[tokio::test]
    async fn test_end_failure_is_surfaced_and_retryable() {
        let h = harness();
        h.signaling.push_get(active_with_answer("S1"));
        h.orchestrator.load(Some("S1")).await.unwrap();

        h.signaling.fail_end(true);
        let err = h.orchestrator.end(None).await.unwrap_err();
        assert!(matches!(err, AppError::EndSessionFailed(_)));

        let snapshot = h.orchestrator.store().snapshot();
        assert_eq!(snapshot.lifecycle, LifecycleState::Ending);
        assert!(snapshot
            .last_error
            .unwrap()
            .starts_with("Failed to end session"));

        h.signaling.fail_end(false);
        h.orchestrator.end(None).await.unwrap();
        assert_eq!(h.signaling.end_calls().len(), 2);
        assert!(h.orchestrator.store().lifecycle().is_terminated());
        // Release happened on the first attempt only
        assert_eq!(h.transports.last().unwrap().close_count(), 1);
    }

    #[tokio::test]
    async fn test_end_after_failed_load_still_ends_record() {
        let h = harness();
        h.signaling.push_get(session_with("S1", SessionStatus::Pending));
        // Polling finds nothing: the mock answers 404

        assert!(h.orchestrator.load(Some("S1")).await.is_err());
        h.orchestrator.end(Some("gave up")).await.unwrap();
        assert_eq!(h.signaling.end_calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_loss_rebuilds_from_stored_answer() {
        let h = harness();
        h.signaling.push_get(active_with_answer("S1"));
        h.orchestrator.load(Some("S1")).await.unwrap();
        let store = h.orchestrator.store().clone();
        wait_for_lifecycle(&store, LifecycleState::Connected).await;

        let mut status = store.subscribe();
        h.transports
            .last()
            .unwrap()
            .fire_state(ConnectionState::Disconnected);
        status
            .wait_for(|s| s.status_message == "Reconnecting (1/5)...")
            .await
            .unwrap();
        assert_eq!(store.lifecycle(), LifecycleState::Connecting);
        assert!(!store.snapshot().media_connected);

        // First retry fires after the base delay
        wait_for_lifecycle(&store, LifecycleState::Connected).await;
        let transports = h.transports.transports();
        assert_eq!(transports.len(), 2);
        assert_eq!(transports[0].close_count(), 1);
        assert_eq!(transports[1].offer_count(), 0);
        assert_eq!(transports[1].answer_count(), 1);
        assert!(h.signaling.start_calls().is_empty());
        assert_eq!(h.orchestrator.context().unwrap().supervisor.attempt(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_then_failure_counts_one_attempt() {
        let h = harness();
        h.signaling.push_get(active_with_answer("S1"));
        h.orchestrator.load(Some("S1")).await.unwrap();
        let store = h.orchestrator.store().clone();
        wait_for_lifecycle(&store, LifecycleState::Connected).await;

        let first = h.transports.last().unwrap();
        first.fire_state(ConnectionState::Disconnected);
        first.fire_state(ConnectionState::Failed);

        // Well inside the 1s base delay
        tokio::time::sleep(Duration::from_millis(100)).await;
        let ctx = h.orchestrator.context().unwrap();
        assert_eq!(ctx.supervisor.attempt(), 1);
        assert_eq!(store.snapshot().status_message, "Reconnecting (1/5)...");

        wait_for_lifecycle(&store, LifecycleState::Connected).await;
        assert_eq!(h.transports.transports().len(), 2);
        assert_eq!(ctx.supervisor.attempt(), 0);

        // The replacement transport gets its own retry budget entry
        h.transports
            .last()
            .unwrap()
            .fire_state(ConnectionState::Failed);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(ctx.supervisor.attempt(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_budget_ends_session() {
        let h = harness_with(OrchestratorConfig {
            reconnect: ReconnectPolicy {
                max_attempts: 0,
                ..Default::default()
            },
            ..fast_config()
        });
        h.signaling.push_get(active_with_answer("S1"));
        h.orchestrator.load(Some("S1")).await.unwrap();
        let store = h.orchestrator.store().clone();
        wait_for_lifecycle(&store, LifecycleState::Connected).await;

        h.transports.last().unwrap().fire_state(ConnectionState::Failed);
        wait_for_lifecycle(
            &store,
            LifecycleState::Terminated {
                reason: Some(END_REASON_CONNECTION_FAILED.to_string()),
            },
        )
        .await;

        assert_eq!(
            h.signaling.end_calls(),
            vec![(
                "S1".to_string(),
                Some(END_REASON_CONNECTION_FAILED.to_string())
            )]
        );
        assert_eq!(h.transports.transports().len(), 1);

        let mut rx = store.subscribe();
        rx.wait_for(|s| s.status_message == EXHAUSTED_MESSAGE)
            .await
            .unwrap();
        assert!(store
            .snapshot()
            .last_error
            .unwrap()
            .starts_with("Transport failed"));
    }

    #[tokio::test]
    async fn test_input_follows_side_channel() {
        let h = harness();
        h.signaling.push_get(active_with_answer("S1"));
        h.orchestrator.load(Some("S1")).await.unwrap();
        let store = h.orchestrator.store().clone();

        // Nothing to send to yet
        h.orchestrator
            .send_input(&InputEvent::key_down(0x41))
            .await
            .unwrap();

        let channel = Arc::new(RecordingChannel::new(true));
        let transport = h.transports.last().unwrap();
        transport.fire_side_channel(channel.clone());

        let mut rx = store.subscribe();
        rx.wait_for(|s| s.input_connected).await.unwrap();

        let click = InputEvent::click(crate::input::MouseButton::Left, 0.5, 0.5);
        h.orchestrator.send_input(&click).await.unwrap();
        assert_eq!(channel.sent(), vec![click]);

        transport.fire_side_channel_lost();
        rx.wait_for(|s| !s.input_connected).await.unwrap();
        h.orchestrator
            .send_input(&InputEvent::key_up(0x41))
            .await
            .unwrap();
        assert_eq!(channel.sent().len(), 1);
        // Media stays up independently of the input channel
        assert!(store.snapshot().media_connected);
    }

    /// Accepts WebSocket connections, forwarding `(connection, message)`
    async fn socket_host() -> (u16, mpsc::UnboundedReceiver<(usize, Message)>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            for index in 0.. {
                let Ok((tcp, _)) = listener.accept().await else {
                    return;
                };
                let tx = tx.clone();
                tokio::spawn(async move {
                    let mut ws = accept_async(tcp).await.unwrap();
                    while let Some(Ok(msg)) = ws.next().await {
                        let _ = tx.send((index, msg));
                    }
                });
            }
        });
        (port, rx)
    }

    async fn next_matching(
        rx: &mut mpsc::UnboundedReceiver<(usize, Message)>,
        wanted: impl Fn(usize, &Message) -> bool,
    ) -> Message {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let (index, msg) = rx.recv().await.expect("socket host gone");
                if wanted(index, &msg) {
                    return msg;
                }
            }
        })
        .await
        .expect("message not received")
    }

    #[tokio::test]
    async fn test_socket_backend_lifecycle() {
        let (port, mut host_rx) = socket_host().await;
        let mut config = fast_config();
        config.side_channel.backend = SideChannelBackend::Socket;
        let h = harness_with(config);
        h.orchestrator
            .set_host(Some(HostDescriptor::new("desk", "127.0.0.1", port)));
        h.signaling.push_get(active_with_answer("S1"));

        h.orchestrator.load(Some("S1")).await.unwrap();
        let ctx = h.orchestrator.context().unwrap();
        let socket = ctx.socket().expect("socket channel opened");
        assert!(socket.is_ready());
        assert!(h.orchestrator.store().snapshot().input_connected);

        // Peer data channels are ignored on this backend
        let transport = h.transports.last().unwrap();
        transport.fire_side_channel(Arc::new(RecordingChannel::new(true)));

        h.orchestrator
            .send_input(&InputEvent::key_down(0x41))
            .await
            .unwrap();
        let msg = next_matching(&mut host_rx, |i, m| i == 0 && m.is_text()).await;
        let json: serde_json::Value = serde_json::from_str(msg.to_text().unwrap()).unwrap();
        assert_eq!(json["sessionId"], "S1");
        assert_eq!(json["command"]["type"], "keyboard");

        // Manual reconnect drops the first socket and opens a second one
        h.orchestrator.reconnect().await.unwrap();
        next_matching(&mut host_rx, |i, m| i == 0 && m.is_close()).await;
        assert!(socket.is_ready());
        assert_eq!(socket.supervisor().attempt(), 0);

        h.orchestrator
            .send_input(&InputEvent::key_up(0x41))
            .await
            .unwrap();
        next_matching(&mut host_rx, |i, m| i == 1 && m.is_text()).await;

        h.orchestrator.end(Some(END_REASON_USER)).await.unwrap();
        let close = next_matching(&mut host_rx, |i, m| i == 1 && m.is_close()).await;
        match close {
            Message::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Normal),
            other => panic!("unexpected {:?}", other),
        }
        assert!(ctx.socket().is_none());
        assert!(ctx.side_channel().is_none());
        assert!(!socket.is_ready());
        assert!(!h.orchestrator.store().snapshot().input_connected);
    }

    #[tokio::test]
    async fn test_stale_transport_events_are_ignored() {
        let h = harness();
        h.signaling.push_get(active_with_answer("S1"));
        h.orchestrator.load(Some("S1")).await.unwrap();
        let first = h.transports.last().unwrap();
        wait_for_lifecycle(h.orchestrator.store(), LifecycleState::Connected).await;

        h.orchestrator.reconnect().await.unwrap();
        assert_eq!(h.transports.transports().len(), 2);

        first.fire_state(ConnectionState::Failed);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(h.orchestrator.store().lifecycle(), LifecycleState::Connected);
        assert_eq!(h.orchestrator.context().unwrap().supervisor.attempt(), 0);
    }
}
