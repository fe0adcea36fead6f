//! Per-run session context
//!
//! Each `load` gets its own context holding the current transport, the
//! current side channel and a cancellation token. Nothing here is global,
//! so a superseded run cannot touch the resources of its successor.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::channel::{ReconnectSupervisor, SideChannel, SocketSideChannel};
use crate::error::{AppError, Result};
use crate::webrtc::PeerTransport;

/// Single-owner cell for one orchestrator run
pub struct SessionContext {
    session_id: String,
    token: CancellationToken,
    transport: Mutex<Option<Arc<dyn PeerTransport>>>,
    side_channel: Mutex<Option<Arc<dyn SideChannel>>>,
    socket: Mutex<Option<Arc<SocketSideChannel>>>,
    /// Bumped per transport so events from a replaced one are ignored
    generation: AtomicU64,
    /// Last generation whose loss was handled
    lost_generation: AtomicU64,
    /// Serializes lifecycle check-and-set between the run and its event loop
    transition: Mutex<()>,
    ending: AtomicBool,
    pub(crate) supervisor: ReconnectSupervisor,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>, supervisor: ReconnectSupervisor) -> Self {
        Self {
            session_id: session_id.into(),
            token: CancellationToken::new(),
            transport: Mutex::new(None),
            side_channel: Mutex::new(None),
            socket: Mutex::new(None),
            generation: AtomicU64::new(0),
            lost_generation: AtomicU64::new(0),
            transition: Mutex::new(()),
            ending: AtomicBool::new(false),
            supervisor,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn cancel(&self) {
        self.token.cancel();
        self.supervisor.cancel();
    }

    /// `Err(Cancelled)` once the run was abandoned
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        Ok(())
    }

    /// Discard a result that arrived after cancellation
    pub fn guard<T>(&self, result: Result<T>) -> Result<T> {
        self.check()?;
        result
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub(crate) fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Record the loss of the current transport; `false` if already recorded
    pub(crate) fn mark_lost(&self) -> bool {
        let generation = self.generation();
        self.lost_generation.swap(generation, Ordering::SeqCst) != generation
    }

    pub fn transport(&self) -> Option<Arc<dyn PeerTransport>> {
        self.transport.lock().clone()
    }

    /// Install a transport, returning the one it replaces
    pub(crate) fn replace_transport(
        &self,
        transport: Arc<dyn PeerTransport>,
    ) -> Option<Arc<dyn PeerTransport>> {
        self.transport.lock().replace(transport)
    }

    pub fn side_channel(&self) -> Option<Arc<dyn SideChannel>> {
        self.side_channel.lock().clone()
    }

    pub(crate) fn set_side_channel(&self, channel: Option<Arc<dyn SideChannel>>) {
        *self.side_channel.lock() = channel;
    }

    pub fn socket(&self) -> Option<Arc<SocketSideChannel>> {
        self.socket.lock().clone()
    }

    pub(crate) fn set_socket(&self, socket: Arc<SocketSideChannel>) {
        *self.socket.lock() = Some(socket.clone());
        *self.side_channel.lock() = Some(socket);
    }

    pub(crate) fn lock_transition(&self) -> parking_lot::MutexGuard<'_, ()> {
        self.transition.lock()
    }

    /// Mark the run as ending; `false` if it already was
    pub(crate) fn begin_ending(&self) -> bool {
        !self.ending.swap(true, Ordering::SeqCst)
    }

    /// Allow another end attempt after a failed one
    pub(crate) fn abort_ending(&self) {
        self.ending.store(false, Ordering::SeqCst);
    }

    pub fn is_ending(&self) -> bool {
        self.ending.load(Ordering::SeqCst)
    }

    /// Close side channel and transport; errors are logged by the closers
    pub async fn release(&self) {
        self.supervisor.cancel();

        let channel = self.side_channel.lock().take();
        self.socket.lock().take();
        if let Some(channel) = channel {
            channel.close().await;
        }

        let transport = self.transport.lock().take();
        if let Some(transport) = transport {
            transport.close().await;
        }

        debug!("Released resources for session {}", self.session_id);
    }
}
