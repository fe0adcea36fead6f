//! Session state store
//!
//! Holds the current session record, the host descriptor and the
//! connection flags shown by the UI. The orchestrator is the only writer
//! (mutators are crate-private); any number of readers can take a snapshot
//! or subscribe to changes.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use super::model::{HostDescriptor, Session};
use crate::events::{EventBus, SystemEvent};
use crate::orchestrator::LifecycleState;

/// Point-in-time view of the session state
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionSnapshot {
    pub session: Option<Session>,
    pub host: Option<HostDescriptor>,
    pub lifecycle: LifecycleState,
    /// Persistent status line ("Connecting...", "Reconnecting (1/5)...")
    pub status_message: String,
    /// Last fatal error, shown separately from the status line
    pub last_error: Option<String>,
    /// Media connection (video) is up
    pub media_connected: bool,
    pub audio_connected: bool,
    /// Input side channel is open; independent of `media_connected`
    pub input_connected: bool,
}

/// Single-writer store for the active session
pub struct SessionStateStore {
    tx: watch::Sender<SessionSnapshot>,
    events: Option<Arc<EventBus>>,
}

impl SessionStateStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionSnapshot {
            status_message: LifecycleState::Idle.status_message().to_string(),
            ..Default::default()
        });
        Self { tx, events: None }
    }

    /// Create a store that mirrors changes onto the event bus
    pub fn with_events(events: Arc<EventBus>) -> Self {
        let mut store = Self::new();
        store.events = Some(events);
        store
    }

    /// Current snapshot
    pub fn snapshot(&self) -> SessionSnapshot {
        self.tx.borrow().clone()
    }

    /// Subscribe to snapshot changes
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.tx.subscribe()
    }

    pub fn session(&self) -> Option<Session> {
        self.tx.borrow().session.clone()
    }

    pub fn host(&self) -> Option<HostDescriptor> {
        self.tx.borrow().host.clone()
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.tx.borrow().lifecycle.clone()
    }

    fn publish(&self, event: SystemEvent) {
        if let Some(ref events) = self.events {
            events.publish(event);
        }
    }

    pub(crate) fn set_session(&self, session: Session) {
        self.publish(SystemEvent::SessionUpdated {
            session_id: session.id.clone(),
            status: session.status,
            end_reason: session.end_reason.clone(),
        });
        self.tx.send_modify(|s| s.session = Some(session));
    }

    pub(crate) fn set_host(&self, host: Option<HostDescriptor>) {
        self.tx.send_modify(|s| s.host = host);
    }

    pub(crate) fn set_lifecycle(&self, lifecycle: LifecycleState) {
        let session_id = self.tx.borrow().session.as_ref().map(|s| s.id.clone());
        self.publish(SystemEvent::SessionStateChanged {
            session_id,
            state: lifecycle.clone(),
        });
        self.tx.send_modify(|s| s.lifecycle = lifecycle);
    }

    pub(crate) fn set_status_message(&self, message: impl Into<String>) {
        let message = message.into();
        let changed = self.tx.send_if_modified(|s| {
            if s.status_message == message {
                return false;
            }
            s.status_message = message.clone();
            true
        });
        if changed {
            self.publish(SystemEvent::StatusMessage { message });
        }
    }

    pub(crate) fn set_error(&self, message: impl Into<String>) {
        let message = message.into();
        let session_id = self.tx.borrow().session.as_ref().map(|s| s.id.clone());
        self.publish(SystemEvent::SessionError {
            session_id,
            message: message.clone(),
        });
        self.tx.send_modify(|s| s.last_error = Some(message));
    }

    pub(crate) fn clear_error(&self) {
        self.tx.send_if_modified(|s| s.last_error.take().is_some());
    }

    pub(crate) fn set_media_connected(&self, connected: bool) {
        self.tx.send_if_modified(|s| {
            let changed = s.media_connected != connected;
            s.media_connected = connected;
            changed
        });
    }

    pub(crate) fn set_audio_connected(&self, connected: bool) {
        self.tx.send_if_modified(|s| {
            let changed = s.audio_connected != connected;
            s.audio_connected = connected;
            changed
        });
    }

    pub(crate) fn set_input_connected(&self, connected: bool) {
        self.tx.send_if_modified(|s| {
            let changed = s.input_connected != connected;
            s.input_connected = connected;
            changed
        });
    }

    /// Drop connection flags after teardown; the record and error stay visible
    pub(crate) fn clear_connection(&self) {
        self.tx.send_modify(|s| {
            s.media_connected = false;
            s.audio_connected = false;
            s.input_connected = false;
        });
    }
}

impl Default for SessionStateStore {
    fn default() -> Self {
        Self::new()
    }
}
