//! Session event bus
//!
//! Lifecycle, transport and input-channel changes are broadcast as
//! `SystemEvent`s. Subscribers either take every event (`subscribe`) or
//! only those matching topic patterns (`subscribe_topics`).

pub mod types;

pub use types::SystemEvent;

use tokio::sync::broadcast;
use tracing::warn;

/// Ring buffer size of the broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Broadcast bus for session events
///
/// Publishing never blocks and never fails; with no subscribers the event
/// is discarded.
///
/// ```no_run
/// use imperium_session::events::{EventBus, SystemEvent};
///
/// # async fn demo() {
/// let bus = EventBus::new();
/// let mut rx = bus.subscribe_topics(["session.*"]);
///
/// bus.publish(SystemEvent::StatusMessage {
///     message: "Connecting...".to_string(),
/// });
///
/// while let Some(event) = rx.recv().await {
///     println!("{}", event.event_name());
/// }
/// # }
/// ```
pub struct EventBus {
    tx: broadcast::Sender<SystemEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: SystemEvent) {
        let _ = self.tx.send(event);
    }

    /// Raw receiver; lagging subscribers see `RecvError::Lagged`
    pub fn subscribe(&self) -> broadcast::Receiver<SystemEvent> {
        self.tx.subscribe()
    }

    /// Receiver that yields only events matching one of `topics`
    ///
    /// Patterns follow `SystemEvent::matches_topic`. Lag is logged and
    /// skipped rather than reported.
    pub fn subscribe_topics<I, S>(&self, topics: I) -> TopicReceiver
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TopicReceiver {
            rx: self.tx.subscribe(),
            topics: topics.into_iter().map(Into::into).collect(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Topic-filtered subscription
pub struct TopicReceiver {
    rx: broadcast::Receiver<SystemEvent>,
    topics: Vec<String>,
}

impl TopicReceiver {
    fn wants(&self, event: &SystemEvent) -> bool {
        self.topics.is_empty() || self.topics.iter().any(|t| event.matches_topic(t))
    }

    /// Next matching event, or `None` once the bus is gone
    pub async fn recv(&mut self) -> Option<SystemEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.wants(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Event subscriber lagged, {} events skipped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
