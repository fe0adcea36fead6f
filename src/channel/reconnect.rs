//! Reconnection supervisor
//!
//! Decides whether a lost channel should be re-established and when.
//! The delay before retry `n` (0-based) is `min(base * 2^n, max)`.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::config::ReconnectConfig;
use crate::events::{EventBus, SystemEvent};

/// Status line once the retry budget is spent
pub const EXHAUSTED_MESSAGE: &str = "Connection failed — max retries exceeded";

/// Backoff policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            max_attempts: config.max_attempts,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the retry that follows `attempt` earlier retries
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// Outcome of a close notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Clean close or no active session
    Ignore,
    /// Retry after `delay`; `attempt` is 1-based
    Retry { attempt: u32, delay: Duration },
    /// Budget spent, only a manual reconnect remains
    Exhausted,
}

impl ReconnectDecision {
    /// Status line to show for this decision
    pub fn status_message(&self, max_attempts: u32) -> Option<String> {
        match self {
            ReconnectDecision::Ignore => None,
            ReconnectDecision::Retry { attempt, .. } => {
                Some(format!("Reconnecting ({}/{})...", attempt, max_attempts))
            }
            ReconnectDecision::Exhausted => Some(EXHAUSTED_MESSAGE.to_string()),
        }
    }
}

/// Tracks retry attempts for one channel and owns the pending retry timer
pub struct ReconnectSupervisor {
    name: String,
    policy: ReconnectPolicy,
    attempt: AtomicU32,
    pending: Mutex<Option<AbortHandle>>,
    events: Option<Arc<EventBus>>,
}

impl ReconnectSupervisor {
    pub fn new(name: impl Into<String>, policy: ReconnectPolicy) -> Self {
        Self {
            name: name.into(),
            policy,
            attempt: AtomicU32::new(0),
            pending: Mutex::new(None),
            events: None,
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Retries consumed since the last successful open
    pub fn attempt(&self) -> u32 {
        self.attempt.load(Ordering::SeqCst)
    }

    /// Record a close and decide what to do
    ///
    /// A retry consumes one attempt.
    pub fn on_close(&self, was_clean: bool, session_active: bool) -> ReconnectDecision {
        if was_clean || !session_active {
            debug!(
                "{}: closed (clean: {}, session active: {}), not reconnecting",
                self.name, was_clean, session_active
            );
            return ReconnectDecision::Ignore;
        }

        let attempt = self.attempt.load(Ordering::SeqCst);
        if attempt >= self.policy.max_attempts {
            warn!(
                "{}: giving up after {} reconnect attempts",
                self.name, self.policy.max_attempts
            );
            self.publish(SystemEvent::ReconnectExhausted {
                backend: self.name.clone(),
                max_attempts: self.policy.max_attempts,
            });
            return ReconnectDecision::Exhausted;
        }

        let delay = self.policy.delay_for(attempt);
        self.attempt.store(attempt + 1, Ordering::SeqCst);

        info!(
            "{}: reconnecting in {:?} (attempt {}/{})",
            self.name,
            delay,
            attempt + 1,
            self.policy.max_attempts
        );
        self.publish(SystemEvent::ReconnectScheduled {
            backend: self.name.clone(),
            attempt: attempt + 1,
            max_attempts: self.policy.max_attempts,
            delay_ms: delay.as_millis() as u64,
        });

        ReconnectDecision::Retry {
            attempt: attempt + 1,
            delay,
        }
    }

    /// Run `reconnect` after `delay`, replacing any pending retry
    pub fn schedule<F, Fut>(&self, delay: Duration, reconnect: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            reconnect().await;
        });

        if let Some(previous) = self.pending.lock().replace(handle.abort_handle()) {
            previous.abort();
        }
    }

    /// A connection was established; the budget starts over
    pub fn on_open(&self) {
        self.attempt.store(0, Ordering::SeqCst);
    }

    /// Manual reconnect: drop the pending retry and reset the budget
    ///
    /// The caller reconnects immediately.
    pub fn reset(&self) {
        self.cancel();
        self.attempt.store(0, Ordering::SeqCst);
        debug!("{}: reconnect budget reset", self.name);
    }

    /// Abort a pending retry, if any
    pub fn cancel(&self) {
        if let Some(handle) = self.pending.lock().take() {
            handle.abort();
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending
            .lock()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    fn publish(&self, event: SystemEvent) {
        if let Some(ref events) = self.events {
            events.publish(event);
        }
    }
}

impl Drop for ReconnectSupervisor {
    fn drop(&mut self) {
        self.cancel();
    }
}
