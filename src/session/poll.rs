//! Polling for the remote answer
//!
//! After the offer is submitted the host accepts it asynchronously; the
//! answer only becomes visible by re-fetching the session record until its
//! status turns `ACTIVE`.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::model::{Session, SessionStatus};
use super::signaling::SignalingClient;
use crate::config::SignalingConfig;
use crate::error::{AppError, Result};

/// Default polling interval
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;
/// Default attempt ceiling (~60 seconds at the default interval)
pub const DEFAULT_POLL_MAX_ATTEMPTS: u32 = 30;

/// Polling cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_POLL_MAX_ATTEMPTS,
            interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

impl From<&SignalingConfig> for PollOptions {
    fn from(config: &SignalingConfig) -> Self {
        Self {
            max_attempts: config.poll_max_attempts,
            interval: Duration::from_millis(config.poll_interval_ms),
        }
    }
}

/// Fetch the session until it becomes `ACTIVE`
///
/// `on_update` sees every fetched record in fetch order, including the
/// final one. Fails with `SessionTerminalDuringPoll` as soon as a terminal
/// status is observed and with `PollTimeout` after `max_attempts` fetches.
/// Once `cancel` fires no further fetch is issued and the call returns
/// `Cancelled`, also when it interrupts a fetch or the interval sleep.
pub async fn poll_until_active<S, F>(
    client: &S,
    session_id: &str,
    mut on_update: F,
    options: PollOptions,
    cancel: &CancellationToken,
) -> Result<Session>
where
    S: SignalingClient + ?Sized,
    F: FnMut(&Session),
{
    for attempt in 1..=options.max_attempts {
        let session = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(session_id, attempt, "Polling cancelled");
                return Err(AppError::Cancelled);
            }
            fetched = client.get(session_id) => fetched?,
        };
        on_update(&session);

        match session.status {
            SessionStatus::Active => {
                info!(session_id, attempt, "Session became active");
                return Ok(session);
            }
            status if status.is_terminal() => {
                warn!(
                    session_id,
                    status = %status,
                    reason = session.end_reason.as_deref().unwrap_or(""),
                    "Session terminated while waiting for host"
                );
                return Err(AppError::SessionTerminalDuringPoll {
                    status,
                    end_reason: session.end_reason,
                });
            }
            _ => {
                debug!(session_id, attempt, "Session still {}", session.status);
            }
        }

        if attempt < options.max_attempts {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(session_id, attempt, "Polling cancelled");
                    return Err(AppError::Cancelled);
                }
                _ = tokio::time::sleep(options.interval) => {}
            }
        }
    }

    Err(AppError::PollTimeout {
        attempts: options.max_attempts,
    })
}
