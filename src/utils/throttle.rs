//! Log throttling
//!
//! Limits how often the same message is logged, e.g. input dropped while the
//! side channel is down.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

struct Entry {
    last: Instant,
    suppressed: u64,
}

/// Log throttler keyed by message kind
///
/// ```rust
/// use std::time::Duration;
/// use imperium_session::utils::LogThrottler;
///
/// let throttler = LogThrottler::new(Duration::from_secs(5));
/// assert!(throttler.should_log("input_dropped"));
/// assert!(!throttler.should_log("input_dropped"));
/// ```
pub struct LogThrottler {
    entries: Mutex<HashMap<String, Entry>>,
    interval: Duration,
}

impl LogThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            interval,
        }
    }

    pub fn with_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Returns `true` if a message for `key` should be logged now
    pub fn should_log(&self, key: &str) -> bool {
        self.check(key).is_some()
    }

    /// Like `should_log`, but returns how many messages were suppressed
    /// since the last one that went through
    pub fn check(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        match entries.get_mut(key) {
            Some(entry) if now.duration_since(entry.last) < self.interval => {
                entry.suppressed += 1;
                None
            }
            Some(entry) => {
                let suppressed = entry.suppressed;
                entry.last = now;
                entry.suppressed = 0;
                Some(suppressed)
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        last: now,
                        suppressed: 0,
                    },
                );
                Some(0)
            }
        }
    }

    /// Forget `key` so its next message is logged immediately
    pub fn clear(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    pub fn clear_all(&self) {
        self.entries.lock().clear();
    }
}

impl Default for LogThrottler {
    fn default() -> Self {
        Self::with_secs(5)
    }
}

/// Throttled `warn!`
#[macro_export]
macro_rules! warn_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if $throttler.should_log($key) {
            tracing::warn!($($arg)*);
        }
    };
}

/// Throttled `debug!`
#[macro_export]
macro_rules! debug_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if $throttler.should_log($key) {
            tracing::debug!($($arg)*);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_throttling() {
        let throttler = LogThrottler::new(Duration::from_millis(100));

        assert!(throttler.should_log("test_key"));
        assert!(!throttler.should_log("test_key"));

        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(throttler.should_log("test_key"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_suppressed_count() {
        let throttler = LogThrottler::with_secs(1);

        assert_eq!(throttler.check("drop"), Some(0));
        assert_eq!(throttler.check("drop"), None);
        assert_eq!(throttler.check("drop"), None);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(throttler.check("drop"), Some(2));
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let throttler = LogThrottler::with_secs(10);

        assert!(throttler.should_log("key1"));
        assert!(throttler.should_log("key2"));
        assert!(!throttler.should_log("key1"));

        throttler.clear("key1");
        assert!(throttler.should_log("key1"));

        throttler.clear_all();
        assert!(throttler.should_log("key2"));
    }
}
