//! Reconnection Policy
//!
//! Fixed backoff sequence for WebSocket reconnection. The wait before the
//! k-th consecutive attempt is the k-th configured delay, and once the
//! sequence is exhausted its last entry is reused until the session comes
//! back or the attempt cap is reached.

use std::time::Duration;

use crate::infrastructure::config::ReconnectSettings;

/// Default delay sequence in seconds.
pub const DEFAULT_DELAYS_SECS: [u64; 6] = [1, 2, 4, 8, 16, 30];

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Wait before each consecutive attempt, last entry repeated.
    pub delays: Vec<Duration>,
    /// Maximum number of consecutive attempts (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delays: DEFAULT_DELAYS_SECS
                .iter()
                .copied()
                .map(Duration::from_secs)
                .collect(),
            max_attempts: 0,
        }
    }
}

impl ReconnectConfig {
    /// Create a new configuration.
    #[must_use]
    pub const fn new(delays: Vec<Duration>, max_attempts: u32) -> Self {
        Self {
            delays,
            max_attempts,
        }
    }

    /// Create configuration from [`ReconnectSettings`].
    #[must_use]
    pub fn from_settings(settings: &ReconnectSettings) -> Self {
        Self {
            delays: settings.delays.clone(),
            max_attempts: settings.max_attempts,
        }
    }
}

/// Reconnection policy over a fixed delay sequence.
///
/// # Example
///
/// ```rust
/// use epgb_options_stream::infrastructure::primary::reconnect::{ReconnectConfig, ReconnectPolicy};
/// use std::time::Duration;
///
/// let config = ReconnectConfig::new(vec![Duration::from_secs(1), Duration::from_secs(2)], 0);
/// let mut policy = ReconnectPolicy::new(config);
///
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(1)));
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(2)));
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(2)));
///
/// // Session restored
/// policy.reset();
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(1)));
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt_count: 0,
        }
    }

    /// Delay to wait before the next attempt.
    ///
    /// Returns `None` once `max_attempts` consecutive attempts were handed out.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }

        let index = usize::try_from(self.attempt_count).unwrap_or(usize::MAX);
        self.attempt_count += 1;

        Some(self.delay_at(index))
    }

    /// Reset the policy after a successful connection.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Get the current attempt count.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Check if reconnection should continue.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt_count < self.config.max_attempts
    }

    /// Configured attempt cap.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    fn delay_at(&self, index: usize) -> Duration {
        let last = self.config.delays.len().saturating_sub(1);
        self.config
            .delays
            .get(index.min(last))
            .copied()
            .unwrap_or(Duration::ZERO)
    }
}
