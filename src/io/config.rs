//! Session timing configuration
//!
//! Controls the polling cadence shared by watchers and the accept loop.

use std::time::Duration;

/// Default interval between two watcher or accept-loop ticks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Timing configuration for clients and servers
///
/// # Examples
///
/// ```
/// use tcp_session::io::SessionConfig;
/// use std::time::Duration;
///
/// let config = SessionConfig::default()
///     .with_poll_interval(Duration::from_millis(10))
///     .with_connect_timeout(Duration::from_secs(2));
/// assert_eq!(config.poll_interval, Duration::from_millis(10));
/// assert_eq!(config.connect_timeout, Some(Duration::from_secs(2)));
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Sleep between two checks of the same connection, and between two
    /// accept attempts
    pub poll_interval: Duration,
    /// Timeout passed to the readability poll
    pub readable_timeout: Duration,
    /// Per-address timeout for outbound connects (None = OS default)
    pub connect_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            readable_timeout: Duration::ZERO,
            connect_timeout: None,
        }
    }
}

impl SessionConfig {
    /// Override the poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Override the readability poll timeout
    pub fn with_readable_timeout(mut self, timeout: Duration) -> Self {
        self.readable_timeout = timeout;
        self
    }

    /// Bound each outbound connect attempt
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_config_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.poll_interval, Duration::from_millis(50));
        assert_eq!(config.readable_timeout, Duration::ZERO);
        assert_eq!(config.connect_timeout, None);
    }

    #[test]
    fn test_session_config_overrides() {
        let config = SessionConfig::default()
            .with_poll_interval(Duration::from_millis(5))
            .with_readable_timeout(Duration::from_millis(1));
        assert_eq!(config.poll_interval, Duration::from_millis(5));
        assert_eq!(config.readable_timeout, Duration::from_millis(1));
    }
}
