use std::time::Duration;

use hubtunnel_frame::FrameConfig;

use crate::handshake::HandshakeConfig;

/// Interval between client keepalive pings.
pub const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Silence from the server after which the connection is considered lost.
pub const DEFAULT_SERVER_TIMEOUT: Duration = Duration::from_secs(30);

/// Delays between reconnect attempts.
///
/// An empty policy disables automatic reconnect. Attempt `n` (zero-based)
/// waits `delays[n]`; once the list is exhausted the connection stops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconnectPolicy {
    delays: Vec<Duration>,
}

impl ReconnectPolicy {
    pub fn new(delays: impl Into<Vec<Duration>>) -> Self {
        Self {
            delays: delays.into(),
        }
    }

    /// No automatic reconnect.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// 0s, 2s, 10s, 30s: four attempts over roughly 42 seconds.
    pub fn standard() -> Self {
        Self::new([0, 2, 10, 30].map(Duration::from_secs))
    }

    pub fn from_millis(delays_ms: &[u64]) -> Self {
        Self::new(
            delays_ms
                .iter()
                .map(|&ms| Duration::from_millis(ms))
                .collect::<Vec<_>>(),
        )
    }

    pub fn is_enabled(&self) -> bool {
        !self.delays.is_empty()
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    /// Delay before attempt `attempt`, or `None` when the policy is exhausted.
    pub fn next_delay(&self, attempt: usize) -> Option<Duration> {
        self.delays.get(attempt).copied()
    }
}

/// Configuration for a [`HubConnection`](crate::HubConnection).
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// How often the client pings the server.
    pub keep_alive_interval: Duration,
    /// How long the client waits for any message before giving up.
    pub server_timeout: Duration,
    pub handshake: HandshakeConfig,
    pub frame: FrameConfig,
    pub reconnect: ReconnectPolicy,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            keep_alive_interval: DEFAULT_KEEP_ALIVE_INTERVAL,
            server_timeout: DEFAULT_SERVER_TIMEOUT,
            handshake: HandshakeConfig::default(),
            frame: FrameConfig::default(),
            reconnect: ReconnectPolicy::disabled(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.keep_alive_interval, Duration::from_secs(15));
        assert_eq!(config.server_timeout, Duration::from_secs(30));
        assert!(!config.reconnect.is_enabled());
    }

    #[test]
    fn policy_walks_delays_then_stops() {
        let policy = ReconnectPolicy::from_millis(&[0, 250]);
        assert!(policy.is_enabled());
        assert_eq!(policy.next_delay(0), Some(Duration::ZERO));
        assert_eq!(policy.next_delay(1), Some(Duration::from_millis(250)));
        assert_eq!(policy.next_delay(2), None);
    }

    #[test]
    fn standard_policy_has_four_attempts() {
        assert_eq!(ReconnectPolicy::standard().delays().len(), 4);
    }
}
