use std::time::Duration;

use serde::Deserialize;

/// Multi-device sync channel configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// Interval between heartbeat pings; a connection silent for a whole
    /// interval is dropped
    #[serde(default = "default_heartbeat", deserialize_with = "crate::duration::deserialize")]
    pub heartbeat_interval: Duration,
    /// Outbound buffer per connection; events beyond it are dropped
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: default_heartbeat(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

const fn default_heartbeat() -> Duration {
    Duration::from_secs(30)
}

const fn default_channel_capacity() -> usize {
    64
}
