//! Gateway configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the bunch gateway.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Interval between server-initiated pings, in seconds.
    pub ping_interval_secs: u64,
    /// How long a ping may go unanswered before the connection is declared
    /// dead, in seconds.
    pub pong_timeout_secs: u64,
    /// Capacity of each connection's bounded outbound queue. Overflow is
    /// fatal for that connection, never a reason to block dispatch.
    pub outbound_queue_capacity: usize,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            ping_interval_secs: 15,
            pong_timeout_secs: 20,
            outbound_queue_capacity: 256,
            max_message_size: 64 * 1024,
        }
    }
}

impl ServerConfig {
    /// Ping interval as a `Duration`.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    /// Pong timeout as a `Duration`.
    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs)
    }
}
