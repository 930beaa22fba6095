//! Heartbeat policy for a single connection.
//!
//! The write task ticks the monitor on the ping interval; the monitor
//! decides between sending another ping and declaring the connection dead.
//! Any inbound frame counts as life, so a chatty client never gets pinged
//! into a timeout.

use std::sync::Arc;
use std::time::Duration;

use crate::connection::ConnectionHandle;

/// What the write task should do on a heartbeat tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeartbeatVerdict {
    /// Send a ping and keep going.
    SendPing,
    /// The pong timeout elapsed with no sign of life; close the connection.
    Dead,
}

/// Heartbeat decisions for one connection.
pub struct HeartbeatMonitor {
    connection: Arc<ConnectionHandle>,
    pong_timeout: Duration,
}

impl HeartbeatMonitor {
    /// Create a monitor for `connection` with the given pong timeout.
    pub fn new(connection: Arc<ConnectionHandle>, pong_timeout: Duration) -> Self {
        Self {
            connection,
            pong_timeout,
        }
    }

    /// Evaluate liveness at a tick boundary.
    ///
    /// The connection is dead only when it showed no life since the last
    /// tick AND the silence has lasted strictly longer than the pong
    /// timeout. With a 15s interval and 20s timeout that puts eviction
    /// between 20s and 35s after the last pong, never sooner.
    pub fn on_tick(&self) -> HeartbeatVerdict {
        if !self.connection.check_alive() && self.connection.last_pong_elapsed() > self.pong_timeout
        {
            return HeartbeatVerdict::Dead;
        }
        self.connection.mark_ping_sent();
        HeartbeatVerdict::SendPing
    }
}
