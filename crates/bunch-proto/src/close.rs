//! WebSocket close codes and the reconnect contract they encode.
//!
//! The 4001–4005 range is reserved for authentication failures so the
//! client's backoff controller can tell "do not retry" apart from ordinary
//! network drops.

use serde::{Deserialize, Serialize};

/// Close reason attached to a `1000` close when the user disconnected on
/// purpose; suppresses the client's auto-reconnect.
pub const USER_DISCONNECTED: &str = "User disconnected";

/// Close codes the gateway emits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CloseCode {
    /// Normal closure (user-initiated or server shutdown).
    Normal,
    /// A ping went unanswered past the pong timeout.
    HeartbeatTimeout,
    /// Handshake carried no auth token.
    AuthMissingToken,
    /// Token verification failed (bad or expired token).
    AuthFailed,
    /// Verifier errored while checking the token.
    AuthError,
    /// A newer transport registered under the same connection ID.
    Superseded,
    /// The connection's outbound queue overflowed (slow consumer).
    QueueOverflow,
}

impl CloseCode {
    /// The numeric wire code.
    pub fn code(self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::HeartbeatTimeout => 4000,
            Self::AuthMissingToken => 4001,
            Self::AuthFailed => 4002,
            Self::AuthError => 4003,
            Self::Superseded => 4006,
            Self::QueueOverflow => 4007,
        }
    }

    /// Canonical reason text sent in the close frame.
    pub fn reason(self) -> &'static str {
        match self {
            Self::Normal => "Normal closure",
            Self::HeartbeatTimeout => "Heartbeat timeout",
            Self::AuthMissingToken => "Missing auth token",
            Self::AuthFailed => "Authentication failed",
            Self::AuthError => "Authentication error",
            Self::Superseded => "Superseded by newer connection",
            Self::QueueOverflow => "Outbound queue overflow",
        }
    }
}

/// Whether a numeric close code is in the reserved auth-error range.
pub fn is_auth_error(code: u16) -> bool {
    (4001..=4005).contains(&code)
}
