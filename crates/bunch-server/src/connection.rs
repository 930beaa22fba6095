//! Per-connection state: identity, protocol state machine, outbound queue,
//! and liveness bookkeeping.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bunch_core::ids::ConnectionId;
use bunch_proto::{CloseCode, ServerFrame};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::auth::Identity;

/// Protocol states a connection moves through.
///
/// `Connecting` ends when token verification resolves; `Subscribed` is
/// `Authenticated` with at least one channel subscription. Inbound frames
/// other than `ping` are only honored in the live states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport open, token not yet verified.
    Connecting,
    /// Verified, no subscriptions yet.
    Authenticated,
    /// Verified with one or more subscriptions.
    Subscribed,
    /// Close initiated, close frame not yet flushed.
    Closing,
    /// Terminal.
    Closed,
}

impl ConnectionState {
    /// Whether the connection accepts application frames.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Authenticated | Self::Subscribed)
    }
}

/// A registered WebSocket client.
///
/// The `id` is the durable connection ID the client persists across
/// reconnects; `transport_id` is unique per physical socket so a superseded
/// session's cleanup cannot evict its replacement.
pub struct ConnectionHandle {
    /// Durable connection ID (client-supplied or server-minted).
    pub id: ConnectionId,
    /// Unique ID of this physical transport.
    pub transport_id: ConnectionId,
    /// Who is behind the socket.
    pub identity: Identity,
    state: Mutex<ConnectionState>,
    /// Send channel to this connection's WebSocket write task.
    tx: mpsc::Sender<Arc<String>>,
    /// When this transport was established.
    pub connected_at: Instant,
    /// Whether the client has responded since the last ping.
    is_alive: AtomicBool,
    /// When the last pong (or any activity) was received.
    last_pong: Mutex<Instant>,
    /// When the last server-initiated ping went out.
    last_ping_sent: Mutex<Option<Instant>>,
    /// Count of frames dropped due to a full queue.
    dropped_frames: AtomicU64,
    close_token: CancellationToken,
    close_code: Mutex<Option<CloseCode>>,
}

impl ConnectionHandle {
    /// Create a handle in the `Connecting` state.
    pub fn new(id: ConnectionId, identity: Identity, tx: mpsc::Sender<Arc<String>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            transport_id: ConnectionId::new(),
            identity,
            state: Mutex::new(ConnectionState::Connecting),
            tx,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            last_ping_sent: Mutex::new(None),
            dropped_frames: AtomicU64::new(0),
            close_token: CancellationToken::new(),
            close_code: Mutex::new(None),
        }
    }

    /// Current protocol state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Move to a new protocol state. Transitions out of `Closed` are ignored.
    pub fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.lock();
        if *state != ConnectionState::Closed {
            *state = next;
        }
    }

    /// Enqueue a pre-serialized frame for the write task.
    ///
    /// Returns `false` if the queue is full or closed, and increments the
    /// dropped-frame counter. Never blocks; overflow is the caller's signal
    /// to evict this connection.
    pub fn send(&self, frame: Arc<String>) -> bool {
        if self.tx.try_send(frame).is_ok() {
            true
        } else {
            let _ = self.dropped_frames.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Serialize and enqueue a server frame.
    pub fn send_frame(&self, frame: &ServerFrame) -> bool {
        match serde_json::to_string(frame) {
            Ok(json) => self.send(Arc::new(json)),
            Err(_) => false,
        }
    }

    /// Total frames dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Mark the connection as alive (pong or inbound activity).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Check and reset the alive flag for the heartbeat cycle.
    ///
    /// Returns `true` if the connection showed life since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Duration since the last pong (or transport establishment).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Record that a ping just went out.
    pub fn mark_ping_sent(&self) {
        *self.last_ping_sent.lock() = Some(Instant::now());
    }

    /// When the last ping went out, if any.
    pub fn last_ping_sent(&self) -> Option<Instant> {
        *self.last_ping_sent.lock()
    }

    /// Transport age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Request closure with `code`. The first caller wins; the write task
    /// observes the token, flushes a close frame, and exits.
    pub fn begin_close(&self, code: CloseCode) {
        {
            let mut slot = self.close_code.lock();
            if slot.is_none() {
                *slot = Some(code);
            }
        }
        self.set_state(ConnectionState::Closing);
        self.close_token.cancel();
    }

    /// The close code chosen by `begin_close`, if closure was requested.
    pub fn close_code(&self) -> Option<CloseCode> {
        *self.close_code.lock()
    }

    /// Token cancelled once closure is requested.
    pub fn closed(&self) -> CancellationToken {
        self.close_token.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bunch_core::ids::UserId;

    fn make_handle() -> (ConnectionHandle, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(32);
        let identity = Identity {
            user_id: UserId::from("u1"),
            username: "alice".into(),
        };
        (
            ConnectionHandle::new(ConnectionId::from("conn_1"), identity, tx),
            rx,
        )
    }

    #[test]
    fn starts_connecting() {
        let (conn, _rx) = make_handle();
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert!(!conn.state().is_live());
    }

    #[test]
    fn live_states() {
        assert!(ConnectionState::Authenticated.is_live());
        assert!(ConnectionState::Subscribed.is_live());
        assert!(!ConnectionState::Connecting.is_live());
        assert!(!ConnectionState::Closing.is_live());
        assert!(!ConnectionState::Closed.is_live());
    }

    #[test]
    fn closed_is_terminal() {
        let (conn, _rx) = make_handle();
        conn.set_state(ConnectionState::Closed);
        conn.set_state(ConnectionState::Authenticated);
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn transport_ids_are_unique_per_handle() {
        let (a, _rxa) = make_handle();
        let (b, _rxb) = make_handle();
        assert_eq!(a.id, b.id);
        assert_ne!(a.transport_id, b.transport_id);
    }

    #[tokio::test]
    async fn send_enqueues() {
        let (conn, mut rx) = make_handle();
        assert!(conn.send(Arc::new("hello".into())));
        let msg = rx.recv().await.unwrap();
        assert_eq!(&**msg, "hello");
    }

    #[tokio::test]
    async fn send_to_full_queue_drops_and_counts() {
        let (tx, _rx) = mpsc::channel(1);
        let identity = Identity {
            user_id: UserId::from("u1"),
            username: "alice".into(),
        };
        let conn = ConnectionHandle::new(ConnectionId::from("conn_1"), identity, tx);
        assert!(conn.send(Arc::new("first".into())));
        assert!(!conn.send(Arc::new("second".into())));
        assert_eq!(conn.drop_count(), 1);
    }

    #[tokio::test]
    async fn send_frame_serializes() {
        let (conn, mut rx) = make_handle();
        assert!(conn.send_frame(&ServerFrame::error("nope")));
        let msg = rx.recv().await.unwrap();
        let v: serde_json::Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(v["type"], "error");
    }

    #[test]
    fn mark_alive_and_check() {
        let (conn, _rx) = make_handle();
        assert!(conn.check_alive());
        assert!(!conn.check_alive());
        conn.mark_alive();
        assert!(conn.check_alive());
    }

    #[test]
    fn begin_close_first_code_wins() {
        let (conn, _rx) = make_handle();
        assert!(conn.close_code().is_none());
        conn.begin_close(CloseCode::Superseded);
        conn.begin_close(CloseCode::HeartbeatTimeout);
        assert_eq!(conn.close_code(), Some(CloseCode::Superseded));
        assert_eq!(conn.state(), ConnectionState::Closing);
        assert!(conn.closed().is_cancelled());
    }

    #[test]
    fn ping_bookkeeping() {
        let (conn, _rx) = make_handle();
        assert!(conn.last_ping_sent().is_none());
        conn.mark_ping_sent();
        assert!(conn.last_ping_sent().is_some());
    }
}
