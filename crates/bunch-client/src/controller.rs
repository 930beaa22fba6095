//! Reconnection control for a client session.
//!
//! The controller is transport-agnostic: the embedding client feeds it
//! lifecycle signals (`on_established`, `on_close`, `on_transport_error`)
//! and acts on what comes back: a delay to wait before redialing, or a
//! verdict to stop. Desired subscriptions are tracked here so they can be
//! replayed after every reconnect; the server never restores them.

use std::collections::BTreeSet;
use std::time::Duration;

use bunch_core::ids::{BunchId, ChannelId, ConnectionId};
use bunch_proto::ClientFrame;
use bunch_proto::close::{self, USER_DISCONNECTED};
use tracing::debug;

use crate::backoff::Backoff;

/// Whether a closed transport should be redialed.
///
/// Auth failures (4001–4005) are permanent: retrying with the same token
/// would fail the same way. A supersede (4006) means another transport owns
/// this connection ID now. A normal close carrying the user-disconnect
/// reason was asked for. Everything else (network drops, heartbeat
/// evictions, queue overflow) is worth retrying.
pub fn should_reconnect(code: Option<u16>, reason: &str) -> bool {
    match code {
        Some(code) if close::is_auth_error(code) => false,
        Some(4006) => false,
        Some(1000) => reason != USER_DISCONNECTED,
        _ => true,
    }
}

/// Connection lifecycle as the controller sees it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientState {
    /// No transport; a redial may be pending.
    Disconnected,
    /// Dialing or waiting for `connection_established`.
    Connecting,
    /// Established and serving.
    Connected,
    /// Told to stop; no further redials.
    Stopped,
}

/// What the embedding client should do after a lifecycle signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reconnect {
    /// Wait this long, then redial with the same connection ID.
    After(Duration),
    /// Do not redial.
    Stop,
}

/// Drives reconnect decisions, backoff, and subscription replay.
pub struct ReconnectionController {
    connection_id: ConnectionId,
    backoff: Backoff,
    subscriptions: BTreeSet<(BunchId, ChannelId)>,
    state: ClientState,
}

impl ReconnectionController {
    /// Controller with a fresh connection ID.
    pub fn new() -> Self {
        Self::with_connection_id(ConnectionId::new())
    }

    /// Controller resuming a persisted connection ID.
    pub fn with_connection_id(connection_id: ConnectionId) -> Self {
        Self {
            connection_id,
            backoff: Backoff::new(),
            subscriptions: BTreeSet::new(),
            state: ClientState::Disconnected,
        }
    }

    /// The durable connection ID to present in every handshake.
    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ClientState {
        self.state
    }

    /// A dial is starting.
    pub fn on_connecting(&mut self) {
        if self.state != ClientState::Stopped {
            self.state = ClientState::Connecting;
        }
    }

    /// `connection_established` arrived: reset backoff and hand back the
    /// subscribe frames to replay, in stable order.
    pub fn on_established(&mut self) -> Vec<ClientFrame> {
        self.state = ClientState::Connected;
        self.backoff.reset();
        let replay: Vec<ClientFrame> = self
            .subscriptions
            .iter()
            .map(|(bunch_id, channel_id)| ClientFrame::Subscribe {
                bunch_id: bunch_id.clone(),
                channel_id: channel_id.clone(),
            })
            .collect();
        debug!(count = replay.len(), "replaying subscriptions");
        replay
    }

    /// Record a subscription the user wants, so it survives reconnects.
    pub fn track_subscribe(&mut self, bunch_id: BunchId, channel_id: ChannelId) -> bool {
        self.subscriptions.insert((bunch_id, channel_id))
    }

    /// Forget a subscription the user dropped.
    pub fn track_unsubscribe(&mut self, bunch_id: &BunchId, channel_id: &ChannelId) -> bool {
        self.subscriptions
            .remove(&(bunch_id.clone(), channel_id.clone()))
    }

    /// Channels currently wanted.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// The transport closed with `code` and `reason`.
    pub fn on_close(&mut self, code: Option<u16>, reason: &str) -> Reconnect {
        if self.state == ClientState::Stopped {
            return Reconnect::Stop;
        }
        if !should_reconnect(code, reason) {
            debug!(?code, reason, "close is final, not reconnecting");
            self.state = ClientState::Stopped;
            return Reconnect::Stop;
        }
        self.state = ClientState::Disconnected;
        Reconnect::After(self.backoff.next_delay())
    }

    /// The dial itself failed before any close frame (DNS, refused, ...).
    pub fn on_transport_error(&mut self) -> Reconnect {
        if self.state == ClientState::Stopped {
            return Reconnect::Stop;
        }
        self.state = ClientState::Disconnected;
        Reconnect::After(self.backoff.next_delay())
    }

    /// The user disconnected on purpose; suppress all further redials.
    pub fn stop(&mut self) {
        self.state = ClientState::Stopped;
    }
}

impl Default for ReconnectionController {
    fn default() -> Self {
        Self::new()
    }
}
