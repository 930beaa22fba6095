//! The connection registry: durable connection ID → live handle.
//!
//! At most one transport per connection ID. A reconnect under an ID that is
//! still registered supersedes the old transport (close code 4006) rather
//! than refusing the new one; the newest socket always wins.

use std::collections::HashMap;
use std::sync::Arc;

use bunch_core::ids::ConnectionId;
use bunch_proto::CloseCode;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::connection::ConnectionHandle;
use crate::subscriptions::SubscriptionTable;

/// Registry of live connections, shared with the dispatcher.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<ConnectionHandle>>>,
    subscriptions: Arc<SubscriptionTable>,
}

impl ConnectionRegistry {
    /// Create an empty registry backed by `subscriptions`.
    pub fn new(subscriptions: Arc<SubscriptionTable>) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            subscriptions,
        }
    }

    /// The subscription table this registry cascades removals into.
    pub fn subscriptions(&self) -> &Arc<SubscriptionTable> {
        &self.subscriptions
    }

    /// Register a handle, superseding any transport already holding the same
    /// connection ID. Returns the superseded handle, if there was one.
    ///
    /// The old transport is told to close with `Superseded` and its
    /// subscriptions are dropped immediately so they cannot outlive it; the
    /// client behind the new transport re-subscribes on its own.
    pub async fn register(&self, handle: Arc<ConnectionHandle>) -> Option<Arc<ConnectionHandle>> {
        let old = {
            let mut connections = self.connections.write().await;
            connections.insert(handle.id.clone(), handle.clone())
        };
        if let Some(old) = &old {
            info!(connection_id = %handle.id, "superseding existing transport");
            old.begin_close(CloseCode::Superseded);
            let _ = self.subscriptions.remove_connection(&old.id);
        }
        debug!(connection_id = %handle.id, "connection registered");
        old
    }

    /// Look up a connection by its durable ID.
    pub async fn get(&self, id: &ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.connections.read().await.get(id).cloned()
    }

    /// Remove `handle` from the registry and cascade into the subscription
    /// table, but only if it is still the registered transport for its ID.
    ///
    /// A superseded session calling this during cleanup must not evict its
    /// replacement. Returns `true` if the removal happened.
    pub async fn remove(&self, handle: &ConnectionHandle) -> bool {
        let removed = {
            let mut connections = self.connections.write().await;
            match connections.get(&handle.id) {
                Some(current) if current.transport_id == handle.transport_id => {
                    let _ = connections.remove(&handle.id);
                    true
                }
                _ => false,
            }
        };
        if removed {
            let dropped = self.subscriptions.remove_connection(&handle.id);
            debug!(
                connection_id = %handle.id,
                subscriptions_dropped = dropped,
                "connection removed"
            );
        }
        removed
    }

    /// Number of live connections.
    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Whether the registry is empty.
    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// Ask every live connection to close with `code`. Used at shutdown.
    pub async fn close_all(&self, code: CloseCode) {
        let handles: Vec<_> = self.connections.read().await.values().cloned().collect();
        for handle in handles {
            handle.begin_close(code);
        }
    }
}
