//! The subscription table: which connections hear which channels.
//!
//! Both directions of the mapping live under one lock so they can never
//! disagree. Readers take snapshots; no lock is held across I/O.

use std::collections::{HashMap, HashSet};

use bunch_core::ids::{BunchId, ChannelId, ConnectionId};

type ChannelKey = (BunchId, ChannelId);

#[derive(Default)]
struct TableInner {
    by_channel: HashMap<ChannelKey, HashSet<ConnectionId>>,
    by_connection: HashMap<ConnectionId, HashSet<ChannelKey>>,
}

/// Bidirectional connection ↔ channel subscription index.
#[derive(Default)]
pub struct SubscriptionTable {
    inner: parking_lot::RwLock<TableInner>,
}

impl SubscriptionTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a connection to a channel.
    ///
    /// Idempotent; returns `true` if the subscription already existed.
    pub fn subscribe(
        &self,
        conn: &ConnectionId,
        bunch: &BunchId,
        channel: &ChannelId,
    ) -> bool {
        let key = (bunch.clone(), channel.clone());
        let mut inner = self.inner.write();
        let already = !inner
            .by_channel
            .entry(key.clone())
            .or_default()
            .insert(conn.clone());
        inner.by_connection.entry(conn.clone()).or_default().insert(key);
        already
    }

    /// Unsubscribe a connection from a channel.
    ///
    /// Idempotent; returns `true` if the subscription existed.
    pub fn unsubscribe(
        &self,
        conn: &ConnectionId,
        bunch: &BunchId,
        channel: &ChannelId,
    ) -> bool {
        let key = (bunch.clone(), channel.clone());
        let mut inner = self.inner.write();
        let mut existed = false;
        if let Some(subs) = inner.by_channel.get_mut(&key) {
            existed = subs.remove(conn);
            if subs.is_empty() {
                inner.by_channel.remove(&key);
            }
        }
        if let Some(keys) = inner.by_connection.get_mut(conn) {
            keys.remove(&key);
            if keys.is_empty() {
                inner.by_connection.remove(conn);
            }
        }
        existed
    }

    /// Whether a connection currently holds a subscription to a channel.
    pub fn is_subscribed(&self, conn: &ConnectionId, bunch: &BunchId, channel: &ChannelId) -> bool {
        self.inner
            .read()
            .by_connection
            .get(conn)
            .is_some_and(|keys| keys.contains(&(bunch.clone(), channel.clone())))
    }

    /// Snapshot of the connections subscribed to a channel.
    pub fn subscribers_of(&self, bunch: &BunchId, channel: &ChannelId) -> Vec<ConnectionId> {
        self.inner
            .read()
            .by_channel
            .get(&(bunch.clone(), channel.clone()))
            .map(|subs| subs.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop every subscription held by a connection. Returns how many were
    /// removed.
    pub fn remove_connection(&self, conn: &ConnectionId) -> usize {
        let mut inner = self.inner.write();
        let Some(keys) = inner.by_connection.remove(conn) else {
            return 0;
        };
        let removed = keys.len();
        for key in keys {
            if let Some(subs) = inner.by_channel.get_mut(&key) {
                subs.remove(conn);
                if subs.is_empty() {
                    inner.by_channel.remove(&key);
                }
            }
        }
        removed
    }

    /// How many channels a connection is subscribed to.
    pub fn count_for_connection(&self, conn: &ConnectionId) -> usize {
        self.inner
            .read()
            .by_connection
            .get(conn)
            .map_or(0, HashSet::len)
    }

    /// Total live subscriptions across all connections.
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .by_connection
            .values()
            .map(HashSet::len)
            .sum()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.read().by_connection.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> (ConnectionId, BunchId, ChannelId) {
        (
            ConnectionId::from("conn_1"),
            BunchId::from("b1"),
            ChannelId::from("c1"),
        )
    }

    #[test]
    fn subscribe_then_lookup() {
        let table = SubscriptionTable::new();
        let (conn, bunch, channel) = ids();
        assert!(!table.subscribe(&conn, &bunch, &channel));
        assert_eq!(table.subscribers_of(&bunch, &channel), vec![conn.clone()]);
        assert_eq!(table.count_for_connection(&conn), 1);
    }

    #[test]
    fn duplicate_subscribe_is_idempotent() {
        let table = SubscriptionTable::new();
        let (conn, bunch, channel) = ids();
        assert!(!table.subscribe(&conn, &bunch, &channel));
        assert!(table.subscribe(&conn, &bunch, &channel));
        assert_eq!(table.subscribers_of(&bunch, &channel).len(), 1);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn unsubscribe_reports_whether_it_existed() {
        let table = SubscriptionTable::new();
        let (conn, bunch, channel) = ids();
        table.subscribe(&conn, &bunch, &channel);
        assert!(table.unsubscribe(&conn, &bunch, &channel));
        assert!(!table.unsubscribe(&conn, &bunch, &channel));
        assert!(table.subscribers_of(&bunch, &channel).is_empty());
        assert!(table.is_empty());
    }

    #[test]
    fn is_subscribed_tracks_the_exact_channel() {
        let table = SubscriptionTable::new();
        let (conn, bunch, channel) = ids();
        assert!(!table.is_subscribed(&conn, &bunch, &channel));
        table.subscribe(&conn, &bunch, &channel);
        assert!(table.is_subscribed(&conn, &bunch, &channel));
        assert!(!table.is_subscribed(&conn, &bunch, &ChannelId::from("c2")));
        table.unsubscribe(&conn, &bunch, &channel);
        assert!(!table.is_subscribed(&conn, &bunch, &channel));
    }

    #[test]
    fn channel_scoping() {
        let table = SubscriptionTable::new();
        let (conn, bunch, channel) = ids();
        let other_channel = ChannelId::from("c2");
        table.subscribe(&conn, &bunch, &channel);
        assert!(table.subscribers_of(&bunch, &other_channel).is_empty());
        // Same channel name in a different bunch is a different key
        assert!(table.subscribers_of(&BunchId::from("b2"), &channel).is_empty());
    }

    #[test]
    fn multiple_subscribers_per_channel() {
        let table = SubscriptionTable::new();
        let (_, bunch, channel) = ids();
        let a = ConnectionId::from("conn_a");
        let b = ConnectionId::from("conn_b");
        table.subscribe(&a, &bunch, &channel);
        table.subscribe(&b, &bunch, &channel);
        let mut subs = table.subscribers_of(&bunch, &channel);
        subs.sort();
        assert_eq!(subs, vec![a, b]);
    }

    #[test]
    fn remove_connection_cleans_both_directions() {
        let table = SubscriptionTable::new();
        let (conn, bunch, channel) = ids();
        let other = ChannelId::from("c2");
        table.subscribe(&conn, &bunch, &channel);
        table.subscribe(&conn, &bunch, &other);
        assert_eq!(table.remove_connection(&conn), 2);
        assert!(table.subscribers_of(&bunch, &channel).is_empty());
        assert!(table.subscribers_of(&bunch, &other).is_empty());
        assert_eq!(table.count_for_connection(&conn), 0);
        assert!(table.is_empty());
    }

    #[test]
    fn remove_unknown_connection_is_a_noop() {
        let table = SubscriptionTable::new();
        assert_eq!(table.remove_connection(&ConnectionId::from("ghost")), 0);
    }
}
