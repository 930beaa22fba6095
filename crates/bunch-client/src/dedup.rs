//! At-least-once delivery dedup.
//!
//! The gateway may redeliver an event a client already saw (for instance
//! around a reconnect, when a frame raced the old transport's close). The
//! window is bounded: identities are evicted oldest-first once `capacity`
//! is reached, which is safe because redeliveries cluster near the
//! original delivery.

use std::collections::{HashSet, VecDeque};

use bunch_core::EventIdentity;

/// Default number of identities remembered.
const DEFAULT_CAPACITY: usize = 1024;

/// Sliding-window set of recently seen event identities.
pub struct EventDedup {
    seen: HashSet<EventIdentity>,
    order: VecDeque<EventIdentity>,
    capacity: usize,
}

impl EventDedup {
    /// Dedup window with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Dedup window remembering at most `capacity` identities.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            seen: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Record an identity. Returns `true` if it is new (process the event)
    /// and `false` if it was already seen (drop the duplicate).
    pub fn insert(&mut self, identity: EventIdentity) -> bool {
        if self.seen.contains(&identity) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                let _ = self.seen.remove(&oldest);
            }
        }
        self.order.push_back(identity.clone());
        let _ = self.seen.insert(identity);
        true
    }

    /// Whether an identity is in the window.
    pub fn contains(&self, identity: &EventIdentity) -> bool {
        self.seen.contains(identity)
    }

    /// Identities currently remembered.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the window is empty.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for EventDedup {
    fn default() -> Self {
        Self::new()
    }
}
