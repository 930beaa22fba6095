//! Event fan-out to subscribed connections.
//!
//! A single dispatcher task drains the event channel, so every subscriber
//! of a channel sees that channel's events in publication order. Delivery
//! per connection is a non-blocking enqueue: one slow consumer overflows
//! its own queue and gets evicted, it never stalls the loop.

use std::sync::Arc;

use bunch_core::DomainEvent;
use bunch_proto::{CloseCode, ServerFrame};
use metrics::counter;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::registry::ConnectionRegistry;

/// Capacity of the dispatcher's inbound event channel.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Create the event channel sessions publish into.
pub fn event_channel() -> (mpsc::Sender<DomainEvent>, mpsc::Receiver<DomainEvent>) {
    mpsc::channel(EVENT_CHANNEL_CAPACITY)
}

/// Fans domain events out to the connections subscribed to their channel.
pub struct EventDispatcher {
    registry: Arc<ConnectionRegistry>,
}

impl EventDispatcher {
    /// Create a dispatcher over `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Consume events until the channel closes.
    pub async fn run(self, mut rx: mpsc::Receiver<DomainEvent>) {
        debug!("event dispatcher started");
        while let Some(event) = rx.recv().await {
            self.dispatch(&event).await;
        }
        debug!("event dispatcher stopped");
    }

    /// Deliver one event to every live subscriber of its channel.
    ///
    /// Returns the number of connections the event was enqueued for.
    pub async fn dispatch(&self, event: &DomainEvent) -> usize {
        let frame = ServerFrame::from_event(event);
        let json = match serde_json::to_string(&frame) {
            Ok(json) => Arc::new(json),
            Err(err) => {
                warn!(error = %err, "failed to serialize event, skipping");
                return 0;
            }
        };

        let (bunch, channel) = event.channel_key();
        // Snapshot first; no table lock is held while enqueueing
        let subscribers = self.registry.subscriptions().subscribers_of(bunch, channel);

        let mut delivered = 0;
        for conn_id in subscribers {
            let Some(conn) = self.registry.get(&conn_id).await else {
                continue;
            };
            if !conn.state().is_live() {
                continue;
            }
            if conn.send(json.clone()) {
                delivered += 1;
            } else {
                warn!(
                    connection_id = %conn.id,
                    dropped = conn.drop_count(),
                    "outbound queue overflow, evicting connection"
                );
                counter!("backpressure_evictions_total").increment(1);
                conn.begin_close(CloseCode::QueueOverflow);
                let _ = self.registry.remove(&conn).await;
            }
        }
        counter!("events_dispatched_total").increment(1);
        delivered
    }
}
