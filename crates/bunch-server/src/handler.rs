//! Inbound frame handling for an authenticated session.
//!
//! Every branch replies on the caller's own queue; fan-out to other
//! subscribers always goes through the dispatcher so channel ordering holds.

use std::sync::Arc;

use bunch_core::DomainEvent;
use bunch_proto::{ClientFrame, ServerFrame};
use metrics::counter;
use tracing::{debug, warn};

use crate::connection::{ConnectionHandle, ConnectionState};
use crate::server::AppState;
use crate::store::ReactionToggle;

/// Error text for a frame addressing a bunch the caller is not in.
const ACCESS_DENIED: &str = "Access denied to channel";

/// Error text for publishing into a channel without subscribing first.
const NOT_SUBSCRIBED: &str = "Not subscribed to channel";

/// Handle one parsed client frame.
pub async fn handle_frame(
    frame: ClientFrame,
    connection: &Arc<ConnectionHandle>,
    state: &AppState,
) {
    match frame {
        ClientFrame::Ping { timestamp } => {
            let server_time = ServerFrame::now_ms();
            connection.send_frame(&ServerFrame::Pong {
                timestamp: timestamp.unwrap_or(server_time),
                server_time,
            });
        }

        ClientFrame::Subscribe {
            bunch_id,
            channel_id,
        } => {
            match state
                .store
                .is_member(&connection.identity.user_id, &bunch_id)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    connection.send_frame(&ServerFrame::error(ACCESS_DENIED));
                    return;
                }
                Err(err) => {
                    connection.send_frame(&ServerFrame::error(err.to_string()));
                    return;
                }
            }

            let already = state
                .registry
                .subscriptions()
                .subscribe(&connection.id, &bunch_id, &channel_id);
            if !already {
                counter!("subscriptions_total").increment(1);
            }
            connection.set_state(ConnectionState::Subscribed);
            debug!(
                connection_id = %connection.id,
                bunch_id = %bunch_id,
                channel_id = %channel_id,
                already,
                "subscribed"
            );
            // Acknowledged even when the subscription already existed
            connection.send_frame(&ServerFrame::Subscribed {
                bunch_id,
                channel_id,
            });
        }

        ClientFrame::Unsubscribe {
            bunch_id,
            channel_id,
        } => {
            let _ = state
                .registry
                .subscriptions()
                .unsubscribe(&connection.id, &bunch_id, &channel_id);
            if state
                .registry
                .subscriptions()
                .count_for_connection(&connection.id)
                == 0
                && connection.state() == ConnectionState::Subscribed
            {
                connection.set_state(ConnectionState::Authenticated);
            }
            // Acknowledged whether or not the subscription existed
            connection.send_frame(&ServerFrame::Unsubscribed {
                bunch_id,
                channel_id,
            });
        }

        ClientFrame::MessageNew {
            bunch_id,
            channel_id,
            content,
        } => {
            if content.trim().is_empty() {
                debug!(connection_id = %connection.id, "ignoring empty message");
                return;
            }
            // Senders must hold a subscription to the channel they post into
            if !state
                .registry
                .subscriptions()
                .is_subscribed(&connection.id, &bunch_id, &channel_id)
            {
                connection.send_frame(&ServerFrame::error(NOT_SUBSCRIBED));
                return;
            }
            match state
                .store
                .create_message(&connection.identity, &bunch_id, &channel_id, content)
                .await
            {
                Ok(message) => {
                    counter!("messages_created_total").increment(1);
                    let event = DomainEvent::MessageCreated {
                        bunch_id,
                        channel_id,
                        message,
                    };
                    publish(state, event).await;
                }
                Err(err) => {
                    connection.send_frame(&ServerFrame::error(err.to_string()));
                }
            }
        }

        ClientFrame::ReactionToggle {
            bunch_id,
            channel_id,
            message_id,
            emoji,
        } => {
            match state
                .store
                .toggle_reaction(&connection.identity, &bunch_id, &message_id, emoji)
                .await
            {
                Ok(outcome) => {
                    counter!("reactions_toggled_total").increment(1);
                    let event = match outcome {
                        ReactionToggle::Added(reaction) => DomainEvent::ReactionAdded {
                            bunch_id,
                            channel_id,
                            reaction,
                        },
                        ReactionToggle::Removed(reaction) => DomainEvent::ReactionRemoved {
                            bunch_id,
                            channel_id,
                            reaction,
                        },
                    };
                    publish(state, event).await;
                }
                Err(err) => {
                    connection.send_frame(&ServerFrame::error(err.to_string()));
                }
            }
        }
    }
}

/// Hand an event to the dispatcher task.
async fn publish(state: &AppState, event: DomainEvent) {
    if state.events.send(event).await.is_err() {
        warn!("event channel closed, dropping event");
    }
}
