//! Typed frame unions for the WebSocket protocol.
//!
//! Both directions use a `type` tag with snake_case payload fields, matching
//! the web client. Inbound frames that fail to parse are protocol errors;
//! the connection replies with an `error` frame and stays open.

use bunch_core::ids::{BunchId, ChannelId, ConnectionId, MessageId};
use bunch_core::{DomainEvent, Message, Reaction};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Frames the client sends, the server receives.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    /// Client-side liveness probe; the server replies with `pong`.
    #[serde(rename = "ping")]
    Ping {
        /// Client clock at send time (ms since epoch), echoed back.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },
    /// Add a channel subscription.
    #[serde(rename = "subscribe")]
    Subscribe {
        /// Bunch scope.
        bunch_id: BunchId,
        /// Channel scope.
        channel_id: ChannelId,
    },
    /// Remove a channel subscription.
    #[serde(rename = "unsubscribe")]
    Unsubscribe {
        /// Bunch scope.
        bunch_id: BunchId,
        /// Channel scope.
        channel_id: ChannelId,
    },
    /// Create a message, then fan it out to subscribers.
    #[serde(rename = "message.new")]
    MessageNew {
        /// Bunch scope.
        bunch_id: BunchId,
        /// Channel scope.
        channel_id: ChannelId,
        /// Message body.
        content: String,
    },
    /// Toggle the caller's reaction on a message, then fan out the result.
    #[serde(rename = "reaction.toggle")]
    ReactionToggle {
        /// Bunch scope.
        bunch_id: BunchId,
        /// Channel scope.
        channel_id: ChannelId,
        /// Target message.
        message_id: MessageId,
        /// The emoji to toggle.
        emoji: String,
    },
}

/// Frames the server sends, the client receives.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    /// Reply to a client `ping`.
    #[serde(rename = "pong")]
    Pong {
        /// The client timestamp being echoed (server clock if absent).
        timestamp: i64,
        /// Server clock at reply time (ms since epoch).
        server_time: i64,
    },
    /// Handshake acknowledgement once the connection is authenticated.
    #[serde(rename = "connection_established")]
    ConnectionEstablished {
        /// The durable connection ID the client presented.
        connection_id: ConnectionId,
        /// Server clock (ms since epoch).
        server_time: i64,
    },
    /// Subscription acknowledgement (sent even for duplicate subscribes).
    #[serde(rename = "subscribed")]
    Subscribed {
        /// Bunch scope.
        bunch_id: BunchId,
        /// Channel scope.
        channel_id: ChannelId,
    },
    /// Unsubscription acknowledgement.
    #[serde(rename = "unsubscribed")]
    Unsubscribed {
        /// Bunch scope.
        bunch_id: BunchId,
        /// Channel scope.
        channel_id: ChannelId,
    },
    /// A new chat message in a subscribed channel.
    #[serde(rename = "chat.message")]
    ChatMessage {
        /// The message.
        message: Message,
    },
    /// A reaction was added in a subscribed channel.
    #[serde(rename = "reaction.new")]
    ReactionNew {
        /// The reaction.
        reaction: Reaction,
    },
    /// A reaction was removed in a subscribed channel.
    #[serde(rename = "reaction.delete")]
    ReactionDelete {
        /// The removed reaction.
        reaction: Reaction,
    },
    /// Request-scoped error; the connection stays open.
    #[serde(rename = "error")]
    Error {
        /// Human-readable description.
        message: String,
    },
}

impl ServerFrame {
    /// Current server clock in ms since epoch.
    pub fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    /// Build the outbound frame for a dispatched domain event.
    pub fn from_event(event: &DomainEvent) -> Self {
        match event {
            DomainEvent::MessageCreated { message, .. } => Self::ChatMessage {
                message: message.clone(),
            },
            DomainEvent::ReactionAdded { reaction, .. } => Self::ReactionNew {
                reaction: reaction.clone(),
            },
            DomainEvent::ReactionRemoved { reaction, .. } => Self::ReactionDelete {
                reaction: reaction.clone(),
            },
        }
    }

    /// Build an `error` frame.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}
