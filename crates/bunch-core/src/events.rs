//! Domain events produced by chat mutations and consumed by the dispatcher.
//!
//! Every event is scoped to a `(bunch_id, channel_id)` pair and carries a
//! stable identity. Delivery is at-least-once per subscriber; clients dedup
//! on the identity, so it must not change across redeliveries.

use serde::{Deserialize, Serialize};

use crate::ids::{BunchId, ChannelId};
use crate::model::{Message, Reaction};

/// A chat mutation to fan out to channel subscribers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DomainEvent {
    /// A new message was persisted.
    MessageCreated {
        /// Bunch scope.
        bunch_id: BunchId,
        /// Channel scope.
        channel_id: ChannelId,
        /// The persisted message.
        message: Message,
    },
    /// A reaction was added to a message.
    ReactionAdded {
        /// Bunch scope.
        bunch_id: BunchId,
        /// Channel scope.
        channel_id: ChannelId,
        /// The created reaction.
        reaction: Reaction,
    },
    /// A reaction was removed from a message.
    ReactionRemoved {
        /// Bunch scope.
        bunch_id: BunchId,
        /// Channel scope.
        channel_id: ChannelId,
        /// The removed reaction (as it existed before removal).
        reaction: Reaction,
    },
}

/// Stable identity of a delivered event, used by clients to make
/// at-least-once delivery idempotent.
///
/// Messages are identified by their ID alone. Reaction events compose the
/// event kind with the full `(reaction, message, emoji, user)` tuple so an
/// add and a later remove of the same reaction are distinct identities.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EventIdentity {
    /// Identity of a `MessageCreated` event.
    Message(String),
    /// Identity of a reaction add/remove event.
    Reaction {
        /// `"reaction.new"` or `"reaction.delete"`.
        kind: &'static str,
        /// Reaction ID.
        reaction_id: String,
        /// Message the reaction targets.
        message_id: String,
        /// Emoji.
        emoji: String,
        /// Reacting user.
        user_id: String,
    },
}

impl DomainEvent {
    /// The `(bunch, channel)` pair this event is scoped to.
    pub fn channel_key(&self) -> (&BunchId, &ChannelId) {
        match self {
            Self::MessageCreated {
                bunch_id,
                channel_id,
                ..
            }
            | Self::ReactionAdded {
                bunch_id,
                channel_id,
                ..
            }
            | Self::ReactionRemoved {
                bunch_id,
                channel_id,
                ..
            } => (bunch_id, channel_id),
        }
    }

    /// Stable dedup identity for this event.
    pub fn identity(&self) -> EventIdentity {
        match self {
            Self::MessageCreated { message, .. } => {
                EventIdentity::Message(message.id.to_string())
            }
            Self::ReactionAdded { reaction, .. } => reaction_identity("reaction.new", reaction),
            Self::ReactionRemoved { reaction, .. } => {
                reaction_identity("reaction.delete", reaction)
            }
        }
    }
}

fn reaction_identity(kind: &'static str, reaction: &Reaction) -> EventIdentity {
    EventIdentity::Reaction {
        kind,
        reaction_id: reaction.id.to_string(),
        message_id: reaction.message_id.to_string(),
        emoji: reaction.emoji.clone(),
        user_id: reaction.user.id.to_string(),
    }
}
