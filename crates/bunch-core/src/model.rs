//! Chat entities in the wire shape the storage collaborator produces.
//!
//! Field names are snake_case to match the JSON the web client consumes
//! (`message.author.user.username`, `reaction.message_id`, ...).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{BunchId, ChannelId, MessageId, ReactionId, UserId};

/// Minimal user projection embedded in messages and reactions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    /// User ID.
    pub id: UserId,
    /// Display username.
    pub username: String,
}

/// Bunch membership record of a message author.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageAuthor {
    /// Membership ID.
    pub id: String,
    /// Bunch the membership belongs to.
    pub bunch: BunchId,
    /// The member's user.
    pub user: UserRef,
    /// Role within the bunch (e.g. `"member"`, `"admin"`).
    pub role: String,
    /// When the user joined the bunch.
    pub joined_at: DateTime<Utc>,
}

/// A chat message as delivered to subscribers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Message ID.
    pub id: MessageId,
    /// Channel the message was posted in.
    pub channel: ChannelId,
    /// Authoring membership.
    pub author: MessageAuthor,
    /// Message body.
    pub content: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-edit timestamp.
    pub updated_at: DateTime<Utc>,
    /// Number of edits applied.
    pub edit_count: u32,
    /// Soft-delete flag.
    pub deleted: bool,
    /// Soft-delete timestamp, if deleted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// An emoji reaction on a message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    /// Reaction ID.
    pub id: ReactionId,
    /// Message the reaction is attached to.
    pub message_id: MessageId,
    /// Reacting user.
    pub user: UserRef,
    /// The emoji.
    pub emoji: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}
