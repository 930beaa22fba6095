//! Chat persistence behind the gateway.
//!
//! The session loop talks to storage through the `ChatStore` trait so the
//! gateway itself stays transport-only. `MemoryChatStore` backs tests and
//! single-node deployments.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bunch_core::ids::{BunchId, ChannelId, MessageId, ReactionId, UserId};
use bunch_core::model::{Message, MessageAuthor, Reaction, UserRef};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use thiserror::Error;
use uuid::Uuid;

use crate::auth::Identity;

/// Storage failures surfaced to the session loop as `error` frames.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The bunch does not exist.
    #[error("bunch not found")]
    BunchNotFound,
    /// The channel does not exist in the bunch.
    #[error("channel not found")]
    ChannelNotFound,
    /// The target message does not exist.
    #[error("message not found")]
    MessageNotFound,
    /// The caller has no membership in the bunch.
    #[error("not a member of this bunch")]
    NotAMember,
    /// Backend failure.
    #[error("storage error: {0}")]
    Internal(String),
}

/// Outcome of a reaction toggle.
#[derive(Clone, Debug, PartialEq)]
pub enum ReactionToggle {
    /// The reaction did not exist and was created.
    Added(Reaction),
    /// The reaction existed and was removed.
    Removed(Reaction),
}

/// Persistence operations the gateway needs.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Whether `user` holds a membership in `bunch`.
    async fn is_member(&self, user: &UserId, bunch: &BunchId) -> Result<bool, StoreError>;

    /// Persist a new message authored by `identity` and return it in full
    /// (IDs, author record, timestamps) for fan-out.
    async fn create_message(
        &self,
        identity: &Identity,
        bunch: &BunchId,
        channel: &ChannelId,
        content: String,
    ) -> Result<Message, StoreError>;

    /// Toggle `identity`'s reaction with `emoji` on `message`: create it if
    /// the (message, emoji, user) triple is absent, remove it if present.
    async fn toggle_reaction(
        &self,
        identity: &Identity,
        bunch: &BunchId,
        message: &MessageId,
        emoji: String,
    ) -> Result<ReactionToggle, StoreError>;
}

#[derive(Clone)]
struct Membership {
    membership_id: String,
    role: String,
    joined_at: DateTime<Utc>,
}

#[derive(Default)]
struct BunchRecord {
    members: HashMap<UserId, Membership>,
    channels: HashMap<ChannelId, Vec<MessageId>>,
}

#[derive(Default)]
struct StoreInner {
    bunches: HashMap<BunchId, BunchRecord>,
    messages: HashMap<MessageId, Message>,
    reactions: HashMap<MessageId, Vec<Reaction>>,
    usernames: HashMap<UserId, String>,
}

/// In-memory `ChatStore`.
#[derive(Default)]
pub struct MemoryChatStore {
    inner: RwLock<StoreInner>,
}

impl MemoryChatStore {
    /// Create an empty store.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a bunch.
    pub fn add_bunch(&self, bunch: &BunchId) {
        self.inner.write().bunches.entry(bunch.clone()).or_default();
    }

    /// Create a channel inside a bunch.
    pub fn add_channel(&self, bunch: &BunchId, channel: &ChannelId) {
        self.inner
            .write()
            .bunches
            .entry(bunch.clone())
            .or_default()
            .channels
            .entry(channel.clone())
            .or_default();
    }

    /// Add `user` as a member of `bunch` with the given role.
    pub fn add_member(&self, bunch: &BunchId, user: &UserRef, role: &str) {
        let mut inner = self.inner.write();
        inner
            .usernames
            .insert(user.id.clone(), user.username.clone());
        inner
            .bunches
            .entry(bunch.clone())
            .or_default()
            .members
            .insert(
                user.id.clone(),
                Membership {
                    membership_id: Uuid::now_v7().to_string(),
                    role: role.to_string(),
                    joined_at: Utc::now(),
                },
            );
    }

    /// Number of messages stored for a channel.
    pub fn message_count(&self, bunch: &BunchId, channel: &ChannelId) -> usize {
        self.inner
            .read()
            .bunches
            .get(bunch)
            .and_then(|b| b.channels.get(channel))
            .map_or(0, Vec::len)
    }

    /// All reactions currently on a message.
    pub fn reactions_on(&self, message: &MessageId) -> Vec<Reaction> {
        self.inner
            .read()
            .reactions
            .get(message)
            .cloned()
            .unwrap_or_default()
    }

    fn author_for(
        inner: &StoreInner,
        identity: &Identity,
        bunch: &BunchId,
    ) -> Result<MessageAuthor, StoreError> {
        let record = inner.bunches.get(bunch).ok_or(StoreError::BunchNotFound)?;
        let membership = record
            .members
            .get(&identity.user_id)
            .ok_or(StoreError::NotAMember)?;
        Ok(MessageAuthor {
            id: membership.membership_id.clone(),
            bunch: bunch.clone(),
            user: UserRef {
                id: identity.user_id.clone(),
                username: identity.username.clone(),
            },
            role: membership.role.clone(),
            joined_at: membership.joined_at,
        })
    }
}

#[async_trait]
impl ChatStore for MemoryChatStore {
    async fn is_member(&self, user: &UserId, bunch: &BunchId) -> Result<bool, StoreError> {
        let inner = self.inner.read();
        let record = inner.bunches.get(bunch).ok_or(StoreError::BunchNotFound)?;
        Ok(record.members.contains_key(user))
    }

    async fn create_message(
        &self,
        identity: &Identity,
        bunch: &BunchId,
        channel: &ChannelId,
        content: String,
    ) -> Result<Message, StoreError> {
        let mut inner = self.inner.write();
        let author = Self::author_for(&inner, identity, bunch)?;
        let record = inner
            .bunches
            .get_mut(bunch)
            .ok_or(StoreError::BunchNotFound)?;
        let messages = record
            .channels
            .get_mut(channel)
            .ok_or(StoreError::ChannelNotFound)?;

        let now = Utc::now();
        let message = Message {
            id: MessageId::new(),
            channel: channel.clone(),
            author,
            content,
            created_at: now,
            updated_at: now,
            edit_count: 0,
            deleted: false,
            deleted_at: None,
        };
        messages.push(message.id.clone());
        inner.messages.insert(message.id.clone(), message.clone());
        Ok(message)
    }

    async fn toggle_reaction(
        &self,
        identity: &Identity,
        bunch: &BunchId,
        message: &MessageId,
        emoji: String,
    ) -> Result<ReactionToggle, StoreError> {
        let mut inner = self.inner.write();
        let record = inner.bunches.get(bunch).ok_or(StoreError::BunchNotFound)?;
        if !record.members.contains_key(&identity.user_id) {
            return Err(StoreError::NotAMember);
        }
        if !inner.messages.contains_key(message) {
            return Err(StoreError::MessageNotFound);
        }

        let reactions = inner.reactions.entry(message.clone()).or_default();
        let existing = reactions
            .iter()
            .position(|r| r.emoji == emoji && r.user.id == identity.user_id);
        match existing {
            Some(idx) => Ok(ReactionToggle::Removed(reactions.remove(idx))),
            None => {
                let reaction = Reaction {
                    id: ReactionId::new(),
                    message_id: message.clone(),
                    user: UserRef {
                        id: identity.user_id.clone(),
                        username: identity.username.clone(),
                    },
                    emoji,
                    created_at: Utc::now(),
                };
                reactions.push(reaction.clone());
                Ok(ReactionToggle::Added(reaction))
            }
        }
    }
}
