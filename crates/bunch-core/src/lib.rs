//! # bunch-core
//!
//! Domain model shared by the gateway server and client crates.
//!
//! - **Branded IDs**: `ConnectionId`, `BunchId`, `ChannelId`, `MessageId`,
//!   `UserId` as newtypes for type safety
//! - **Chat entities**: `Message`, `Reaction` in the wire shape the
//!   storage collaborator produces
//! - **Domain events**: `DomainEvent` with stable per-event identities
//!   used for client-side deduplication

#![deny(unsafe_code)]

pub mod events;
pub mod ids;
pub mod model;

pub use events::{DomainEvent, EventIdentity};
pub use ids::{BunchId, ChannelId, ConnectionId, MessageId, ReactionId, UserId};
pub use model::{Message, MessageAuthor, Reaction, UserRef};
