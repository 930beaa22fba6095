//! # bunch-server
//!
//! Axum HTTP + `WebSocket` realtime gateway for bunch chat.
//!
//! - `/ws` handshake: token + durable connection ID in the query string
//! - Connection registry with newest-wins supersession (close code 4006)
//! - Channel subscription table with idempotent subscribe/unsubscribe
//! - Single-task event dispatcher preserving per-channel order
//! - Heartbeat eviction of silent clients (ping 15s, pong timeout 20s)
//! - Storage and auth behind `ChatStore` / `TokenVerifier` traits
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod auth;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod handler;
pub mod health;
pub mod heartbeat;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod store;
pub mod subscriptions;

pub use auth::{AuthError, Identity, StaticTokenVerifier, TokenVerifier};
pub use config::ServerConfig;
pub use connection::{ConnectionHandle, ConnectionState};
pub use dispatch::EventDispatcher;
pub use registry::ConnectionRegistry;
pub use server::{AppState, GatewayServer};
pub use store::{ChatStore, MemoryChatStore, ReactionToggle, StoreError};
pub use subscriptions::SubscriptionTable;
