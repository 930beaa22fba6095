//! # bunch-client
//!
//! Transport-agnostic client-side session logic for the bunch gateway:
//!
//! - `Backoff`: reconnect delays (`1s × 1.5^attempt`, capped at 30s)
//! - `ReconnectionController`: close-code policy, persisted connection ID,
//!   and subscription replay after reconnect
//! - `EventDedup`: makes at-least-once event delivery idempotent
//!
//! A real client owns the WebSocket; this crate only decides what to do
//! with its lifecycle signals.

#![deny(unsafe_code)]

pub mod backoff;
pub mod controller;
pub mod dedup;

pub use backoff::Backoff;
pub use controller::{ClientState, Reconnect, ReconnectionController, should_reconnect};
pub use dedup::EventDedup;
