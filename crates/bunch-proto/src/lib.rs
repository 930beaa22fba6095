//! # bunch-proto
//!
//! JSON wire protocol spoken over the persistent WebSocket transport.
//!
//! - `ClientFrame` / `ServerFrame`: tagged unions matching the web client's
//!   message types (`subscribe`, `chat.message`, `reaction.toggle`, ...)
//! - Close codes, including the reserved 4001–4005 auth range that tells
//!   the client's backoff controller not to reconnect

#![deny(unsafe_code)]

pub mod close;
pub mod frames;

pub use close::CloseCode;
pub use frames::{ClientFrame, ServerFrame};
