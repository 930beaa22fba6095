//! Token verification at the WebSocket handshake.
//!
//! Verification happens before the connection is registered; a failed token
//! closes the transport with a code in the 4001–4005 range, which the client
//! treats as permanently fatal (no reconnect).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bunch_core::ids::UserId;
use bunch_proto::CloseCode;
use parking_lot::RwLock;
use thiserror::Error;

/// The authenticated principal behind a connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    /// Stable user ID.
    pub user_id: UserId,
    /// Display name.
    pub username: String,
}

/// Why a handshake token was rejected.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The handshake query string carried no `token` parameter.
    #[error("missing auth token")]
    MissingToken,
    /// The token is unknown, malformed, or expired.
    #[error("invalid token")]
    InvalidToken,
    /// The verifier itself failed (backend unreachable, etc.).
    #[error("token verification failed: {0}")]
    Verifier(String),
}

impl AuthError {
    /// The close code this failure maps to.
    pub fn close_code(&self) -> CloseCode {
        match self {
            Self::MissingToken => CloseCode::AuthMissingToken,
            Self::InvalidToken => CloseCode::AuthFailed,
            Self::Verifier(_) => CloseCode::AuthError,
        }
    }
}

/// Resolves a bearer token to an identity.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Verify `token` and return the identity it belongs to.
    async fn verify(&self, token: &str) -> Result<Identity, AuthError>;
}

/// In-memory token map, for tests and single-node deployments.
#[derive(Default)]
pub struct StaticTokenVerifier {
    tokens: RwLock<HashMap<String, Identity>>,
}

impl StaticTokenVerifier {
    /// Create an empty verifier.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a token for an identity.
    pub fn insert(&self, token: impl Into<String>, identity: Identity) {
        let _ = self.tokens.write().insert(token.into(), identity);
    }

    /// Remove a token (e.g. on logout).
    pub fn revoke(&self, token: &str) -> bool {
        self.tokens.write().remove(token).is_some()
    }
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        self.tokens
            .read()
            .get(token)
            .cloned()
            .ok_or(AuthError::InvalidToken)
    }
}
