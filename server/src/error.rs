//! Failures handled locally by the hub.
//!
//! None of these ever reach the transport: each one is logged and, where the
//! client should know, turned into an `error` event for the offending
//! connection only.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventError {
    #[error("invalid message format: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("message too large: {0} bytes")]
    TooLarge(usize),
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("identity rejected: {0}")]
    Unauthorized(#[from] IdentityError),
    #[error("connection has no registered identity")]
    Unregistered,
}

impl EventError {
    /// Stable machine-readable kind sent on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            EventError::Malformed(_) => "malformed",
            EventError::TooLarge(_) => "too-large",
            EventError::RateLimited => "rate-limited",
            EventError::Unauthorized(_) => "unauthorized",
            EventError::Unregistered => "unregistered",
        }
    }

    /// Human-readable text for the client. Never echoes parser or token details.
    pub fn client_message(&self) -> &'static str {
        match self {
            EventError::Malformed(_) => "Invalid message format",
            EventError::TooLarge(_) => "Message too large",
            EventError::RateLimited => "Rate limit exceeded",
            EventError::Unauthorized(_) => "Authentication failed",
            EventError::Unregistered => "Register an identity first",
        }
    }
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
    #[error("a signed token is required")]
    TokenRequired,
    #[error("verification is disabled, expected a bare identity")]
    VerificationDisabled,
    #[error("empty identity")]
    EmptyIdentity,
}
