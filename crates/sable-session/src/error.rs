//! Error types for destination sessions

use sable_core::{IdentHash, TransportError, ValidationError};
use sable_crypto::CryptoError;
use thiserror::Error;

/// Errors that can occur in a destination session
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session was terminated
    #[error("Session terminated")]
    Terminated,

    /// A record handed to the session was refused
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Encryption or signing failed
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// The tunnel provider refused a send
    #[error("Transport error: {0}")]
    Transport(String),

    /// A clove named a destination other than this session's
    #[error("Clove addressed to {0}")]
    Misaddressed(IdentHash),
}

impl From<CryptoError> for SessionError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::InvalidRecord(v) => SessionError::Validation(v),
            other => SessionError::Crypto(other.to_string()),
        }
    }
}

impl From<TransportError> for SessionError {
    fn from(e: TransportError) -> Self {
        SessionError::Transport(e.to_string())
    }
}

/// Result type alias for session operations
pub type SessionResult<T> = Result<T, SessionError>;
