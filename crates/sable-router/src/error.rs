//! Error types for the router

use sable_crypto::CryptoError;
use sable_netdb::DirectoryError;
use sable_session::SessionError;
use sable_storage::StorageError;
use thiserror::Error;

use crate::control::SessionId;

/// Errors that can occur in the router
#[derive(Debug, Error)]
pub enum RouterError {
    /// Directory startup failed; the router cannot run
    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// No session with this id
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    /// The router will not host this destination
    #[error("Session refused for {0}")]
    Refused(String),

    #[error("Router shut down")]
    ShutDown,

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<postcard::Error> for RouterError {
    fn from(e: postcard::Error) -> Self {
        RouterError::Serialization(e.to_string())
    }
}

/// Result type alias for router operations
pub type RouterResult<T> = Result<T, RouterError>;
