//! Error types shared across the Sable crates

use thiserror::Error;

/// Errors related to identity hashes
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Invalid identity format: {0}")]
    InvalidFormat(String),

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },
}

/// Reasons a record is refused at the directory boundary
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing capability flags")]
    MissingCapabilities,

    #[error("No address with a recognized transport style")]
    NoUsableAddress,

    #[error("No IPv4 host address while IPv6 is disabled")]
    NoIpv4Address,

    #[error("Signature verification failed")]
    BadSignature,

    #[error("Lease set carries no leases")]
    EmptyLeaseSet,

    #[error("Record belongs to {actual}, expected {expected}")]
    WrongOwner { expected: String, actual: String },

    #[error("Record encoding failed: {0}")]
    Encoding(String),
}

/// Errors related to router-to-router sends
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Peer not reachable: {0}")]
    PeerUnreachable(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Tunnel unavailable: {0}")]
    TunnelUnavailable(String),

    #[error("Transport shut down")]
    Shutdown,
}

/// Errors produced by the external lookup protocol
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("Lookup timed out for {0}")]
    Timeout(String),

    #[error("Negative reply for {0}")]
    NotFound(String),

    #[error("No floodfill peers available")]
    NoFloodfills,
}

/// Result type alias for validation
pub type ValidationResult<T> = Result<T, ValidationError>;
