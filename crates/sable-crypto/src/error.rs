//! Error types for sable-crypto

use sable_core::ValidationError;
use thiserror::Error;

/// Errors that can occur during cryptographic operations
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Signature verification failed")]
    SignatureVerificationFailed,

    #[error("Signing key does not match the record's public key")]
    KeyMismatch,

    #[error("Invalid record: {0}")]
    InvalidRecord(#[from] ValidationError),
}

/// Result type for crypto operations
pub type CryptoResult<T> = Result<T, CryptoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crypto_error_display() {
        let err = CryptoError::DecryptionFailed("corrupt ciphertext".to_string());
        assert!(format!("{}", err).contains("Decryption failed"));
        assert!(format!("{}", err).contains("corrupt ciphertext"));

        let err = CryptoError::from(ValidationError::EmptyLeaseSet);
        assert!(format!("{}", err).contains("no leases"));
    }
}
