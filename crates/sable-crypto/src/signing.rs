//! ed25519 signatures over records

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use zeroize::Zeroize;

use crate::error::{CryptoError, CryptoResult};

/// Length of an ed25519 signature
pub const SIGNATURE_LEN: usize = 64;

/// ed25519 signing key of a router or destination
#[derive(Clone)]
pub struct SigningKeyPair {
    signing_key: SigningKey,
}

impl SigningKeyPair {
    /// Generate a random key pair
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        rand::rng().fill_bytes(&mut seed);
        let pair = Self::from_seed(seed);
        seed.zeroize();
        pair
    }

    /// Create from a 32-byte secret seed
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&seed),
        }
    }

    /// Public verifying key bytes
    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signing_key.sign(message).to_bytes().to_vec()
    }
}

impl std::fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeyPair")
            .field("public_key", &hex_prefix(&self.public_key()))
            .finish()
    }
}

fn hex_prefix(bytes: &[u8; 32]) -> String {
    bytes[..4].iter().map(|b| format!("{b:02x}")).collect()
}

/// Verify `signature` over `message` with a raw ed25519 public key
pub fn verify_signature(public_key: &[u8; 32], message: &[u8], signature: &[u8]) -> CryptoResult<()> {
    let verifying_key =
        VerifyingKey::from_bytes(public_key).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    let signature =
        Signature::from_slice(signature).map_err(|_| CryptoError::SignatureVerificationFailed)?;
    verifying_key
        .verify(message, &signature)
        .map_err(|_| CryptoError::SignatureVerificationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify() {
        let pair = SigningKeyPair::generate();
        let signature = pair.sign(b"record body");
        assert_eq!(signature.len(), SIGNATURE_LEN);
        assert!(verify_signature(&pair.public_key(), b"record body", &signature).is_ok());
    }

    #[test]
    fn test_tampered_message_fails() {
        let pair = SigningKeyPair::generate();
        let signature = pair.sign(b"record body");
        assert!(matches!(
            verify_signature(&pair.public_key(), b"record bodY", &signature),
            Err(CryptoError::SignatureVerificationFailed)
        ));
    }

    #[test]
    fn test_truncated_signature_fails() {
        let pair = SigningKeyPair::generate();
        let signature = pair.sign(b"x");
        assert!(verify_signature(&pair.public_key(), b"x", &signature[..10]).is_err());
    }

    #[test]
    fn test_seed_is_deterministic() {
        let a = SigningKeyPair::from_seed([5; 32]);
        let b = SigningKeyPair::from_seed([5; 32]);
        assert_eq!(a.public_key(), b.public_key());
        assert_eq!(a.sign(b"m"), b.sign(b"m"));
    }
}
