//! Garlic encryption
//!
//! Senders encrypt to the temporary key advertised in the recipient's lease
//! set. Each message uses a fresh ephemeral x25519 key; the shared secret is
//! run through BLAKE3 key derivation and the garlic is sealed with
//! ChaCha20-Poly1305.

use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, KeyInit},
};
use rand::RngCore;
use sable_core::{Garlic, GarlicMessage};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::{CryptoError, CryptoResult};

/// Nonce size for ChaCha20-Poly1305 (12 bytes)
pub const NONCE_SIZE: usize = 12;

const KDF_CONTEXT: &str = "sable garlic 2024-01 message key";

fn random_secret() -> StaticSecret {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    StaticSecret::from(bytes)
}

fn message_key(shared: &[u8; 32], ephemeral: &[u8; 32], recipient: &[u8; 32]) -> [u8; 32] {
    let mut material = Vec::with_capacity(96);
    material.extend_from_slice(shared);
    material.extend_from_slice(ephemeral);
    material.extend_from_slice(recipient);
    blake3::derive_key(KDF_CONTEXT, &material)
}

/// Temporary x25519 key a destination decrypts garlic with
#[derive(Clone)]
pub struct GarlicKey {
    secret: StaticSecret,
}

impl GarlicKey {
    pub fn generate() -> Self {
        Self {
            secret: random_secret(),
        }
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self {
            secret: StaticSecret::from(bytes),
        }
    }

    pub fn public_key(&self) -> [u8; 32] {
        PublicKey::from(&self.secret).to_bytes()
    }

    /// Open a garlic message addressed to this key
    pub fn decrypt(&self, message: &GarlicMessage) -> CryptoResult<Garlic> {
        let ephemeral = PublicKey::from(message.ephemeral_key);
        let shared = self.secret.diffie_hellman(&ephemeral);
        let key = message_key(shared.as_bytes(), &message.ephemeral_key, &self.public_key());

        let cipher = ChaCha20Poly1305::new_from_slice(&key)
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&message.nonce), message.ciphertext.as_slice())
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?;

        postcard::from_bytes(&plaintext).map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
    }
}

impl std::fmt::Debug for GarlicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GarlicKey").finish_non_exhaustive()
    }
}

/// Seal a garlic for the holder of `recipient`'s private key
pub fn encrypt_garlic(recipient: &[u8; 32], garlic: &Garlic) -> CryptoResult<GarlicMessage> {
    let plaintext =
        postcard::to_allocvec(garlic).map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let ephemeral = random_secret();
    let ephemeral_public = PublicKey::from(&ephemeral).to_bytes();
    let shared = ephemeral.diffie_hellman(&PublicKey::from(*recipient));
    let key = message_key(shared.as_bytes(), &ephemeral_public, recipient);

    let cipher = ChaCha20Poly1305::new_from_slice(&key)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut nonce = [0u8; NONCE_SIZE];
    rand::rng().fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    Ok(GarlicMessage {
        ephemeral_key: ephemeral_public,
        nonce,
        ciphertext,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use sable_core::{CloveDelivery, GarlicClove, IdentHash, RouterMessage};

    fn garlic() -> Garlic {
        Garlic::new(vec![
            GarlicClove::new(
                CloveDelivery::Destination {
                    destination: IdentHash::new([1; 32]),
                },
                RouterMessage::Data(Bytes::from_static(b"hello")),
            ),
            GarlicClove::new(CloveDelivery::Local, RouterMessage::DeliveryStatus { message_id: 9 }),
        ])
    }

    #[test]
    fn test_recipient_can_open() {
        let key = GarlicKey::generate();
        let sealed = encrypt_garlic(&key.public_key(), &garlic()).unwrap();
        assert_eq!(key.decrypt(&sealed).unwrap(), garlic());
    }

    #[test]
    fn test_other_key_cannot_open() {
        let key = GarlicKey::generate();
        let other = GarlicKey::generate();
        let sealed = encrypt_garlic(&key.public_key(), &garlic()).unwrap();
        assert!(matches!(
            other.decrypt(&sealed),
            Err(CryptoError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let key = GarlicKey::generate();
        let mut sealed = encrypt_garlic(&key.public_key(), &garlic()).unwrap();
        sealed.ciphertext[0] ^= 0xff;
        assert!(key.decrypt(&sealed).is_err());
    }

    #[test]
    fn test_each_message_uses_fresh_ephemeral() {
        let key = GarlicKey::generate();
        let a = encrypt_garlic(&key.public_key(), &garlic()).unwrap();
        let b = encrypt_garlic(&key.public_key(), &garlic()).unwrap();
        assert_ne!(a.ephemeral_key, b.ephemeral_key);
        assert_ne!(a.ciphertext, b.ciphertext);
    }
}
