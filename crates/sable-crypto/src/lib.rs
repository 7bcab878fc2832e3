//! # Sable Crypto
//!
//! Cryptographic primitives for the Sable overlay router.
//!
//! ## Features
//!
//! - **Record signatures**: ed25519 signing and verification of peer infos,
//!   lease sets, and client session configs
//! - **Garlic encryption**: x25519 key agreement with an ephemeral sender key,
//!   BLAKE3 key derivation, and ChaCha20-Poly1305 sealing of garlic payloads
//! - **Key bundles**: router and destination key pairs
//!
//! ## Example
//!
//! ```ignore
//! use sable_crypto::{DestinationKeys, encrypt_garlic};
//!
//! let keys = DestinationKeys::generate();
//! let sealed = encrypt_garlic(&keys.encryption.public_key(), &garlic)?;
//! let opened = keys.encryption.decrypt(&sealed)?;
//! ```

pub mod error;
pub mod garlic;
pub mod keys;
pub mod records;
pub mod signing;

pub use error::{CryptoError, CryptoResult};
pub use garlic::{GarlicKey, encrypt_garlic};
pub use keys::{DestinationKeys, RouterKeys};
pub use records::{sign_lease_set, sign_peer_info, verify_lease_set, verify_peer_info};
pub use signing::{SigningKeyPair, verify_signature};
