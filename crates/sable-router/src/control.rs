//! Client control types
//!
//! Typed counterparts of the client control protocol: signed session
//! configs, session and message status codes, and host lookups. The wire
//! encoding of these messages is handled elsewhere.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use derive_more::Display;
use sable_core::{Destination, IdentHash};
use sable_crypto::{CryptoResult, SigningKeyPair, verify_signature};
use sable_session::ClientState;
use serde::{Deserialize, Serialize};

/// Router-assigned id of a client session
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[display("s{_0}")]
pub struct SessionId(pub u16);

/// What a client asks for when creating a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfigBody {
    pub destination: Destination,
    pub options: BTreeMap<String, String>,
    pub date: DateTime<Utc>,
}

impl SessionConfigBody {
    pub fn new(destination: Destination) -> Self {
        Self {
            destination,
            options: BTreeMap::new(),
            date: Utc::now(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    fn signable_bytes(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }
}

/// A session config signed by the destination's signing key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedSessionConfig {
    pub body: SessionConfigBody,
    pub signature: Vec<u8>,
}

impl SignedSessionConfig {
    pub fn sign(body: SessionConfigBody, key: &SigningKeyPair) -> Result<Self, postcard::Error> {
        let signature = key.sign(&body.signable_bytes()?);
        Ok(Self { body, signature })
    }

    /// Check the signature against the destination's own signing key
    pub fn verify(&self) -> CryptoResult<()> {
        let bytes = self
            .body
            .signable_bytes()
            .map_err(|_| sable_crypto::CryptoError::SignatureVerificationFailed)?;
        verify_signature(&self.body.destination.signing_key, &bytes, &self.signature)
    }

    pub fn ident_hash(&self) -> IdentHash {
        self.body.destination.ident_hash()
    }
}

/// Outcome of a session control request
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionStatus {
    Created,
    Updated,
    Destroyed,
    /// The request failed validation
    Invalid,
    /// The router will not host the session
    Refused,
}

/// Delivery status reported for a send
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageStatus {
    /// The message left through a tunnel
    GuaranteedSuccess,
    /// Buffered until the session has tunnels
    NoLocalTunnels,
    /// Buffered until the remote lease set is known
    NoLeaseSet,
}

impl From<ClientState> for MessageStatus {
    fn from(state: ClientState) -> Self {
        match state {
            ClientState::NoTunnels => MessageStatus::NoLocalTunnels,
            ClientState::NoLeases => MessageStatus::NoLeaseSet,
            ClientState::Established => MessageStatus::GuaranteedSuccess,
        }
    }
}

/// What a host lookup names
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HostLookup {
    Hash(IdentHash),
    /// A hex identity hash, optionally with a `.sable` suffix
    Name(String),
}

impl HostLookup {
    /// The identity hash looked up, if the name parses
    pub fn ident_hash(&self) -> Option<IdentHash> {
        match self {
            HostLookup::Hash(hash) => Some(*hash),
            HostLookup::Name(name) => IdentHash::from_host_name(name).ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use sable_crypto::DestinationKeys;

    use super::*;

    #[test]
    fn test_signed_config_verifies() {
        let keys = DestinationKeys::generate();
        let body = SessionConfigBody::new(keys.destination()).with_option("inbound.quantity", "3");
        let signed = SignedSessionConfig::sign(body, &keys.signing).unwrap();
        assert!(signed.verify().is_ok());
        assert_eq!(signed.ident_hash(), keys.ident_hash());
    }

    #[test]
    fn test_tampered_config_fails() {
        let keys = DestinationKeys::generate();
        let body = SessionConfigBody::new(keys.destination());
        let mut signed = SignedSessionConfig::sign(body, &keys.signing).unwrap();
        signed.body.options.insert("outbound.quantity".into(), "9".into());
        assert!(signed.verify().is_err());

        // Signed by a key other than the destination's
        let other = SigningKeyPair::generate();
        let forged = SignedSessionConfig::sign(SessionConfigBody::new(keys.destination()), &other).unwrap();
        assert!(forged.verify().is_err());
    }

    #[test]
    fn test_message_status_from_state() {
        assert_eq!(MessageStatus::from(ClientState::NoTunnels), MessageStatus::NoLocalTunnels);
        assert_eq!(MessageStatus::from(ClientState::NoLeases), MessageStatus::NoLeaseSet);
        assert_eq!(
            MessageStatus::from(ClientState::Established),
            MessageStatus::GuaranteedSuccess
        );
    }

    #[test]
    fn test_host_names() {
        let hash = IdentHash::new([0xab; 32]);
        assert_eq!(HostLookup::Hash(hash).ident_hash(), Some(hash));
        assert_eq!(HostLookup::Name(hash.to_hex()).ident_hash(), Some(hash));
        assert_eq!(
            HostLookup::Name(format!("{}.sable", hash.to_hex().to_uppercase())).ident_hash(),
            Some(hash)
        );
        assert_eq!(HostLookup::Name("example.sable".into()).ident_hash(), None);
        assert_eq!(SessionId(7).to_string(), "s7");
    }
}
