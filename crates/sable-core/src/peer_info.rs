//! Router records
//!
//! A [`PeerInfo`] is the signed self-description a router publishes: its
//! public keys, a publication timestamp, capability options, and the
//! addresses it can be reached at. Records are immutable once built and are
//! replaced wholesale when a router publishes a newer one.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ValidationError, ValidationResult};
use crate::identity::IdentHash;

/// Option key holding the capability letters
pub const CAPS_OPTION: &str = "caps";

/// Capability letter advertising floodfill service
pub const FLOODFILL_CAP: char = 'f';

/// Address option holding the host
pub const HOST_OPTION: &str = "host";

/// Address option prefix used by introducer-based (firewalled) addresses
pub const INTRODUCER_OPTION_PREFIX: &str = "ihost";

/// Transport style of an address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportStyle {
    /// Stream transport
    Ntcp,
    /// Datagram transport
    Ssu,
    /// Anything this router does not speak
    Other(String),
}

impl TransportStyle {
    /// Whether this router can use the transport
    pub fn is_recognized(&self) -> bool {
        matches!(self, TransportStyle::Ntcp | TransportStyle::Ssu)
    }
}

/// One reachable address of a router
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerAddress {
    pub style: TransportStyle,
    pub cost: u8,
    pub options: BTreeMap<String, String>,
}

impl PeerAddress {
    /// Create an address with a host and port
    pub fn new(style: TransportStyle, host: impl Into<String>, port: u16) -> Self {
        let mut options = BTreeMap::new();
        options.insert(HOST_OPTION.to_string(), host.into());
        options.insert("port".to_string(), port.to_string());
        Self {
            style,
            cost: 10,
            options,
        }
    }

    /// Add an option
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// The host option, if present
    pub fn host(&self) -> Option<&str> {
        self.options.get(HOST_OPTION).map(String::as_str)
    }

    /// Whether the host looks like an IPv4 address or name
    pub fn has_ipv4_host(&self) -> bool {
        self.host().is_some_and(|h| h.contains('.'))
    }

    /// Whether the address is reached through introducers
    pub fn has_introducers(&self) -> bool {
        self.options
            .keys()
            .any(|k| k.starts_with(INTRODUCER_OPTION_PREFIX))
    }
}

/// Public keys of a router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterIdentity {
    /// ed25519 verifying key
    pub signing_key: [u8; 32],
    /// x25519 public key
    pub encryption_key: [u8; 32],
}

impl RouterIdentity {
    pub fn ident_hash(&self) -> IdentHash {
        IdentHash::digest(&[&self.signing_key, &self.encryption_key])
    }
}

/// Signed router record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub identity: RouterIdentity,
    pub published: DateTime<Utc>,
    pub options: BTreeMap<String, String>,
    pub addresses: Vec<PeerAddress>,
    pub signature: Vec<u8>,
}

#[derive(Serialize)]
struct PeerInfoBody<'a> {
    identity: &'a RouterIdentity,
    published: &'a DateTime<Utc>,
    options: &'a BTreeMap<String, String>,
    addresses: &'a [PeerAddress],
}

impl PeerInfo {
    /// Create a record that still has to be signed
    pub fn unsigned(
        identity: RouterIdentity,
        published: DateTime<Utc>,
        options: BTreeMap<String, String>,
        addresses: Vec<PeerAddress>,
    ) -> Self {
        Self {
            identity,
            published,
            options,
            addresses,
            signature: Vec::new(),
        }
    }

    /// Attach a signature
    pub fn with_signature(mut self, signature: Vec<u8>) -> Self {
        self.signature = signature;
        self
    }

    pub fn ident_hash(&self) -> IdentHash {
        self.identity.ident_hash()
    }

    /// Canonical bytes covered by the signature
    pub fn signable_bytes(&self) -> ValidationResult<Vec<u8>> {
        let body = PeerInfoBody {
            identity: &self.identity,
            published: &self.published,
            options: &self.options,
            addresses: &self.addresses,
        };
        postcard::to_allocvec(&body).map_err(|e| ValidationError::Encoding(e.to_string()))
    }

    /// Capability letters, if advertised
    pub fn caps(&self) -> Option<&str> {
        self.options.get(CAPS_OPTION).map(String::as_str)
    }

    pub fn is_floodfill(&self) -> bool {
        self.caps().is_some_and(|c| c.contains(FLOODFILL_CAP))
    }

    /// Whether any address carries a host
    pub fn has_host(&self) -> bool {
        self.addresses.iter().any(|a| a.host().is_some())
    }

    /// Whether the router is only reachable through introducers
    pub fn is_firewalled(&self) -> bool {
        self.addresses.iter().any(PeerAddress::has_introducers)
    }

    /// Structural checks applied before any signature work
    pub fn validate_structure(&self, use_ipv6: bool) -> ValidationResult<()> {
        if self.caps().is_none() {
            return Err(ValidationError::MissingCapabilities);
        }
        if !self.addresses.iter().any(|a| a.style.is_recognized()) {
            return Err(ValidationError::NoUsableAddress);
        }
        if !use_ipv6 && !self.addresses.iter().any(PeerAddress::has_ipv4_host) {
            return Err(ValidationError::NoIpv4Address);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> RouterIdentity {
        RouterIdentity {
            signing_key: [1; 32],
            encryption_key: [2; 32],
        }
    }

    fn record(caps: Option<&str>, addresses: Vec<PeerAddress>) -> PeerInfo {
        let mut options = BTreeMap::new();
        if let Some(caps) = caps {
            options.insert(CAPS_OPTION.to_string(), caps.to_string());
        }
        PeerInfo::unsigned(identity(), Utc::now(), options, addresses)
    }

    #[test]
    fn test_floodfill_flag() {
        let addr = PeerAddress::new(TransportStyle::Ntcp, "10.0.0.1", 7654);
        assert!(record(Some("fR"), vec![addr.clone()]).is_floodfill());
        assert!(!record(Some("LR"), vec![addr]).is_floodfill());
    }

    #[test]
    fn test_structure_requires_caps() {
        let addr = PeerAddress::new(TransportStyle::Ntcp, "10.0.0.1", 7654);
        let info = record(None, vec![addr]);
        assert_eq!(
            info.validate_structure(false),
            Err(ValidationError::MissingCapabilities)
        );
    }

    #[test]
    fn test_structure_requires_recognized_transport() {
        let addr = PeerAddress::new(TransportStyle::Other("XYZ".into()), "10.0.0.1", 1);
        let info = record(Some("R"), vec![addr]);
        assert_eq!(
            info.validate_structure(true),
            Err(ValidationError::NoUsableAddress)
        );
    }

    #[test]
    fn test_structure_requires_ipv4_without_ipv6() {
        let addr = PeerAddress::new(TransportStyle::Ssu, "fe80::1", 1);
        let info = record(Some("R"), vec![addr]);
        assert_eq!(
            info.validate_structure(false),
            Err(ValidationError::NoIpv4Address)
        );
        assert!(info.validate_structure(true).is_ok());
    }

    #[test]
    fn test_firewalled_from_introducers() {
        let addr = PeerAddress::new(TransportStyle::Ssu, "10.0.0.2", 1).with_option("ihost0", "1.2.3.4");
        assert!(record(Some("R"), vec![addr]).is_firewalled());
    }

    #[test]
    fn test_signable_bytes_exclude_signature() {
        let addr = PeerAddress::new(TransportStyle::Ntcp, "10.0.0.1", 7654);
        let info = record(Some("R"), vec![addr]);
        let signed = info.clone().with_signature(vec![9; 64]);
        assert_eq!(info.signable_bytes().unwrap(), signed.signable_bytes().unwrap());
    }
}
