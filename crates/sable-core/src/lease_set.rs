//! Destinations, leases, and lease sets
//!
//! A [`LeaseSet`] is the signed list of inbound tunnel entry points of a
//! destination, plus the temporary key senders encrypt garlic messages to.
//! Signed lease sets are only ever produced from a [`LeaseSetBuilder`] plus a
//! signature, or parsed from the network; both are verified before use.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ValidationError, ValidationResult};
use crate::identity::IdentHash;
use crate::tunnel::TunnelId;

/// Public keys of an anonymous destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination {
    /// ed25519 verifying key
    pub signing_key: [u8; 32],
    /// Long-term x25519 public key
    pub encryption_key: [u8; 32],
}

impl Destination {
    pub fn ident_hash(&self) -> IdentHash {
        IdentHash::digest(&[&self.signing_key, &self.encryption_key])
    }
}

/// One path into a destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Lease {
    pub gateway: IdentHash,
    pub tunnel_id: TunnelId,
    pub expires: DateTime<Utc>,
}

impl Lease {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires <= now
    }
}

#[derive(Serialize)]
struct LeaseSetBody<'a> {
    destination: &'a Destination,
    encryption_key: &'a [u8; 32],
    leases: &'a [Lease],
}

fn body_bytes(
    destination: &Destination,
    encryption_key: &[u8; 32],
    leases: &[Lease],
) -> ValidationResult<Vec<u8>> {
    let body = LeaseSetBody {
        destination,
        encryption_key,
        leases,
    };
    postcard::to_allocvec(&body).map_err(|e| ValidationError::Encoding(e.to_string()))
}

/// Signed lease set of a destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseSet {
    destination: Destination,
    encryption_key: [u8; 32],
    leases: Vec<Lease>,
    signature: Vec<u8>,
}

impl LeaseSet {
    /// Assemble a lease set received from the network
    ///
    /// The result is not trusted until its signature has been verified.
    pub fn from_parts(
        destination: Destination,
        encryption_key: [u8; 32],
        leases: Vec<Lease>,
        signature: Vec<u8>,
    ) -> Self {
        Self {
            destination,
            encryption_key,
            leases,
            signature,
        }
    }

    pub fn ident_hash(&self) -> IdentHash {
        self.destination.ident_hash()
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Temporary key garlic messages for this destination are encrypted to
    pub fn encryption_key(&self) -> &[u8; 32] {
        &self.encryption_key
    }

    pub fn leases(&self) -> &[Lease] {
        &self.leases
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn signable_bytes(&self) -> ValidationResult<Vec<u8>> {
        body_bytes(&self.destination, &self.encryption_key, &self.leases)
    }

    /// Latest expiry of any lease
    pub fn end_of_life(&self) -> Option<DateTime<Utc>> {
        self.leases.iter().map(|l| l.expires).max()
    }

    /// Whether the latest expiry lies more than `margin` after `now`
    pub fn expires_after(&self, now: DateTime<Utc>, margin: chrono::Duration) -> bool {
        self.end_of_life().is_some_and(|eol| eol > now + margin)
    }

    /// Unexpired leases, latest expiry first
    pub fn live_leases(&self, now: DateTime<Utc>) -> Vec<Lease> {
        let mut live: Vec<Lease> = self
            .leases
            .iter()
            .filter(|l| !l.is_expired(now))
            .copied()
            .collect();
        live.sort_by(|a, b| b.expires.cmp(&a.expires));
        live
    }
}

/// Lease set under construction, not yet signed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseSetBuilder {
    destination: Destination,
    encryption_key: [u8; 32],
    leases: Vec<Lease>,
}

impl LeaseSetBuilder {
    pub fn new(destination: Destination, encryption_key: [u8; 32]) -> Self {
        Self {
            destination,
            encryption_key,
            leases: Vec::new(),
        }
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    pub fn encryption_key(&self) -> &[u8; 32] {
        &self.encryption_key
    }

    pub fn set_encryption_key(&mut self, key: [u8; 32]) {
        self.encryption_key = key;
    }

    pub fn leases(&self) -> &[Lease] {
        &self.leases
    }

    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }

    /// Add a lease, replacing any lease for the same gateway tunnel
    pub fn add_lease(&mut self, lease: Lease) {
        self.leases
            .retain(|l| !(l.gateway == lease.gateway && l.tunnel_id == lease.tunnel_id));
        self.leases.push(lease);
    }

    /// Remove the lease for a gateway tunnel, returning whether one existed
    pub fn remove_lease(&mut self, gateway: &IdentHash, tunnel_id: TunnelId) -> bool {
        let before = self.leases.len();
        self.leases
            .retain(|l| !(l.gateway == *gateway && l.tunnel_id == tunnel_id));
        before != self.leases.len()
    }

    pub fn remove_expired(&mut self, now: DateTime<Utc>) {
        self.leases.retain(|l| !l.is_expired(now));
    }

    pub fn signable_bytes(&self) -> ValidationResult<Vec<u8>> {
        body_bytes(&self.destination, &self.encryption_key, &self.leases)
    }

    /// Seal the current leases with a signature over [`Self::signable_bytes`]
    pub fn finish(&self, signature: Vec<u8>) -> ValidationResult<LeaseSet> {
        if self.leases.is_empty() {
            return Err(ValidationError::EmptyLeaseSet);
        }
        Ok(LeaseSet {
            destination: self.destination,
            encryption_key: self.encryption_key,
            leases: self.leases.clone(),
            signature,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn destination() -> Destination {
        Destination {
            signing_key: [7; 32],
            encryption_key: [8; 32],
        }
    }

    fn lease(gw: u8, tid: u32, expires: DateTime<Utc>) -> Lease {
        Lease {
            gateway: IdentHash::new([gw; 32]),
            tunnel_id: TunnelId(tid),
            expires,
        }
    }

    #[test]
    fn test_end_of_life_is_latest_expiry() {
        let now = Utc::now();
        let mut builder = LeaseSetBuilder::new(destination(), [1; 32]);
        builder.add_lease(lease(1, 1, now + Duration::minutes(3)));
        builder.add_lease(lease(2, 2, now + Duration::minutes(9)));
        let ls = builder.finish(vec![0; 64]).unwrap();
        assert_eq!(ls.end_of_life(), Some(now + Duration::minutes(9)));
        assert!(ls.expires_after(now, Duration::minutes(3)));
        assert!(!ls.expires_after(now, Duration::minutes(9)));
    }

    #[test]
    fn test_empty_builder_cannot_finish() {
        let builder = LeaseSetBuilder::new(destination(), [1; 32]);
        assert_eq!(builder.finish(vec![]), Err(ValidationError::EmptyLeaseSet));
    }

    #[test]
    fn test_add_lease_replaces_same_tunnel() {
        let now = Utc::now();
        let mut builder = LeaseSetBuilder::new(destination(), [1; 32]);
        builder.add_lease(lease(1, 1, now));
        builder.add_lease(lease(1, 1, now + Duration::minutes(1)));
        builder.add_lease(lease(1, 2, now));
        assert_eq!(builder.len(), 2);
        assert!(builder.remove_lease(&IdentHash::new([1; 32]), TunnelId(1)));
        assert!(!builder.remove_lease(&IdentHash::new([1; 32]), TunnelId(1)));
        assert_eq!(builder.len(), 1);
    }

    #[test]
    fn test_live_leases_sorted_and_filtered() {
        let now = Utc::now();
        let mut builder = LeaseSetBuilder::new(destination(), [1; 32]);
        builder.add_lease(lease(1, 1, now - Duration::seconds(1)));
        builder.add_lease(lease(2, 2, now + Duration::minutes(2)));
        builder.add_lease(lease(3, 3, now + Duration::minutes(8)));
        let ls = builder.finish(vec![]).unwrap();
        let live = ls.live_leases(now);
        assert_eq!(live.len(), 2);
        assert_eq!(live[0].tunnel_id, TunnelId(3));
    }

    #[test]
    fn test_signable_bytes_match_between_builder_and_set() {
        let now = Utc::now();
        let mut builder = LeaseSetBuilder::new(destination(), [1; 32]);
        builder.add_lease(lease(1, 1, now));
        let ls = builder.finish(vec![1, 2, 3]).unwrap();
        assert_eq!(builder.signable_bytes().unwrap(), ls.signable_bytes().unwrap());
        assert_eq!(ls.ident_hash(), destination().ident_hash());
    }
}
