//! Signing and verification of directory records

use sable_core::{LeaseSet, LeaseSetBuilder, PeerInfo};
use tracing::trace;

use crate::error::{CryptoError, CryptoResult};
use crate::signing::{SigningKeyPair, verify_signature};

/// Sign a peer info with the router's signing key
pub fn sign_peer_info(info: PeerInfo, key: &SigningKeyPair) -> CryptoResult<PeerInfo> {
    if info.identity.signing_key != key.public_key() {
        return Err(CryptoError::KeyMismatch);
    }
    let signature = key.sign(&info.signable_bytes()?);
    Ok(info.with_signature(signature))
}

/// Verify a peer info against its embedded signing key
pub fn verify_peer_info(info: &PeerInfo) -> CryptoResult<()> {
    let result = verify_signature(
        &info.identity.signing_key,
        &info.signable_bytes()?,
        &info.signature,
    );
    if result.is_err() {
        trace!(peer = %info.ident_hash(), "Peer info signature rejected");
    }
    result
}

/// Sign the leases currently in `builder`
pub fn sign_lease_set(builder: &LeaseSetBuilder, key: &SigningKeyPair) -> CryptoResult<LeaseSet> {
    if builder.destination().signing_key != key.public_key() {
        return Err(CryptoError::KeyMismatch);
    }
    let signature = key.sign(&builder.signable_bytes()?);
    Ok(builder.finish(signature)?)
}

/// Verify a lease set against its destination's signing key
pub fn verify_lease_set(lease_set: &LeaseSet) -> CryptoResult<()> {
    verify_signature(
        &lease_set.destination().signing_key,
        &lease_set.signable_bytes()?,
        lease_set.signature(),
    )
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{Duration, Utc};
    use sable_core::{IdentHash, Lease, PeerAddress, TransportStyle, TunnelId};

    use super::*;
    use crate::keys::{DestinationKeys, RouterKeys};

    fn peer_info(keys: &RouterKeys) -> PeerInfo {
        let mut options = BTreeMap::new();
        options.insert("caps".to_string(), "fR".to_string());
        PeerInfo::unsigned(
            keys.identity(),
            Utc::now(),
            options,
            vec![PeerAddress::new(TransportStyle::Ntcp, "10.1.1.1", 7000)],
        )
    }

    #[test]
    fn test_peer_info_sign_and_verify() {
        let keys = RouterKeys::generate();
        let signed = sign_peer_info(peer_info(&keys), &keys.signing).unwrap();
        assert!(verify_peer_info(&signed).is_ok());
    }

    #[test]
    fn test_peer_info_tampering_detected() {
        let keys = RouterKeys::generate();
        let mut signed = sign_peer_info(peer_info(&keys), &keys.signing).unwrap();
        signed.published += Duration::seconds(10);
        assert!(verify_peer_info(&signed).is_err());
    }

    #[test]
    fn test_wrong_key_refused() {
        let keys = RouterKeys::generate();
        let other = RouterKeys::generate();
        assert!(matches!(
            sign_peer_info(peer_info(&keys), &other.signing),
            Err(CryptoError::KeyMismatch)
        ));
    }

    #[test]
    fn test_lease_set_sign_and_verify() {
        let keys = DestinationKeys::generate();
        let mut builder = LeaseSetBuilder::new(keys.destination(), keys.encryption.public_key());
        builder.add_lease(Lease {
            gateway: IdentHash::new([3; 32]),
            tunnel_id: TunnelId(12),
            expires: Utc::now() + Duration::minutes(10),
        });
        let ls = sign_lease_set(&builder, &keys.signing).unwrap();
        assert!(verify_lease_set(&ls).is_ok());

        let forged = LeaseSet::from_parts(
            *ls.destination(),
            *ls.encryption_key(),
            vec![],
            ls.signature().to_vec(),
        );
        assert!(verify_lease_set(&forged).is_err());
    }
}
