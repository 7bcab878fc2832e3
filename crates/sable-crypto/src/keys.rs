//! Key bundles for routers and destinations

use sable_core::{Destination, IdentHash, RouterIdentity};

use crate::garlic::GarlicKey;
use crate::signing::SigningKeyPair;

/// Long-term keys of this router
#[derive(Debug, Clone)]
pub struct RouterKeys {
    pub signing: SigningKeyPair,
    pub encryption: GarlicKey,
}

impl RouterKeys {
    pub fn generate() -> Self {
        Self {
            signing: SigningKeyPair::generate(),
            encryption: GarlicKey::generate(),
        }
    }

    pub fn identity(&self) -> RouterIdentity {
        RouterIdentity {
            signing_key: self.signing.public_key(),
            encryption_key: self.encryption.public_key(),
        }
    }

    pub fn ident_hash(&self) -> IdentHash {
        self.identity().ident_hash()
    }
}

/// Long-term keys of a destination whose lease sets the router signs
#[derive(Debug, Clone)]
pub struct DestinationKeys {
    pub signing: SigningKeyPair,
    pub encryption: GarlicKey,
}

impl DestinationKeys {
    pub fn generate() -> Self {
        Self {
            signing: SigningKeyPair::generate(),
            encryption: GarlicKey::generate(),
        }
    }

    pub fn destination(&self) -> Destination {
        Destination {
            signing_key: self.signing.public_key(),
            encryption_key: self.encryption.public_key(),
        }
    }

    pub fn ident_hash(&self) -> IdentHash {
        self.destination().ident_hash()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ident_hash_follows_keys() {
        let keys = RouterKeys::generate();
        assert_eq!(keys.ident_hash(), keys.identity().ident_hash());
        assert_ne!(keys.ident_hash(), RouterKeys::generate().ident_hash());
    }

    #[test]
    fn test_destination_keys_match_destination() {
        let keys = DestinationKeys::generate();
        let dest = keys.destination();
        assert_eq!(dest.signing_key, keys.signing.public_key());
        assert_eq!(dest.encryption_key, keys.encryption.public_key());
    }
}
