//! Garlic messages and cloves
//!
//! A [`GarlicMessage`] is the encrypted envelope as it travels through
//! tunnels. Decrypting it yields a [`Garlic`], an ordered list of cloves,
//! each carrying one message and one [`CloveDelivery`] instruction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::IdentHash;
use crate::message::RouterMessage;
use crate::tunnel::TunnelId;

/// Where a clove should go after decryption
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloveDelivery {
    /// Process on this router
    Local,
    /// Forward directly to a router
    Router { peer: IdentHash },
    /// Inject into a tunnel at its gateway
    Tunnel {
        gateway: IdentHash,
        tunnel_id: TunnelId,
    },
    /// Deliver to a local destination
    Destination { destination: IdentHash },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GarlicClove {
    pub delivery: CloveDelivery,
    pub message: RouterMessage,
    pub expires: Option<DateTime<Utc>>,
}

impl GarlicClove {
    pub fn new(delivery: CloveDelivery, message: RouterMessage) -> Self {
        Self {
            delivery,
            message,
            expires: None,
        }
    }

    pub fn with_expiry(mut self, expires: DateTime<Utc>) -> Self {
        self.expires = Some(expires);
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.is_some_and(|e| e <= now)
    }
}

/// Decrypted garlic payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Garlic {
    pub cloves: Vec<GarlicClove>,
}

impl Garlic {
    pub fn new(cloves: Vec<GarlicClove>) -> Self {
        Self { cloves }
    }
}

/// Encrypted garlic envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GarlicMessage {
    /// Sender's ephemeral x25519 public key
    pub ephemeral_key: [u8; 32],
    pub nonce: [u8; 12],
    pub ciphertext: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::Duration;

    #[test]
    fn test_clove_expiry() {
        let now = Utc::now();
        let clove = GarlicClove::new(CloveDelivery::Local, RouterMessage::Data(Bytes::from_static(b"x")));
        assert!(!clove.is_expired(now));
        let clove = clove.with_expiry(now - Duration::seconds(1));
        assert!(clove.is_expired(now));
    }
}
