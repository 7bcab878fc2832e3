//! Per-remote encryption context
//!
//! Each remote destination gets a [`GarlicContext`] bound to the encryption
//! key from its latest lease set. When the remote rotates its key the
//! context is rebound; garlic sealed for the old key can no longer be opened
//! by the remote.

use chrono::{DateTime, Utc};
use sable_core::{Garlic, GarlicMessage};
use sable_crypto::{CryptoResult, encrypt_garlic};
use tracing::trace;

#[derive(Debug, Clone)]
pub struct GarlicContext {
    remote_key: [u8; 32],
    bound_at: DateTime<Utc>,
    sealed: u64,
}

impl GarlicContext {
    pub fn new(remote_key: [u8; 32], now: DateTime<Utc>) -> Self {
        Self {
            remote_key,
            bound_at: now,
            sealed: 0,
        }
    }

    pub fn remote_key(&self) -> &[u8; 32] {
        &self.remote_key
    }

    /// Messages sealed since the context was last bound
    pub fn sealed(&self) -> u64 {
        self.sealed
    }

    pub fn bound_at(&self) -> DateTime<Utc> {
        self.bound_at
    }

    /// Bind to a new remote key, returning whether it changed
    pub fn rebind(&mut self, remote_key: [u8; 32], now: DateTime<Utc>) -> bool {
        if self.remote_key == remote_key {
            return false;
        }
        trace!(sealed = self.sealed, "Remote rotated its encryption key");
        self.remote_key = remote_key;
        self.bound_at = now;
        self.sealed = 0;
        true
    }

    pub fn seal(&mut self, garlic: &Garlic) -> CryptoResult<GarlicMessage> {
        let message = encrypt_garlic(&self.remote_key, garlic)?;
        self.sealed += 1;
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use sable_core::{CloveDelivery, GarlicClove, RouterMessage};
    use sable_crypto::GarlicKey;

    use super::*;

    fn garlic() -> Garlic {
        Garlic::new(vec![GarlicClove::new(
            CloveDelivery::Local,
            RouterMessage::Data(Bytes::from_static(b"hello")),
        )])
    }

    #[test]
    fn test_seal_for_bound_key() {
        let key = GarlicKey::generate();
        let mut context = GarlicContext::new(key.public_key(), Utc::now());
        let sealed = context.seal(&garlic()).unwrap();
        assert_eq!(key.decrypt(&sealed).unwrap(), garlic());
        assert_eq!(context.sealed(), 1);
    }

    #[test]
    fn test_rebind_resets_counter() {
        let old = GarlicKey::generate();
        let new = GarlicKey::generate();
        let mut context = GarlicContext::new(old.public_key(), Utc::now());
        context.seal(&garlic()).unwrap();

        assert!(!context.rebind(old.public_key(), Utc::now()));
        assert_eq!(context.sealed(), 1);
        assert!(context.rebind(new.public_key(), Utc::now()));
        assert_eq!(context.sealed(), 0);

        let sealed = context.seal(&garlic()).unwrap();
        assert!(old.decrypt(&sealed).is_err());
        assert!(new.decrypt(&sealed).is_ok());
    }
}
