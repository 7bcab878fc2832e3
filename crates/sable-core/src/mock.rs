//! In-memory collaborators for testing
//!
//! Each mock records what the core asked of it, so tests can assert on
//! sends, lookups, and tunnel traffic without any network.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sable_core::{MockTransport, RouterTransport, RouterMessage};
//!
//! let transport = MockTransport::new();
//! transport.send(&peer, RouterMessage::DeliveryStatus { message_id: 1 }).await?;
//! assert_eq!(transport.sent().len(), 1);
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::{LookupError, TransportError};
use crate::identity::IdentHash;
use crate::lease_set::LeaseSet;
use crate::message::RouterMessage;
use crate::peer_info::PeerInfo;
use crate::transport::{LookupProtocol, RouterTransport, TunnelProvider};
use crate::tunnel::{TunnelId, TunnelInfo};

/// Poll `check` until it holds or `timeout` elapses
pub async fn wait_until<F: Fn() -> bool>(timeout: Duration, check: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Transport that records every send
#[derive(Default)]
pub struct MockTransport {
    sent: Mutex<Vec<(IdentHash, RouterMessage)>>,
    fail: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following send fail
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(IdentHash, RouterMessage)> {
        self.sent.lock().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl RouterTransport for MockTransport {
    async fn send(&self, peer: &IdentHash, message: RouterMessage) -> Result<(), TransportError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::PeerUnreachable(peer.short_id()));
        }
        self.sent.lock().push((*peer, message));
        Ok(())
    }
}

/// A message sent through an outbound tunnel
#[derive(Debug, Clone)]
pub struct TunnelSend {
    pub outbound: TunnelInfo,
    pub gateway: IdentHash,
    pub tunnel_id: TunnelId,
    pub message: RouterMessage,
}

/// Tunnel provider that records local distribution and tunnel sends
#[derive(Default)]
pub struct MockTunnelProvider {
    local: Mutex<Vec<RouterMessage>>,
    sends: Mutex<Vec<TunnelSend>>,
    released: Mutex<Vec<IdentHash>>,
}

impl MockTunnelProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn local_messages(&self) -> Vec<RouterMessage> {
        self.local.lock().clone()
    }

    pub fn sends(&self) -> Vec<TunnelSend> {
        self.sends.lock().clone()
    }

    pub fn send_count(&self) -> usize {
        self.sends.lock().len()
    }

    pub fn released(&self) -> Vec<IdentHash> {
        self.released.lock().clone()
    }
}

#[async_trait]
impl TunnelProvider for MockTunnelProvider {
    fn distribute_local(&self, message: RouterMessage) {
        self.local.lock().push(message);
    }

    async fn send_through(
        &self,
        outbound: &TunnelInfo,
        gateway: &IdentHash,
        tunnel_id: TunnelId,
        message: RouterMessage,
    ) -> Result<(), TransportError> {
        self.sends.lock().push(TunnelSend {
            outbound: outbound.clone(),
            gateway: *gateway,
            tunnel_id,
            message,
        });
        Ok(())
    }

    fn release_tunnels(&self, destination: &IdentHash) {
        self.released.lock().push(*destination);
    }
}

/// Scriptable lookup protocol
///
/// Answers from the scripted records, or `Ok(None)` for unknown keys. While
/// held, every lookup waits until [`MockLookup::release`] is called.
#[derive(Default)]
pub struct MockLookup {
    lease_sets: DashMap<IdentHash, LeaseSet>,
    peer_infos: DashMap<IdentHash, PeerInfo>,
    lease_set_calls: Mutex<Vec<IdentHash>>,
    peer_info_calls: AtomicUsize,
    held: AtomicBool,
    gate: Notify,
}

impl MockLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a lookup whose calls stay in flight until released
    pub fn held() -> Arc<Self> {
        let lookup = Self::default();
        lookup.held.store(true, Ordering::SeqCst);
        Arc::new(lookup)
    }

    pub fn insert_lease_set(&self, lease_set: LeaseSet) {
        self.lease_sets.insert(lease_set.ident_hash(), lease_set);
    }

    pub fn insert_peer_info(&self, info: PeerInfo) {
        self.peer_infos.insert(info.ident_hash(), info);
    }

    /// Let every waiting and future lookup complete
    pub fn release(&self) {
        self.held.store(false, Ordering::SeqCst);
        self.gate.notify_waiters();
    }

    pub fn lease_set_calls(&self) -> Vec<IdentHash> {
        self.lease_set_calls.lock().clone()
    }

    pub fn peer_info_calls(&self) -> usize {
        self.peer_info_calls.load(Ordering::SeqCst)
    }

    async fn wait_released(&self) {
        while self.held.load(Ordering::SeqCst) {
            let notified = self.gate.notified();
            if !self.held.load(Ordering::SeqCst) {
                break;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl LookupProtocol for MockLookup {
    async fn lookup_lease_set(&self, key: &IdentHash) -> Result<Option<LeaseSet>, LookupError> {
        self.lease_set_calls.lock().push(*key);
        self.wait_released().await;
        Ok(self.lease_sets.get(key).map(|e| e.value().clone()))
    }

    async fn lookup_peer_info(&self, key: &IdentHash) -> Result<Option<PeerInfo>, LookupError> {
        self.peer_info_calls.fetch_add(1, Ordering::SeqCst);
        self.wait_released().await;
        Ok(self.peer_infos.get(key).map(|e| e.value().clone()))
    }
}
