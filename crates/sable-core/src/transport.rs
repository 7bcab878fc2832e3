//! Collaborator interfaces
//!
//! The core never owns sockets, tunnel building, or the lookup wire
//! protocol. It reaches them through these traits, which the process-level
//! composition root wires to real implementations (and tests wire to the
//! mocks in [`crate::mock`]).

use async_trait::async_trait;

use crate::error::{LookupError, TransportError};
use crate::identity::IdentHash;
use crate::lease_set::LeaseSet;
use crate::message::RouterMessage;
use crate::peer_info::PeerInfo;
use crate::tunnel::{TunnelId, TunnelInfo};

/// Router-to-router datagram delivery
///
/// Best effort: success means the message was handed to the transport, not
/// that it arrived.
#[async_trait]
pub trait RouterTransport: Send + Sync {
    async fn send(&self, peer: &IdentHash, message: RouterMessage) -> Result<(), TransportError>;
}

/// Local tunnel machinery
#[async_trait]
pub trait TunnelProvider: Send + Sync {
    /// Hand a message to the local tunnel-message distributor
    fn distribute_local(&self, message: RouterMessage);

    /// Send a message out through one of our outbound tunnels, to be
    /// delivered at the far end to `tunnel_id` on `gateway`
    async fn send_through(
        &self,
        outbound: &TunnelInfo,
        gateway: &IdentHash,
        tunnel_id: TunnelId,
        message: RouterMessage,
    ) -> Result<(), TransportError>;

    /// Release every tunnel built for a destination
    fn release_tunnels(&self, destination: &IdentHash);
}

/// Network lookup protocol for records this router does not hold
///
/// Implementations query floodfills and resolve to `Ok(None)` on a negative
/// reply. The directory bounds every call with its own timeout.
#[async_trait]
pub trait LookupProtocol: Send + Sync {
    async fn lookup_lease_set(&self, key: &IdentHash) -> Result<Option<LeaseSet>, LookupError>;

    async fn lookup_peer_info(&self, key: &IdentHash) -> Result<Option<PeerInfo>, LookupError>;
}
