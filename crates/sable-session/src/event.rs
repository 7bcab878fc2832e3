//! Session state and notifications

use bytes::Bytes;
use derive_more::Display;
use sable_core::{IdentHash, LeaseSetBuilder};

/// Coarse readiness of a session to send
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientState {
    /// No established inbound or outbound tunnel
    #[display("no_tunnels")]
    NoTunnels,
    /// Tunnels exist but the target's lease set is unknown or used up
    #[display("no_leases")]
    NoLeases,
    #[display("established")]
    Established,
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(ClientState),
    /// An externally signed session has enough inbound tunnels; the client
    /// should sign these leases and hand them back
    SignLeasesRequest(LeaseSetBuilder),
    /// An application payload arrived
    ///
    /// `from` is the destination whose lease set came bundled with the
    /// payload, when there was one.
    DataReceived {
        from: Option<IdentHash>,
        payload: Bytes,
    },
}
