//! Tunnel descriptors handed to sessions by the tunnel provider

use chrono::{DateTime, Duration, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::identity::IdentHash;
use crate::lease_set::Lease;

/// Seconds before expiry at which a tunnel should be rebuilt
pub const TUNNEL_RECREATION_MARGIN_SECS: i64 = 120;

/// Tunnel id as seen by the gateway hop
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[display("{_0}")]
pub struct TunnelId(pub u32);

/// Local handle of a tunnel, unique within this router
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[display("t{_0}")]
pub struct TunnelKey(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TunnelDirection {
    Inbound,
    Outbound,
}

/// A built tunnel owned by one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelInfo {
    pub key: TunnelKey,
    pub direction: TunnelDirection,
    /// First hop of the tunnel (the gateway for inbound tunnels)
    pub gateway: IdentHash,
    /// Tunnel id at the gateway hop
    pub gateway_tunnel_id: TunnelId,
    pub hops: u8,
    pub created: DateTime<Utc>,
    pub expires: DateTime<Utc>,
}

impl TunnelInfo {
    pub fn new(
        key: TunnelKey,
        direction: TunnelDirection,
        gateway: IdentHash,
        gateway_tunnel_id: TunnelId,
        created: DateTime<Utc>,
        lifetime: Duration,
    ) -> Self {
        Self {
            key,
            direction,
            gateway,
            gateway_tunnel_id,
            hops: 3,
            created,
            expires: created + lifetime,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires <= now
    }

    /// Whether the provider should already be replacing this tunnel
    pub fn needs_recreation(&self, now: DateTime<Utc>) -> bool {
        self.expires - now < Duration::seconds(TUNNEL_RECREATION_MARGIN_SECS)
    }

    /// Lease pointing into this tunnel, for inbound tunnels
    pub fn lease(&self) -> Lease {
        Lease {
            gateway: self.gateway,
            tunnel_id: self.gateway_tunnel_id,
            expires: self.expires,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_needs_recreation_near_expiry() {
        let now = Utc::now();
        let tunnel = TunnelInfo::new(
            TunnelKey(1),
            TunnelDirection::Inbound,
            IdentHash::new([3; 32]),
            TunnelId(77),
            now,
            Duration::minutes(10),
        );
        assert!(!tunnel.needs_recreation(now));
        assert!(tunnel.needs_recreation(now + Duration::minutes(9)));
        assert!(tunnel.is_expired(now + Duration::minutes(10)));
    }

    #[test]
    fn test_lease_matches_gateway() {
        let now = Utc::now();
        let tunnel = TunnelInfo::new(
            TunnelKey(2),
            TunnelDirection::Inbound,
            IdentHash::new([4; 32]),
            TunnelId(5),
            now,
            Duration::minutes(10),
        );
        let lease = tunnel.lease();
        assert_eq!(lease.gateway, tunnel.gateway);
        assert_eq!(lease.tunnel_id, TunnelId(5));
        assert_eq!(lease.expires, tunnel.expires);
        assert_eq!(format!("{}", tunnel.key), "t2");
    }
}
