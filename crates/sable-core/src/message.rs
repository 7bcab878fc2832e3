//! Router-level messages the core produces and consumes
//!
//! These are already-parsed forms; their wire encoding belongs to the
//! transport layer.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::garlic::GarlicMessage;
use crate::identity::IdentHash;
use crate::lease_set::LeaseSet;
use crate::peer_info::PeerInfo;
use crate::tunnel::TunnelId;

/// Record carried by a directory store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreRecord {
    PeerInfo(PeerInfo),
    LeaseSet(LeaseSet),
}

/// Directory store request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseStore {
    pub key: IdentHash,
    pub record: StoreRecord,
    /// Non-zero when the sender wants a delivery status back
    pub reply_token: u32,
}

impl DatabaseStore {
    pub fn lease_set(lease_set: LeaseSet, reply_token: u32) -> Self {
        Self {
            key: lease_set.ident_hash(),
            record: StoreRecord::LeaseSet(lease_set),
            reply_token,
        }
    }

    pub fn peer_info(info: PeerInfo, reply_token: u32) -> Self {
        Self {
            key: info.ident_hash(),
            record: StoreRecord::PeerInfo(info),
            reply_token,
        }
    }
}

/// Negative lookup reply listing closer floodfills
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSearchReply {
    pub key: IdentHash,
    pub peers: Vec<IdentHash>,
    pub from: IdentHash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouterMessage {
    /// Application payload
    Data(Bytes),
    DatabaseStore(DatabaseStore),
    DatabaseSearchReply(DatabaseSearchReply),
    DeliveryStatus { message_id: u32 },
    /// Message to inject at a tunnel gateway
    TunnelGateway {
        tunnel_id: TunnelId,
        message: Box<RouterMessage>,
    },
    Garlic(GarlicMessage),
}

impl RouterMessage {
    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            RouterMessage::Data(_) => "data",
            RouterMessage::DatabaseStore(_) => "database_store",
            RouterMessage::DatabaseSearchReply(_) => "database_search_reply",
            RouterMessage::DeliveryStatus { .. } => "delivery_status",
            RouterMessage::TunnelGateway { .. } => "tunnel_gateway",
            RouterMessage::Garlic(_) => "garlic",
        }
    }
}
