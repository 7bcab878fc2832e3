//! Directory notifications
//!
//! Subscribers receive these through a broadcast channel, so a slow
//! subscriber never holds up the writer that produced the event.

use std::sync::Arc;

use crate::lease_set::LeaseSet;
use crate::message::DatabaseSearchReply;
use crate::peer_info::PeerInfo;

#[derive(Debug, Clone)]
pub enum DirectoryEvent {
    /// A peer info was inserted or replaced
    PeerInfoUpdated(Arc<PeerInfo>),
    /// A lease set was inserted or replaced
    LeaseSetUpdated(Arc<LeaseSet>),
    /// An unsolicited search reply arrived
    SearchReplyReceived(DatabaseSearchReply),
}
