//! Messages waiting for a lease set or tunnels
//!
//! Buckets are keyed by destination and live for the unsent horizon from
//! the first buffered message; a bucket nobody flushed in time is dropped
//! whole.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use sable_core::{Clock, IdentHash, TimeWindowMap};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsentMessage {
    pub payload: Bytes,
    pub expires: Option<DateTime<Utc>>,
}

pub struct UnsentMessages {
    buckets: TimeWindowMap<IdentHash, Vec<UnsentMessage>>,
}

impl UnsentMessages {
    pub fn new(horizon: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            buckets: TimeWindowMap::new(horizon, clock),
        }
    }

    pub fn push(&self, destination: IdentHash, message: UnsentMessage) {
        self.buckets
            .upsert(destination, Vec::new, |bucket| bucket.push(message));
    }

    /// Remove and return everything buffered for `destination`
    pub fn take(&self, destination: &IdentHash) -> Vec<UnsentMessage> {
        self.buckets.remove(destination).unwrap_or_default()
    }

    pub fn contains(&self, destination: &IdentHash) -> bool {
        self.buckets.contains(destination)
    }

    /// Destinations with live buckets
    pub fn destinations(&self) -> Vec<IdentHash> {
        self.buckets.snapshot().into_iter().map(|(k, _)| k).collect()
    }

    /// Buffered messages across every live bucket
    pub fn total(&self) -> usize {
        self.buckets.snapshot().iter().map(|(_, b)| b.len()).sum()
    }

    pub fn prune(&self) -> usize {
        self.buckets.prune()
    }
}
