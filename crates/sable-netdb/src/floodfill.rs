//! Floodfill publication
//!
//! Records queued with [`FloodfillUpdater::enqueue`] are pushed as
//! `DatabaseStore` messages to a few floodfills drawn from the floodfill
//! pool. Each store carries a reply token; a delivery status for the token
//! confirms the store and credits the floodfill. Stores left unconfirmed past
//! the confirmation timeout count against the floodfill and are retried with
//! a different one until the attempt limit is reached.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sable_core::{DatabaseStore, IdentHash, LeaseSet, PeerInfo, RouterMessage};
use tracing::{debug, trace, warn};

use crate::directory::{NetworkDirectory, PoolKind};
use crate::reputation::Outcome;

/// A record waiting to be pushed to floodfills
#[derive(Debug, Clone)]
pub enum PublishRecord {
    LeaseSet(Arc<LeaseSet>),
    PeerInfo(Arc<PeerInfo>),
}

impl PublishRecord {
    pub fn key(&self) -> IdentHash {
        match self {
            PublishRecord::LeaseSet(ls) => ls.ident_hash(),
            PublishRecord::PeerInfo(info) => info.ident_hash(),
        }
    }

    fn to_message(&self, reply_token: u32) -> RouterMessage {
        let store = match self {
            PublishRecord::LeaseSet(ls) => DatabaseStore::lease_set(ls.as_ref().clone(), reply_token),
            PublishRecord::PeerInfo(info) => DatabaseStore::peer_info(info.as_ref().clone(), reply_token),
        };
        RouterMessage::DatabaseStore(store)
    }
}

#[derive(Debug, Clone)]
struct OutstandingStore {
    record: PublishRecord,
    floodfill: IdentHash,
    sent_at: DateTime<Utc>,
    attempt: u32,
    tried: Vec<IdentHash>,
}

pub struct FloodfillUpdater {
    queued: DashMap<IdentHash, PublishRecord>,
    outstanding: DashMap<u32, OutstandingStore>,
    next_token: AtomicU32,
    fanout: usize,
    confirm_timeout: chrono::Duration,
    max_attempts: u32,
}

impl FloodfillUpdater {
    pub(crate) fn new(fanout: usize, confirm_timeout: std::time::Duration, max_attempts: u32) -> Self {
        Self {
            queued: DashMap::new(),
            outstanding: DashMap::new(),
            next_token: AtomicU32::new(1),
            fanout: fanout.max(1),
            confirm_timeout: chrono::Duration::from_std(confirm_timeout)
                .unwrap_or(chrono::Duration::MAX),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Queue a record; a newer record for the same key replaces it
    pub fn enqueue(&self, record: PublishRecord) {
        trace!(key = %record.key(), "Queued floodfill publication");
        self.queued.insert(record.key(), record);
    }

    pub fn queued(&self) -> usize {
        self.queued.len()
    }

    /// Stores sent and not yet confirmed
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// Consume a reply token, returning the floodfill it was sent to
    pub fn confirm(&self, token: u32) -> Option<IdentHash> {
        self.outstanding.remove(&token).map(|(_, store)| {
            trace!(token, floodfill = %store.floodfill, key = %store.record.key(), "Floodfill store confirmed");
            store.floodfill
        })
    }

    fn allocate_token(&self) -> u32 {
        loop {
            let token = self.next_token.fetch_add(1, Ordering::Relaxed);
            if token != 0 {
                return token;
            }
        }
    }

    /// Expire unconfirmed stores, retry them, and push queued records
    pub(crate) async fn run(&self, directory: &NetworkDirectory) {
        let now = directory.clock().now();

        let expired: Vec<u32> = self
            .outstanding
            .iter()
            .filter(|e| now - e.value().sent_at > self.confirm_timeout)
            .map(|e| *e.key())
            .collect();
        for token in expired {
            let Some((_, store)) = self.outstanding.remove(&token) else {
                continue;
            };
            debug!(
                token,
                floodfill = %store.floodfill,
                key = %store.record.key(),
                attempt = store.attempt,
                "Floodfill store timed out"
            );
            directory
                .reputation()
                .record_outcome(&store.floodfill, Outcome::FloodfillUpdateTimeout);
            if store.attempt < self.max_attempts {
                let mut tried = store.tried;
                self.send_attempt(directory, store.record, store.attempt + 1, &mut tried)
                    .await;
            } else {
                warn!(key = %store.record.key(), "Giving up floodfill publication");
            }
        }

        let keys: Vec<IdentHash> = self.queued.iter().map(|e| *e.key()).collect();
        for key in keys {
            let Some((_, record)) = self.queued.remove(&key) else {
                continue;
            };
            // Every fan-out target goes to a distinct floodfill
            let mut tried = Vec::new();
            let mut sent = 0;
            for _ in 0..self.fanout {
                if !self.send_attempt(directory, record.clone(), 1, &mut tried).await {
                    break;
                }
                sent += 1;
            }
            if sent == 0 {
                // Held for the next run unless a newer record took its place
                trace!(key = %key, "Publication deferred");
                self.queued.entry(key).or_insert(record);
            }
        }
    }

    /// Send one store to a floodfill not in `tried`
    ///
    /// Send errors penalize the floodfill and move on to the next candidate
    /// within the same attempt budget. Returns whether a store went out.
    async fn send_attempt(
        &self,
        directory: &NetworkDirectory,
        record: PublishRecord,
        mut attempt: u32,
        tried: &mut Vec<IdentHash>,
    ) -> bool {
        while attempt <= self.max_attempts {
            let Some(floodfill) = choose_floodfill(directory, tried) else {
                debug!(key = %record.key(), "No floodfill available for publication");
                return false;
            };
            tried.push(floodfill);

            let token = self.allocate_token();
            self.outstanding.insert(
                token,
                OutstandingStore {
                    record: record.clone(),
                    floodfill,
                    sent_at: directory.clock().now(),
                    attempt,
                    tried: tried.clone(),
                },
            );

            match directory.transport().send(&floodfill, record.to_message(token)).await {
                Ok(()) => {
                    trace!(token, floodfill = %floodfill, key = %record.key(), "Sent floodfill store");
                    return true;
                }
                Err(e) => {
                    debug!(floodfill = %floodfill, error = %e, "Floodfill store send failed");
                    self.outstanding.remove(&token);
                    directory
                        .reputation()
                        .record_outcome(&floodfill, Outcome::FailedConnect);
                    attempt += 1;
                }
            }
        }
        false
    }
}

fn choose_floodfill(directory: &NetworkDirectory, exclude: &[IdentHash]) -> Option<IdentHash> {
    let local = *directory.local();
    let wanted = exclude.len() + 2;
    directory
        .select_peers(PoolKind::Floodfill, wanted, true)
        .into_iter()
        .map(|info| info.ident_hash())
        .find(|id| *id != local && !exclude.contains(id))
}
