//! The network directory
//!
//! [`NetworkDirectory`] holds every peer info and lease set this router
//! knows, the floodfill subset, the reputation store, and the three
//! weighted selection pools built from it. Records are verified at the
//! boundary and replaced wholesale; a rejected record never touches
//! existing state.
//!
//! The directory is started with [`NetworkDirectory::start`], which loads
//! persisted state under a hard timeout and spawns the maintenance task.

use std::sync::Arc;

use chrono::Duration;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use sable_core::{
    Clock, DatabaseSearchReply, DirectoryEvent, IdentHash, LeaseSet, LookupProtocol, PeerInfo,
    RouterTransport, SystemClock, TimeWindowMap, ValidationError,
};
use sable_crypto::{verify_lease_set, verify_peer_info};
use sable_storage::{
    InMemoryRecordStore, RecordId, RecordKind, RecordStore, decode_record, encode_record,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::DirectoryConfig;
use crate::error::{DirectoryError, DirectoryResult, SelectionError};
use crate::floodfill::{FloodfillUpdater, PublishRecord};
use crate::maintenance;
use crate::reputation::{Outcome, PeerReputationStore, SaveSummary};
use crate::resolver::{self, LookupCallback, LookupResolver};
use crate::selection::WeightedSelector;

/// Result of offering a record to the directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// No live record existed for the key
    Inserted,
    /// A live record was replaced
    Replaced,
    /// The record was stale or a duplicate and changed nothing
    Ignored,
}

impl AddOutcome {
    pub fn is_accepted(self) -> bool {
        !matches!(self, AddOutcome::Ignored)
    }
}

/// Which selection pool to draw from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolKind {
    /// Every peer with a reachable host
    All,
    Floodfill,
    NonFloodfill,
}

#[derive(Default)]
struct SelectionPools {
    all: WeightedSelector<Arc<PeerInfo>>,
    floodfill: WeightedSelector<Arc<PeerInfo>>,
    non_floodfill: WeightedSelector<Arc<PeerInfo>>,
}

impl SelectionPools {
    fn pool(&self, kind: PoolKind) -> &WeightedSelector<Arc<PeerInfo>> {
        match kind {
            PoolKind::All => &self.all,
            PoolKind::Floodfill => &self.floodfill,
            PoolKind::NonFloodfill => &self.non_floodfill,
        }
    }
}

#[derive(Debug, Clone)]
struct PeerEntry {
    info: Arc<PeerInfo>,
    deleted: bool,
    dirty: bool,
    store_id: Option<RecordId>,
}

/// Collaborators of the directory
pub struct DirectoryDeps {
    /// Identity of this router; never selected from the pools
    pub local: IdentHash,
    pub peer_store: Arc<dyn RecordStore>,
    pub reputation_store: Arc<dyn RecordStore>,
    pub transport: Arc<dyn RouterTransport>,
    pub lookup: Arc<dyn LookupProtocol>,
    pub clock: Arc<dyn Clock>,
}

impl DirectoryDeps {
    /// Dependencies with in-memory stores and the system clock
    pub fn in_memory(
        local: IdentHash,
        transport: Arc<dyn RouterTransport>,
        lookup: Arc<dyn LookupProtocol>,
    ) -> Self {
        Self {
            local,
            peer_store: Arc::new(InMemoryRecordStore::new()),
            reputation_store: Arc::new(InMemoryRecordStore::new()),
            transport,
            lookup,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// What a directory save did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirectorySaveSummary {
    pub expired: usize,
    pub peers: SaveSummary,
    pub reputation: SaveSummary,
}

pub struct NetworkDirectory {
    config: DirectoryConfig,
    local: IdentHash,
    clock: Arc<dyn Clock>,
    peers: DashMap<IdentHash, PeerEntry>,
    floodfills: DashMap<IdentHash, Arc<PeerInfo>>,
    lease_sets: TimeWindowMap<IdentHash, Arc<LeaseSet>>,
    reputation: PeerReputationStore,
    pools: RwLock<Arc<SelectionPools>>,
    events: broadcast::Sender<DirectoryEvent>,
    resolver: LookupResolver,
    floodfill: FloodfillUpdater,
    peer_store: Arc<dyn RecordStore>,
    transport: Arc<dyn RouterTransport>,
}

impl NetworkDirectory {
    /// Build an empty directory without loading or starting maintenance
    pub fn new(config: DirectoryConfig, deps: DirectoryDeps) -> Self {
        let (events, _) = broadcast::channel(config.event_channel_capacity.max(1));
        Self {
            lease_sets: TimeWindowMap::new(config.lease_set_horizon(), deps.clock.clone()),
            reputation: PeerReputationStore::new(deps.reputation_store, deps.clock.clone()),
            resolver: LookupResolver::new(
                deps.lookup,
                config.lookup_timeout,
                config.max_concurrent_lookups,
            ),
            floodfill: FloodfillUpdater::new(
                config.floodfill_fanout,
                config.floodfill_confirm_timeout,
                config.floodfill_max_attempts,
            ),
            local: deps.local,
            clock: deps.clock,
            peers: DashMap::new(),
            floodfills: DashMap::new(),
            pools: RwLock::new(Arc::new(SelectionPools::default())),
            events,
            peer_store: deps.peer_store,
            transport: deps.transport,
            config,
        }
    }

    /// Load persisted state and start the maintenance task
    ///
    /// Fails if the load errors or does not finish within the configured
    /// load timeout; the directory must not run on partial data.
    #[instrument(skip_all, fields(local = %deps.local))]
    pub async fn start(
        config: DirectoryConfig,
        deps: DirectoryDeps,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> DirectoryResult<(Arc<Self>, JoinHandle<()>)> {
        let directory = Arc::new(Self::new(config, deps));
        let load_timeout = directory.config.load_timeout;

        let loader = directory.clone();
        let load = tokio::task::spawn_blocking(move || loader.load());
        match tokio::time::timeout(load_timeout, load).await {
            Err(_) => {
                error!(timeout = ?load_timeout, "Directory load timed out");
                return Err(DirectoryError::LoadTimeout(load_timeout));
            }
            Ok(Err(e)) => return Err(DirectoryError::Task(e.to_string())),
            Ok(Ok(result)) => {
                result?;
            }
        }

        directory.update_selection_pools();
        let handle = maintenance::spawn(directory.clone(), shutdown_rx);
        info!(
            peers = directory.peer_count(),
            floodfills = directory.floodfill_count(),
            "Network directory started"
        );
        Ok((directory, handle))
    }

    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    pub fn local(&self) -> &IdentHash {
        &self.local
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn reputation(&self) -> &PeerReputationStore {
        &self.reputation
    }

    pub fn transport(&self) -> &Arc<dyn RouterTransport> {
        &self.transport
    }

    pub(crate) fn resolver(&self) -> &LookupResolver {
        &self.resolver
    }

    /// Subscribe to update notifications
    pub fn subscribe(&self) -> broadcast::Receiver<DirectoryEvent> {
        self.events.subscribe()
    }

    fn notify(&self, event: DirectoryEvent) {
        // No subscribers is not an error
        let _ = self.events.send(event);
    }

    fn skew(&self) -> Duration {
        Duration::from_std(self.config.publish_skew).unwrap_or(Duration::zero())
    }

    fn supersedes(&self, existing: &PeerEntry, candidate: &PeerInfo) -> bool {
        // Tombstones keep the removed record's timestamp, so a replay stays dead
        candidate.published > existing.info.published + self.skew()
    }

    // ========== Peer infos ==========

    /// Offer a peer info received from the network
    ///
    /// Structurally or cryptographically invalid records are rejected; a
    /// record not newer than the stored one by more than the publish skew is
    /// ignored.
    pub fn add_peer_info(&self, info: PeerInfo) -> Result<AddOutcome, ValidationError> {
        let id = info.ident_hash();
        if let Err(e) = info.validate_structure(self.config.use_ipv6) {
            debug!(peer = %id, error = %e, "Rejected peer info");
            return Err(e);
        }
        if let Some(existing) = self.peers.get(&id) {
            if !self.supersedes(&existing, &info) {
                trace!(peer = %id, "Ignoring stale peer info");
                return Ok(AddOutcome::Ignored);
            }
        }
        if verify_peer_info(&info).is_err() {
            debug!(peer = %id, "Rejected peer info with bad signature");
            return Err(ValidationError::BadSignature);
        }

        let info = Arc::new(info);
        // Floodfill membership changes under the peer entry lock
        let outcome = match self.peers.entry(id) {
            Entry::Occupied(mut occupied) => {
                if !self.supersedes(occupied.get(), &info) {
                    return Ok(AddOutcome::Ignored);
                }
                let was_live = !occupied.get().deleted;
                let store_id = occupied.get().store_id;
                occupied.insert(PeerEntry {
                    info: info.clone(),
                    deleted: false,
                    dirty: true,
                    store_id,
                });
                self.update_floodfill_membership(&id, &info);
                if was_live {
                    AddOutcome::Replaced
                } else {
                    AddOutcome::Inserted
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(PeerEntry {
                    info: info.clone(),
                    deleted: false,
                    dirty: true,
                    store_id: None,
                });
                self.update_floodfill_membership(&id, &info);
                AddOutcome::Inserted
            }
        };

        self.reputation.set_firewalled(&id, info.is_firewalled());
        debug!(peer = %id, ?outcome, floodfill = info.is_floodfill(), "Peer info updated");
        self.notify(DirectoryEvent::PeerInfoUpdated(info.clone()));
        self.resolver.complete_peer_info(&id, Some(info));
        Ok(outcome)
    }

    fn update_floodfill_membership(&self, id: &IdentHash, info: &Arc<PeerInfo>) {
        if info.is_floodfill() {
            self.floodfills.insert(*id, info.clone());
        } else if self.floodfills.remove(id).is_some() {
            debug!(peer = %id, "Peer no longer advertises floodfill");
        }
    }

    /// A live peer info
    pub fn lookup(&self, id: &IdentHash) -> Option<Arc<PeerInfo>> {
        self.peers
            .get(id)
            .filter(|e| !e.deleted)
            .map(|e| e.info.clone())
    }

    pub fn contains(&self, id: &IdentHash) -> bool {
        self.lookup(id).is_some()
    }

    /// The live peer infos among `ids`
    pub fn find(&self, ids: &[IdentHash]) -> Vec<Arc<PeerInfo>> {
        ids.iter().filter_map(|id| self.lookup(id)).collect()
    }

    /// Snapshot of live peers matching `predicate`
    pub fn find_peers<F>(&self, predicate: F) -> Vec<Arc<PeerInfo>>
    where
        F: Fn(&PeerInfo) -> bool,
    {
        self.peers
            .iter()
            .filter(|e| !e.deleted && predicate(&e.info))
            .map(|e| e.info.clone())
            .collect()
    }

    pub fn floodfills(&self) -> Vec<Arc<PeerInfo>> {
        self.floodfills.iter().map(|e| e.value().clone()).collect()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.iter().filter(|e| !e.deleted).count()
    }

    pub fn floodfill_count(&self) -> usize {
        self.floodfills.len()
    }

    /// Tombstone a peer info; its reputation record is kept
    pub fn remove_peer_info(&self, id: &IdentHash) -> bool {
        let removed = match self.peers.get_mut(id) {
            Some(mut entry) if !entry.deleted => {
                entry.deleted = true;
                self.floodfills.remove(id);
                true
            }
            _ => false,
        };
        if removed {
            debug!(peer = %id, "Removed peer info");
        }
        removed
    }

    pub fn remove_peer_infos(&self, ids: &[IdentHash]) -> usize {
        ids.iter().filter(|id| self.remove_peer_info(id)).count()
    }

    // ========== Lease sets ==========

    /// Offer a lease set
    ///
    /// The lease set with the later end of life wins; ties keep the stored
    /// one. Lease sets whose every lease has expired are ignored.
    pub fn add_lease_set(&self, lease_set: LeaseSet) -> Result<AddOutcome, ValidationError> {
        let key = lease_set.ident_hash();
        let Some(eol) = lease_set.end_of_life() else {
            debug!(destination = %key, "Rejected empty lease set");
            return Err(ValidationError::EmptyLeaseSet);
        };
        if eol <= self.clock.now() {
            trace!(destination = %key, "Ignoring expired lease set");
            return Ok(AddOutcome::Ignored);
        }
        if let Some(existing) = self.lease_sets.get(&key) {
            if existing.end_of_life().is_some_and(|current| current >= eol) {
                trace!(destination = %key, "Ignoring older lease set");
                return Ok(AddOutcome::Ignored);
            }
        }
        if verify_lease_set(&lease_set).is_err() {
            debug!(destination = %key, "Rejected lease set with bad signature");
            return Err(ValidationError::BadSignature);
        }

        let lease_set = Arc::new(lease_set);
        let mut replaced = false;
        let accepted = self.lease_sets.insert_if(key, lease_set.clone(), |current| match current {
            None => true,
            Some(current) => {
                replaced = true;
                current.end_of_life().is_none_or(|current| eol > current)
            }
        });
        if !accepted {
            return Ok(AddOutcome::Ignored);
        }

        debug!(destination = %key, leases = lease_set.leases().len(), "Lease set updated");
        self.notify(DirectoryEvent::LeaseSetUpdated(lease_set.clone()));
        self.resolver.complete_lease_set(&key, Some(lease_set));
        Ok(if replaced {
            AddOutcome::Replaced
        } else {
            AddOutcome::Inserted
        })
    }

    /// A cached lease set, until it falls past the eviction horizon
    pub fn find_lease_set(&self, key: &IdentHash) -> Option<Arc<LeaseSet>> {
        self.lease_sets.get(key)
    }

    pub fn lease_set_count(&self) -> usize {
        self.lease_sets.len()
    }

    // ========== Lookups and publication ==========

    /// Resolve a lease set, from the cache or through the lookup protocol
    ///
    /// A cached answer runs `callback` before this returns.
    pub fn resolve_lease_set(&self, key: IdentHash, callback: LookupCallback<LeaseSet>) {
        match self.find_lease_set(&key) {
            Some(lease_set) => callback(key, Some(lease_set)),
            None => self.resolver.register_lease_set(key, callback),
        }
    }

    /// Ask the network for a lease set even when one is cached
    ///
    /// Used to refresh lease sets that are about to run out.
    pub fn request_lease_set(&self, key: IdentHash, callback: LookupCallback<LeaseSet>) {
        self.resolver.register_lease_set(key, callback);
    }

    /// Resolve a peer info, from the table or through the lookup protocol
    pub fn resolve_peer_info(&self, key: IdentHash, callback: LookupCallback<PeerInfo>) {
        match self.lookup(&key) {
            Some(info) => callback(key, Some(info)),
            None => self.resolver.register_peer_info(key, callback),
        }
    }

    /// Lookups waiting or in flight
    pub fn pending_lookups(&self) -> usize {
        self.resolver.pending()
    }

    /// Start protocol calls for waiting lookups
    pub fn dispatch_lookups(self: &Arc<Self>) {
        resolver::dispatch(self);
    }

    /// Forward an unsolicited search reply to subscribers
    pub fn add_search_reply(&self, reply: DatabaseSearchReply) {
        trace!(key = %reply.key, from = %reply.from, peers = reply.peers.len(), "Search reply");
        self.notify(DirectoryEvent::SearchReplyReceived(reply));
    }

    /// Queue a lease set for floodfill publication
    pub fn publish_lease_set(&self, lease_set: Arc<LeaseSet>) {
        self.floodfill.enqueue(PublishRecord::LeaseSet(lease_set));
    }

    /// Queue a peer info for floodfill publication
    pub fn publish_peer_info(&self, info: Arc<PeerInfo>) {
        self.floodfill.enqueue(PublishRecord::PeerInfo(info));
    }

    /// Handle a delivery status; returns whether it confirmed a floodfill store
    pub fn handle_delivery_status(&self, token: u32) -> bool {
        match self.floodfill.confirm(token) {
            Some(floodfill) => {
                self.reputation
                    .record_outcome(&floodfill, Outcome::FloodfillUpdateSuccess);
                true
            }
            None => false,
        }
    }

    /// Records waiting for a floodfill
    pub fn queued_publications(&self) -> usize {
        self.floodfill.queued()
    }

    /// Push queued records and retry unconfirmed stores
    pub async fn run_floodfill(&self) {
        self.floodfill.run(self).await;
    }

    // ========== Selection ==========

    /// Draw one peer, weighted by score
    pub fn select_peer(&self, kind: PoolKind) -> Result<Arc<PeerInfo>, SelectionError> {
        let pools = self.pools.read().clone();
        pools.pool(kind).sample().cloned()
    }

    /// Draw up to `n` peers, weighted by score
    pub fn select_peers(&self, kind: PoolKind, n: usize, distinct: bool) -> Vec<Arc<PeerInfo>> {
        let pools = self.pools.read().clone();
        pools
            .pool(kind)
            .sample_many(n, distinct)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn pool_size(&self, kind: PoolKind) -> usize {
        self.pools.read().pool(kind).len()
    }

    /// Rescore every peer and rebuild the three selection pools
    pub fn update_selection_pools(&self) {
        let peers: Vec<Arc<PeerInfo>> = self
            .peers
            .iter()
            .filter(|e| !e.deleted && *e.key() != self.local)
            .map(|e| e.info.clone())
            .collect();
        for info in &peers {
            self.reputation.get(&info.ident_hash());
        }
        self.reputation.update_score();

        let weighted: Vec<(Arc<PeerInfo>, f64)> = peers
            .into_iter()
            .filter(|info| info.has_host())
            .map(|info| {
                let score = self.reputation.score(&info.ident_hash());
                (info, score)
            })
            .collect();

        let pools = SelectionPools {
            floodfill: WeightedSelector::new(
                weighted
                    .iter()
                    .filter(|(info, _)| info.is_floodfill())
                    .cloned(),
            ),
            non_floodfill: WeightedSelector::new(
                weighted
                    .iter()
                    .filter(|(info, _)| !info.is_floodfill())
                    .cloned(),
            ),
            all: WeightedSelector::new(weighted),
        };

        for (name, pool) in [
            ("all", &pools.all),
            ("floodfill", &pools.floodfill),
            ("non_floodfill", &pools.non_floodfill),
        ] {
            let stats = pool.stats();
            debug!(
                pool = name,
                count = stats.count,
                total = stats.total,
                max = stats.max,
                mean = stats.mean,
                "Rebuilt selection pool"
            );
        }
        *self.pools.write() = Arc::new(pools);
    }

    // ========== Persistence ==========

    /// Load peer infos and reputation records
    ///
    /// Invalid, foreign, and superseded peer records are deleted from the
    /// store. Old reputation records are pruned and peers classified
    /// inactive are tombstoned.
    pub fn load(&self) -> DirectoryResult<usize> {
        for id in self.peer_store.ids()? {
            let data = self.peer_store.read(id)?;
            let info = match decode_record::<PeerInfo>(RecordKind::PEER_INFO, &data) {
                Ok(Some(info)) => info,
                Ok(None) => {
                    debug!(record = id.0, "Deleting record of unknown kind");
                    self.peer_store.delete(id)?;
                    continue;
                }
                Err(e) => {
                    warn!(record = id.0, error = %e, "Deleting unreadable peer info record");
                    self.peer_store.delete(id)?;
                    continue;
                }
            };
            if info.validate_structure(self.config.use_ipv6).is_err() || verify_peer_info(&info).is_err() {
                warn!(record = id.0, peer = %info.ident_hash(), "Deleting invalid stored peer info");
                self.peer_store.delete(id)?;
                continue;
            }

            let info = Arc::new(info);
            let obsolete = match self.peers.entry(info.ident_hash()) {
                Entry::Vacant(vacant) => {
                    vacant.insert(PeerEntry {
                        info,
                        deleted: false,
                        dirty: false,
                        store_id: Some(id),
                    });
                    None
                }
                Entry::Occupied(mut occupied) => {
                    if info.published > occupied.get().info.published {
                        let previous = occupied.get().store_id;
                        occupied.insert(PeerEntry {
                            info,
                            deleted: false,
                            dirty: false,
                            store_id: Some(id),
                        });
                        previous
                    } else {
                        Some(id)
                    }
                }
            };
            if let Some(obsolete) = obsolete {
                self.peer_store.delete(obsolete)?;
            }
        }

        for entry in self.peers.iter() {
            if entry.info.is_floodfill() {
                self.floodfills.insert(*entry.key(), entry.info.clone());
            }
        }

        self.reputation.load()?;
        self.reputation
            .prune_older_than(self.config.reputation_retention_days)?;
        let inactive = self.reputation.inactive_set();
        for id in &inactive {
            self.remove_peer_info(id);
            self.reputation.remove(id);
        }

        let peers = self.peer_count();
        info!(
            peers,
            floodfills = self.floodfill_count(),
            reputations = self.reputation.len(),
            inactive = inactive.len(),
            "Loaded network directory"
        );
        Ok(peers)
    }

    /// Expire old peers, then persist peer infos and reputation records
    pub fn save(&self) -> DirectoryResult<DirectorySaveSummary> {
        let mut summary = DirectorySaveSummary {
            expired: self.expire_peer_infos(),
            ..Default::default()
        };

        // Collect the work under the entry locks, do the I/O outside them
        let mut deleted = Vec::new();
        let mut dirty = Vec::new();
        for mut entry in self.peers.iter_mut() {
            if entry.deleted {
                deleted.push((*entry.key(), entry.info.clone(), entry.store_id));
            } else if entry.dirty {
                entry.dirty = false;
                dirty.push((*entry.key(), entry.info.clone(), entry.store_id));
            }
        }

        for (key, info, store_id) in deleted {
            if let Some(id) = store_id {
                self.peer_store.delete(id)?;
            }
            self.peers
                .remove_if(&key, |_, e| e.deleted && Arc::ptr_eq(&e.info, &info));
            summary.peers.deleted += 1;
        }

        for (key, info, store_id) in dirty {
            let written = encode_record(RecordKind::PEER_INFO, info.as_ref())
                .and_then(|data| self.peer_store.write(&data, store_id));
            let id = match written {
                Ok(id) => id,
                Err(e) => {
                    if let Some(mut entry) = self.peers.get_mut(&key) {
                        entry.dirty = true;
                    }
                    return Err(e.into());
                }
            };
            if store_id.is_some() {
                summary.peers.updated += 1;
            } else {
                summary.peers.created += 1;
            }

            let orphaned = match self.peers.get_mut(&key) {
                Some(mut entry) => {
                    if entry.store_id.is_none() {
                        entry.store_id = Some(id);
                    }
                    false
                }
                None => true,
            };
            if orphaned {
                self.peer_store.delete(id)?;
            }
        }

        summary.reputation = self.reputation.save()?;
        debug!(
            expired = summary.expired,
            peers_created = summary.peers.created,
            peers_updated = summary.peers.updated,
            peers_deleted = summary.peers.deleted,
            "Saved network directory"
        );
        Ok(summary)
    }

    /// Tombstone peers published longer ago than the expiry, as long as
    /// enough peers are known
    fn expire_peer_infos(&self) -> usize {
        if self.peer_count() <= self.config.min_retained_peers {
            return 0;
        }
        let expiry = Duration::from_std(self.config.peer_info_expiry).unwrap_or(Duration::MAX);
        let cutoff = self.clock.now() - expiry;
        let expired: Vec<IdentHash> = self
            .peers
            .iter()
            .filter(|e| !e.deleted && e.info.published < cutoff && *e.key() != self.local)
            .map(|e| *e.key())
            .collect();
        let count = self.remove_peer_infos(&expired);
        if count > 0 {
            debug!(expired = count, "Expired old peer infos");
        }
        count
    }

    /// One slow maintenance cycle: save, prune lease sets, rebuild pools
    ///
    /// The pools are rebuilt even when the save fails.
    pub fn run_maintenance(&self) -> DirectoryResult<DirectorySaveSummary> {
        let saved = self.save();
        let pruned = self.lease_sets.prune();
        if pruned > 0 {
            debug!(pruned, "Pruned expired lease sets");
        }
        self.update_selection_pools();
        saved
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;
    use sable_core::{
        Lease, LeaseSetBuilder, ManualClock, MockLookup, MockTransport, PeerAddress, TransportStyle,
        TunnelId,
    };
    use sable_crypto::{DestinationKeys, RouterKeys, sign_lease_set, sign_peer_info};

    use super::*;

    fn directory() -> (NetworkDirectory, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let deps = DirectoryDeps::in_memory(
            IdentHash::new([0; 32]),
            Arc::new(MockTransport::new()),
            Arc::new(MockLookup::new()),
        )
        .with_clock(clock.clone());
        (NetworkDirectory::new(DirectoryConfig::testing(), deps), clock)
    }

    fn peer_info(keys: &RouterKeys, caps: &str, published: chrono::DateTime<Utc>) -> PeerInfo {
        let mut options = BTreeMap::new();
        options.insert("caps".to_string(), caps.to_string());
        let info = PeerInfo::unsigned(
            keys.identity(),
            published,
            options,
            vec![PeerAddress::new(TransportStyle::Ntcp, "10.0.0.1", 7000)],
        );
        sign_peer_info(info, &keys.signing).unwrap()
    }

    #[test]
    fn test_floodfill_membership_follows_caps() {
        let (dir, clock) = directory();
        let keys = RouterKeys::generate();
        let id = keys.ident_hash();

        dir.add_peer_info(peer_info(&keys, "fR", clock.now())).unwrap();
        assert_eq!(dir.floodfill_count(), 1);

        let later = clock.now() + Duration::seconds(10);
        assert_eq!(
            dir.add_peer_info(peer_info(&keys, "R", later)).unwrap(),
            AddOutcome::Replaced
        );
        assert_eq!(dir.floodfill_count(), 0);
        assert!(dir.contains(&id));
    }

    #[test]
    fn test_skew_tolerance() {
        let (dir, clock) = directory();
        let keys = RouterKeys::generate();
        let now = clock.now();
        dir.add_peer_info(peer_info(&keys, "R", now)).unwrap();
        assert_eq!(
            dir.add_peer_info(peer_info(&keys, "R", now + Duration::seconds(2))).unwrap(),
            AddOutcome::Ignored
        );
        assert_eq!(
            dir.add_peer_info(peer_info(&keys, "R", now + Duration::seconds(3))).unwrap(),
            AddOutcome::Replaced
        );
    }

    #[test]
    fn test_structural_rejections() {
        let (dir, clock) = directory();
        let keys = RouterKeys::generate();
        let info = PeerInfo::unsigned(keys.identity(), clock.now(), BTreeMap::new(), vec![]);
        assert_eq!(
            dir.add_peer_info(sign_peer_info(info, &keys.signing).unwrap()),
            Err(ValidationError::MissingCapabilities)
        );

        let mut options = BTreeMap::new();
        options.insert("caps".to_string(), "R".to_string());
        let v6_only = PeerInfo::unsigned(
            keys.identity(),
            clock.now(),
            options,
            vec![PeerAddress::new(TransportStyle::Ssu, "fe80::1", 7000)],
        );
        assert_eq!(
            dir.add_peer_info(sign_peer_info(v6_only, &keys.signing).unwrap()),
            Err(ValidationError::NoIpv4Address)
        );
        assert_eq!(dir.peer_count(), 0);
    }

    #[test]
    fn test_firewalled_peer_marked() {
        let (dir, clock) = directory();
        let keys = RouterKeys::generate();
        let mut options = BTreeMap::new();
        options.insert("caps".to_string(), "R".to_string());
        let info = PeerInfo::unsigned(
            keys.identity(),
            clock.now(),
            options,
            vec![
                PeerAddress::new(TransportStyle::Ssu, "10.0.0.2", 7001)
                    .with_option("ihost0", "10.9.9.9"),
            ],
        );
        dir.add_peer_info(sign_peer_info(info, &keys.signing).unwrap())
            .unwrap();
        assert!(dir.reputation().get(&keys.ident_hash()).is_firewalled());
    }

    #[test]
    fn test_remove_tombstones_and_keeps_reputation() {
        let (dir, clock) = directory();
        let keys = RouterKeys::generate();
        let id = keys.ident_hash();
        dir.add_peer_info(peer_info(&keys, "fR", clock.now())).unwrap();
        dir.reputation().record_outcome(&id, Outcome::SuccessfulConnect);

        assert!(dir.remove_peer_info(&id));
        assert!(!dir.remove_peer_info(&id));
        assert!(dir.lookup(&id).is_none());
        assert_eq!(dir.floodfill_count(), 0);
        assert!(dir.find_peers(|_| true).is_empty());
        assert!(dir.reputation().contains(&id));
    }

    #[test]
    fn test_selection_pools_split_by_floodfill() {
        let (dir, clock) = directory();
        for caps in ["fR", "fR", "R", "R", "R"] {
            let keys = RouterKeys::generate();
            dir.add_peer_info(peer_info(&keys, caps, clock.now())).unwrap();
        }
        assert!(dir.select_peer(PoolKind::All).is_err());

        dir.update_selection_pools();
        assert_eq!(dir.pool_size(PoolKind::All), 5);
        assert_eq!(dir.pool_size(PoolKind::Floodfill), 2);
        assert_eq!(dir.pool_size(PoolKind::NonFloodfill), 3);
        assert!(dir.select_peer(PoolKind::Floodfill).unwrap().is_floodfill());
        assert_eq!(dir.select_peers(PoolKind::NonFloodfill, 10, true).len(), 3);
    }

    #[test]
    fn test_faulty_peer_leaves_pools() {
        let (dir, clock) = directory();
        let keys = RouterKeys::generate();
        dir.add_peer_info(peer_info(&keys, "R", clock.now())).unwrap();
        dir.reputation()
            .record_outcome(&keys.ident_hash(), Outcome::InformationFaulty);
        dir.update_selection_pools();
        assert_eq!(dir.pool_size(PoolKind::All), 0);
        assert_eq!(dir.select_peer(PoolKind::All), Err(SelectionError::EmptyPool));
    }

    fn lease_set(keys: &DestinationKeys, expires: chrono::DateTime<Utc>) -> LeaseSet {
        let mut builder = LeaseSetBuilder::new(keys.destination(), keys.encryption.public_key());
        builder.add_lease(Lease {
            gateway: IdentHash::new([5; 32]),
            tunnel_id: TunnelId(1),
            expires,
        });
        sign_lease_set(&builder, &keys.signing).unwrap()
    }

    #[test]
    fn test_lease_set_ties_keep_existing() {
        let (dir, clock) = directory();
        let keys = DestinationKeys::generate();
        let expires = clock.now() + Duration::minutes(10);
        let first = lease_set(&keys, expires);
        assert_eq!(dir.add_lease_set(first.clone()).unwrap(), AddOutcome::Inserted);
        assert_eq!(dir.add_lease_set(lease_set(&keys, expires)).unwrap(), AddOutcome::Ignored);
        assert_eq!(*dir.find_lease_set(&first.ident_hash()).unwrap(), first);
    }

    #[test]
    fn test_expired_lease_set_ignored() {
        let (dir, clock) = directory();
        let keys = DestinationKeys::generate();
        let stale = lease_set(&keys, clock.now() - Duration::seconds(1));
        assert_eq!(dir.add_lease_set(stale).unwrap(), AddOutcome::Ignored);
        assert_eq!(dir.lease_set_count(), 0);
    }

    #[test]
    fn test_resolve_cached_lease_set_runs_immediately() {
        let (dir, clock) = directory();
        let keys = DestinationKeys::generate();
        let ls = lease_set(&keys, clock.now() + Duration::minutes(10));
        let key = ls.ident_hash();
        dir.add_lease_set(ls).unwrap();

        let hit = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = hit.clone();
        dir.resolve_lease_set(
            key,
            Box::new(move |_, found| {
                flag.store(found.is_some(), std::sync::atomic::Ordering::SeqCst)
            }),
        );
        assert!(hit.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(dir.pending_lookups(), 0);
    }

    #[test]
    fn test_delivery_status_credits_unknown_token_not() {
        let (dir, _) = directory();
        assert!(!dir.handle_delivery_status(99));
    }
}
