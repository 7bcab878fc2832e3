//! Peer reputation engine
//!
//! The [`PeerReputationStore`] keeps one [`PeerReputation`] per peer the
//! router has observed. Counters are plain atomics so that transport,
//! tunnel, and directory code can report outcomes from any task without
//! taking a lock; [`PeerReputationStore::update_score`] later folds them
//! into a single score that the selection pools use as weight.
//!
//! ## Score
//!
//! With `r(s, f) = (s + 1) / (s + f + 2)`:
//!
//! ```text
//! base    = 0.4 * r(connects) + 0.4 * r(tunnel) + 0.2 * r(floodfill)
//! latency = 1 / (1 + build_ms / 2000)         (1 without a sample)
//! score   = base * latency * 0.75 if firewalled * 0.1 if inactive
//! ```
//!
//! A tombstoned peer, or one that ever sent faulty information, scores 0.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use sable_core::{Clock, IdentHash};
use sable_storage::{
    RecordId, RecordKind, RecordStore, StorageResult, decode_record, encode_record,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

/// Observable outcome of an interaction with a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    SuccessfulConnect,
    FailedConnect,
    /// The peer sent routing data that was provably wrong
    InformationFaulty,
    SlowHandshake,
    SuccessfulTunnelMember,
    FailedTunnelMember,
    DeclinedTunnelMember,
    SuccessfulTunnelTest,
    FailedTunnelTest,
    TunnelBuildTimeout,
    FloodfillUpdateSuccess,
    FloodfillUpdateTimeout,
}

impl Outcome {
    pub const COUNT: usize = 12;

    pub const ALL: [Outcome; Outcome::COUNT] = [
        Outcome::SuccessfulConnect,
        Outcome::FailedConnect,
        Outcome::InformationFaulty,
        Outcome::SlowHandshake,
        Outcome::SuccessfulTunnelMember,
        Outcome::FailedTunnelMember,
        Outcome::DeclinedTunnelMember,
        Outcome::SuccessfulTunnelTest,
        Outcome::FailedTunnelTest,
        Outcome::TunnelBuildTimeout,
        Outcome::FloodfillUpdateSuccess,
        Outcome::FloodfillUpdateTimeout,
    ];

    fn index(self) -> usize {
        self as usize
    }

    /// Whether the outcome shows the peer is alive and cooperating
    pub fn is_success(self) -> bool {
        matches!(
            self,
            Outcome::SuccessfulConnect
                | Outcome::SuccessfulTunnelMember
                | Outcome::SuccessfulTunnelTest
                | Outcome::FloodfillUpdateSuccess
        )
    }
}

/// Point-in-time copy of a peer's outcome counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReputationCounters {
    pub successful_connects: u32,
    pub failed_connects: u32,
    pub information_faulty: u32,
    pub slow_handshakes: u32,
    pub successful_tunnel_members: u32,
    pub failed_tunnel_members: u32,
    pub declined_tunnel_members: u32,
    pub successful_tunnel_tests: u32,
    pub failed_tunnel_tests: u32,
    pub tunnel_build_timeouts: u32,
    pub floodfill_update_successes: u32,
    pub floodfill_update_timeouts: u32,
}

impl ReputationCounters {
    fn slot(&mut self, outcome: Outcome) -> &mut u32 {
        match outcome {
            Outcome::SuccessfulConnect => &mut self.successful_connects,
            Outcome::FailedConnect => &mut self.failed_connects,
            Outcome::InformationFaulty => &mut self.information_faulty,
            Outcome::SlowHandshake => &mut self.slow_handshakes,
            Outcome::SuccessfulTunnelMember => &mut self.successful_tunnel_members,
            Outcome::FailedTunnelMember => &mut self.failed_tunnel_members,
            Outcome::DeclinedTunnelMember => &mut self.declined_tunnel_members,
            Outcome::SuccessfulTunnelTest => &mut self.successful_tunnel_tests,
            Outcome::FailedTunnelTest => &mut self.failed_tunnel_tests,
            Outcome::TunnelBuildTimeout => &mut self.tunnel_build_timeouts,
            Outcome::FloodfillUpdateSuccess => &mut self.floodfill_update_successes,
            Outcome::FloodfillUpdateTimeout => &mut self.floodfill_update_timeouts,
        }
    }

    pub fn get(&self, outcome: Outcome) -> u32 {
        let mut copy = *self;
        *copy.slot(outcome)
    }

    /// Set one counter, for building fixtures and restoring records
    pub fn with(mut self, outcome: Outcome, value: u32) -> Self {
        *self.slot(outcome) = value;
        self
    }

    /// Faulty data, or failures that dominate successes
    pub fn is_inactive(&self) -> bool {
        self.information_faulty > 0
            || (self.failed_tunnel_tests > 8
                && self.failed_tunnel_tests > 3 * self.successful_tunnel_tests)
            || (self.failed_connects > 5 && self.failed_connects > 3 * self.successful_connects)
    }
}

/// Persisted form of a [`PeerReputation`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReputationSnapshot {
    pub identity: IdentHash,
    pub created: DateTime<Utc>,
    pub last_seen: Option<DateTime<Utc>>,
    pub counters: ReputationCounters,
    pub tunnel_build_time_ms: Option<f64>,
    pub max_bandwidth_seen: u64,
    pub is_firewalled: bool,
}

const NO_BUILD_SAMPLE: u64 = u64::MAX;
const NO_STORE_ID: u64 = 0;

/// Live reputation record of one peer
#[derive(Debug)]
pub struct PeerReputation {
    identity: IdentHash,
    created: DateTime<Utc>,
    counters: [AtomicU32; Outcome::COUNT],
    /// f64 bits, or [`NO_BUILD_SAMPLE`]
    tunnel_build_time_ms: AtomicU64,
    max_bandwidth_seen: AtomicU64,
    is_firewalled: AtomicBool,
    /// Milliseconds since the epoch, 0 when never seen
    last_seen_ms: AtomicI64,
    dirty: AtomicBool,
    deleted: AtomicBool,
    score: AtomicU64,
    store_id: AtomicU64,
}

impl PeerReputation {
    fn new(identity: IdentHash, created: DateTime<Utc>) -> Self {
        Self {
            identity,
            created,
            counters: std::array::from_fn(|_| AtomicU32::new(0)),
            tunnel_build_time_ms: AtomicU64::new(NO_BUILD_SAMPLE),
            max_bandwidth_seen: AtomicU64::new(0),
            is_firewalled: AtomicBool::new(false),
            last_seen_ms: AtomicI64::new(0),
            dirty: AtomicBool::new(true),
            deleted: AtomicBool::new(false),
            score: AtomicU64::new(0f64.to_bits()),
            store_id: AtomicU64::new(NO_STORE_ID),
        }
    }

    fn from_snapshot(snapshot: &ReputationSnapshot, id: RecordId) -> Self {
        let record = Self::new(snapshot.identity, snapshot.created);
        for outcome in Outcome::ALL {
            record.counters[outcome.index()].store(snapshot.counters.get(outcome), Ordering::Relaxed);
        }
        if let Some(ms) = snapshot.tunnel_build_time_ms {
            record.tunnel_build_time_ms.store(ms.to_bits(), Ordering::Relaxed);
        }
        record
            .max_bandwidth_seen
            .store(snapshot.max_bandwidth_seen, Ordering::Relaxed);
        record
            .is_firewalled
            .store(snapshot.is_firewalled, Ordering::Relaxed);
        if let Some(seen) = snapshot.last_seen {
            record.last_seen_ms.store(seen.timestamp_millis(), Ordering::Relaxed);
        }
        record.store_id.store(id.0, Ordering::Relaxed);
        record.dirty.store(false, Ordering::Relaxed);
        record
    }

    pub fn identity(&self) -> &IdentHash {
        &self.identity
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn counters(&self) -> ReputationCounters {
        Outcome::ALL
            .iter()
            .fold(ReputationCounters::default(), |acc, outcome| {
                acc.with(*outcome, self.counters[outcome.index()].load(Ordering::Relaxed))
            })
    }

    pub fn count(&self, outcome: Outcome) -> u32 {
        self.counters[outcome.index()].load(Ordering::Relaxed)
    }

    /// Smoothed tunnel build latency
    pub fn tunnel_build_time_ms(&self) -> Option<f64> {
        let bits = self.tunnel_build_time_ms.load(Ordering::Relaxed);
        (bits != NO_BUILD_SAMPLE).then(|| f64::from_bits(bits))
    }

    pub fn max_bandwidth_seen(&self) -> u64 {
        self.max_bandwidth_seen.load(Ordering::Relaxed)
    }

    pub fn is_firewalled(&self) -> bool {
        self.is_firewalled.load(Ordering::Relaxed)
    }

    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        match self.last_seen_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Score computed by the last [`PeerReputationStore::update_score`]
    pub fn score(&self) -> f64 {
        f64::from_bits(self.score.load(Ordering::Relaxed))
    }

    pub fn snapshot(&self) -> ReputationSnapshot {
        ReputationSnapshot {
            identity: self.identity,
            created: self.created,
            last_seen: self.last_seen(),
            counters: self.counters(),
            tunnel_build_time_ms: self.tunnel_build_time_ms(),
            max_bandwidth_seen: self.max_bandwidth_seen(),
            is_firewalled: self.is_firewalled(),
        }
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    fn tombstone(&self) {
        self.deleted.store(true, Ordering::Release);
        self.score.store(0f64.to_bits(), Ordering::Relaxed);
    }

    fn store_id(&self) -> Option<RecordId> {
        match self.store_id.load(Ordering::Acquire) {
            NO_STORE_ID => None,
            id => Some(RecordId(id)),
        }
    }
}

fn ratio(successes: u32, failures: u32) -> f64 {
    (f64::from(successes) + 1.0) / (f64::from(successes) + f64::from(failures) + 2.0)
}

/// Score of a record; pure function of its current values
pub fn compute_score(record: &PeerReputation) -> f64 {
    let counters = record.counters();
    if record.is_deleted() || counters.information_faulty > 0 {
        return 0.0;
    }

    let connects = ratio(counters.successful_connects, counters.failed_connects);
    let tunnel = ratio(
        counters.successful_tunnel_members + counters.successful_tunnel_tests,
        counters.failed_tunnel_members
            + counters.failed_tunnel_tests
            + counters.declined_tunnel_members
            + counters.tunnel_build_timeouts,
    );
    let floodfill = ratio(
        counters.floodfill_update_successes,
        counters.floodfill_update_timeouts,
    );

    let mut score = 0.4 * connects + 0.4 * tunnel + 0.2 * floodfill;
    if let Some(ms) = record.tunnel_build_time_ms() {
        score /= 1.0 + ms.max(0.0) / 2000.0;
    }
    if record.is_firewalled() {
        score *= 0.75;
    }
    if counters.is_inactive() {
        score *= 0.1;
    }
    score
}

/// What a [`PeerReputationStore::save`] did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveSummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
}

/// Table of peer reputations backed by a record store
pub struct PeerReputationStore {
    records: DashMap<IdentHash, Arc<PeerReputation>>,
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
}

impl PeerReputationStore {
    pub fn new(store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            records: DashMap::new(),
            store,
            clock,
        }
    }

    /// The record for `identity`, created zeroed if absent
    pub fn get(&self, identity: &IdentHash) -> Arc<PeerReputation> {
        if let Some(record) = self.records.get(identity) {
            return record.clone();
        }
        let now = self.clock.now();
        self.records
            .entry(*identity)
            .or_insert_with(|| Arc::new(PeerReputation::new(*identity, now)))
            .clone()
    }

    /// The record for `identity` without creating one
    pub fn find(&self, identity: &IdentHash) -> Option<Arc<PeerReputation>> {
        self.records.get(identity).map(|r| r.clone())
    }

    pub fn contains(&self, identity: &IdentHash) -> bool {
        self.records.contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Count one outcome; successes also refresh the last-seen time
    pub fn record_outcome(&self, identity: &IdentHash, outcome: Outcome) {
        let record = self.get(identity);
        record.counters[outcome.index()].fetch_add(1, Ordering::Relaxed);
        if outcome.is_success() {
            record
                .last_seen_ms
                .store(self.clock.now().timestamp_millis(), Ordering::Relaxed);
        }
        record.mark_dirty();
        trace!(peer = %identity, ?outcome, "Recorded outcome");
    }

    /// Fold a tunnel build latency sample into the smoothed average
    pub fn record_build_time(&self, identity: &IdentHash, ms: f64) {
        if !ms.is_finite() || ms < 0.0 {
            return;
        }
        let record = self.get(identity);
        let _ = record
            .tunnel_build_time_ms
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                let next = if bits == NO_BUILD_SAMPLE {
                    ms
                } else {
                    (9.0 * f64::from_bits(bits) + ms) / 10.0
                };
                Some(next.to_bits())
            });
        record.mark_dirty();
    }

    /// Remember the highest bandwidth observed for a peer
    pub fn record_bandwidth(&self, identity: &IdentHash, bytes_per_sec: u64) {
        let record = self.get(identity);
        if record
            .max_bandwidth_seen
            .fetch_max(bytes_per_sec, Ordering::Relaxed)
            < bytes_per_sec
        {
            record.mark_dirty();
        }
    }

    pub fn set_firewalled(&self, identity: &IdentHash, firewalled: bool) {
        let record = self.get(identity);
        if record.is_firewalled.swap(firewalled, Ordering::Relaxed) != firewalled {
            record.mark_dirty();
        }
    }

    /// Recompute every score from the current counters
    ///
    /// Works on a snapshot of the table, so writers are never blocked for
    /// the duration of the pass.
    pub fn update_score(&self) {
        let records: Vec<Arc<PeerReputation>> =
            self.records.iter().map(|e| e.value().clone()).collect();
        for record in &records {
            let score = compute_score(record);
            record.score.store(score.to_bits(), Ordering::Relaxed);
        }
        debug!(records = records.len(), "Updated peer scores");
    }

    /// Last computed score, or 0 for unknown peers
    pub fn score(&self, identity: &IdentHash) -> f64 {
        self.records.get(identity).map_or(0.0, |r| r.score())
    }

    pub fn classify_inactive(&self, record: &PeerReputation) -> bool {
        record.counters().is_inactive()
    }

    /// Identities of live records classified inactive
    pub fn inactive_set(&self) -> Vec<IdentHash> {
        self.records
            .iter()
            .filter(|e| !e.value().is_deleted() && self.classify_inactive(e.value()))
            .map(|e| *e.key())
            .collect()
    }

    /// Tombstone a record; it is dropped on the next save
    pub fn remove(&self, identity: &IdentHash) -> bool {
        match self.records.get(identity) {
            Some(record) if !record.is_deleted() => {
                record.tombstone();
                true
            }
            _ => false,
        }
    }

    /// Tombstone records created more than `days` ago, then save
    pub fn prune_older_than(&self, days: u32) -> StorageResult<usize> {
        let cutoff = self.clock.now() - Duration::days(i64::from(days));
        let mut pruned = 0;
        for entry in self.records.iter() {
            let record = entry.value();
            if !record.is_deleted() && record.created < cutoff {
                record.tombstone();
                pruned += 1;
            }
        }
        if pruned > 0 {
            debug!(pruned, days, "Pruned old reputation records");
        }
        self.save()?;
        Ok(pruned)
    }

    /// Load every reputation record from the backing store
    ///
    /// Records of another kind, undecodable records, and duplicates are
    /// deleted from the store.
    pub fn load(&self) -> StorageResult<usize> {
        let mut loaded = 0;
        for id in self.store.ids()? {
            let data = self.store.read(id)?;
            let snapshot = match decode_record::<ReputationSnapshot>(RecordKind::PEER_REPUTATION, &data) {
                Ok(Some(snapshot)) => snapshot,
                Ok(None) => {
                    debug!(record = id.0, "Deleting record of unknown kind");
                    self.store.delete(id)?;
                    continue;
                }
                Err(e) => {
                    warn!(record = id.0, error = %e, "Deleting unreadable reputation record");
                    self.store.delete(id)?;
                    continue;
                }
            };

            if self.records.contains_key(&snapshot.identity) {
                debug!(peer = %snapshot.identity, record = id.0, "Deleting duplicate reputation record");
                self.store.delete(id)?;
                continue;
            }
            let record = Arc::new(PeerReputation::from_snapshot(&snapshot, id));
            self.records.insert(snapshot.identity, record);
            loaded += 1;
        }
        debug!(loaded, "Loaded reputation records");
        Ok(loaded)
    }

    /// Write dirty and new records, and delete tombstoned ones
    pub fn save(&self) -> StorageResult<SaveSummary> {
        let records: Vec<Arc<PeerReputation>> =
            self.records.iter().map(|e| e.value().clone()).collect();
        let mut summary = SaveSummary::default();

        for record in records {
            if record.is_deleted() {
                if let Some(id) = record.store_id() {
                    self.store.delete(id)?;
                }
                self.records
                    .remove_if(&record.identity, |_, r| Arc::ptr_eq(r, &record));
                summary.deleted += 1;
                continue;
            }

            if !record.dirty.swap(false, Ordering::AcqRel) {
                continue;
            }
            let existing = record.store_id();
            let written = encode_record(RecordKind::PEER_REPUTATION, &record.snapshot())
                .and_then(|data| self.store.write(&data, existing));
            match written {
                Ok(id) => {
                    record.store_id.store(id.0, Ordering::Release);
                    if existing.is_some() {
                        summary.updated += 1;
                    } else {
                        summary.created += 1;
                    }
                }
                Err(e) => {
                    record.mark_dirty();
                    return Err(e);
                }
            }
        }

        debug!(
            created = summary.created,
            updated = summary.updated,
            deleted = summary.deleted,
            "Saved reputation records"
        );
        Ok(summary)
    }
}
