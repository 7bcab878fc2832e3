//! Remote destination cache
//!
//! One entry per remote this session talks to: the remote's lease set, when
//! we last sent to it, when we last pushed our own lease set to it, and how
//! many lookups for it failed in a row.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use sable_core::{Garlic, GarlicMessage, IdentHash, LeaseSet};
use sable_crypto::CryptoResult;
use tracing::debug;

use crate::context::GarlicContext;

#[derive(Debug, Clone)]
pub struct RemoteEntry {
    pub lease_set: Arc<LeaseSet>,
    pub added: DateTime<Utc>,
    pub last_use: Option<DateTime<Utc>>,
    pub last_push: Option<DateTime<Utc>>,
    pub lookup_failures: u32,
    /// The remote should get our current lease set
    pub needs_push: bool,
    pub context: GarlicContext,
}

impl RemoteEntry {
    fn new(lease_set: Arc<LeaseSet>, now: DateTime<Utc>) -> Self {
        let context = GarlicContext::new(*lease_set.encryption_key(), now);
        Self {
            lease_set,
            added: now,
            last_use: None,
            last_push: None,
            lookup_failures: 0,
            needs_push: true,
            context,
        }
    }

    fn last_activity(&self) -> DateTime<Utc> {
        self.last_use.unwrap_or(self.added)
    }
}

#[derive(Default)]
pub struct RemoteDestinations {
    entries: DashMap<IdentHash, RemoteEntry>,
}

impl RemoteDestinations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &IdentHash) -> bool {
        self.entries.contains_key(key)
    }

    pub fn entry(&self, key: &IdentHash) -> Option<RemoteEntry> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    /// The cached lease set if any of its leases is still unexpired
    pub fn usable_lease_set(&self, key: &IdentHash, now: DateTime<Utc>) -> Option<Arc<LeaseSet>> {
        self.entries
            .get(key)
            .filter(|e| e.lease_set.expires_after(now, Duration::zero()))
            .map(|e| e.lease_set.clone())
    }

    /// The cached lease set if it outlives `freshness`
    pub fn fresh_lease_set(
        &self,
        key: &IdentHash,
        now: DateTime<Utc>,
        freshness: Duration,
    ) -> Option<Arc<LeaseSet>> {
        self.entries
            .get(key)
            .filter(|e| e.lease_set.expires_after(now, freshness))
            .map(|e| e.lease_set.clone())
    }

    /// Install a lease set for its destination
    ///
    /// An older lease set than the cached one is ignored. Accepting a lease
    /// set clears the lookup failure count.
    pub fn update(&self, lease_set: Arc<LeaseSet>, now: DateTime<Utc>) {
        let key = lease_set.ident_hash();
        self.entries
            .entry(key)
            .and_modify(|entry| {
                if lease_set.end_of_life() >= entry.lease_set.end_of_life() {
                    entry.context.rebind(*lease_set.encryption_key(), now);
                    entry.lease_set = lease_set.clone();
                }
                entry.lookup_failures = 0;
            })
            .or_insert_with(|| RemoteEntry::new(lease_set.clone(), now));
    }

    /// Replace the lease set of an already cached remote only
    pub fn update_existing(&self, lease_set: Arc<LeaseSet>, now: DateTime<Utc>) -> bool {
        if !self.entries.contains_key(&lease_set.ident_hash()) {
            return false;
        }
        self.update(lease_set, now);
        true
    }

    pub fn record_use(&self, key: &IdentHash, now: DateTime<Utc>) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.last_use = Some(now);
        }
    }

    /// Count a failed lookup, returning the failures so far
    pub fn lookup_failed(&self, key: &IdentHash) -> u32 {
        match self.entries.get_mut(key) {
            Some(mut entry) => {
                entry.lookup_failures += 1;
                entry.lookup_failures
            }
            None => 0,
        }
    }

    pub fn forget(&self, key: &IdentHash) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn needs_push(&self, key: &IdentHash) -> bool {
        self.entries.get(key).is_some_and(|e| e.needs_push)
    }

    pub fn mark_pushed(&self, key: &IdentHash, now: DateTime<Utc>) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.needs_push = false;
            entry.last_push = Some(now);
        }
    }

    /// Our lease set changed; every remote should get the new one
    pub fn mark_all_need_push(&self) {
        for mut entry in self.entries.iter_mut() {
            entry.needs_push = true;
        }
    }

    /// Seal a garlic for a cached remote with its context
    pub fn seal(&self, key: &IdentHash, garlic: &Garlic) -> Option<CryptoResult<GarlicMessage>> {
        self.entries
            .get_mut(key)
            .map(|mut entry| entry.context.seal(garlic))
    }

    /// Remotes owed our lease set, least recently pushed first
    ///
    /// A remote unused for longer than `inactivity` gets no more pushes.
    pub fn destinations_to_update(
        &self,
        now: DateTime<Utc>,
        inactivity: Duration,
        limit: usize,
    ) -> Vec<IdentHash> {
        let mut candidates: Vec<(Option<DateTime<Utc>>, IdentHash)> = self
            .entries
            .iter()
            .filter(|e| e.needs_push && now - e.last_activity() <= inactivity)
            .map(|e| (e.last_push, *e.key()))
            .collect();
        // None sorts before Some, so never-pushed remotes come first
        candidates.sort();
        candidates.into_iter().take(limit).map(|(_, key)| key).collect()
    }

    /// Forget remotes without live leases or idle past the retention
    ///
    /// The retention is twice the inactivity limit plus one tunnel lifetime.
    pub fn maintain(
        &self,
        now: DateTime<Utc>,
        inactivity: Duration,
        tunnel_lifetime: Duration,
    ) -> usize {
        let retention = inactivity * 2 + tunnel_lifetime;
        let before = self.entries.len();
        self.entries.retain(|key, entry| {
            let keep = !entry.lease_set.live_leases(now).is_empty()
                && now - entry.last_activity() <= retention;
            if !keep {
                debug!(remote = %key, "Forgetting remote destination");
            }
            keep
        });
        before.saturating_sub(self.entries.len())
    }
}
