//! Pending external lookups
//!
//! Callers register a callback per key. Concurrent requests for the same key
//! share one protocol call, and whatever record reaches the directory for
//! that key (through the lookup or through any other path) completes every
//! waiting callback.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use sable_core::{IdentHash, LeaseSet, LookupProtocol, PeerInfo};
use tracing::{debug, trace};

use crate::directory::NetworkDirectory;

/// Invoked once with the key and the record found, or `None`
pub type LookupCallback<T> = Box<dyn FnOnce(IdentHash, Option<Arc<T>>) + Send>;

struct PendingLookup<T> {
    // Callbacks are Send but not Sync; the mutex keeps the table Sync.
    callbacks: Mutex<Vec<LookupCallback<T>>>,
    in_flight: bool,
}

pub(crate) struct PendingTable<T> {
    entries: DashMap<IdentHash, PendingLookup<T>>,
}

impl<T> PendingTable<T> {
    fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Add a callback, returning true when the key was not pending yet
    fn register(&self, key: IdentHash, callback: LookupCallback<T>) -> bool {
        let mut fresh = false;
        self.entries
            .entry(key)
            .or_insert_with(|| {
                fresh = true;
                PendingLookup {
                    callbacks: Mutex::new(Vec::new()),
                    in_flight: false,
                }
            })
            .callbacks
            .lock()
            .push(callback);
        fresh
    }

    /// Mark up to `limit` waiting keys as in flight and return them
    fn take_queued(&self, limit: usize) -> Vec<IdentHash> {
        let mut taken = Vec::new();
        for mut entry in self.entries.iter_mut() {
            if taken.len() >= limit {
                break;
            }
            if !entry.in_flight {
                entry.in_flight = true;
                taken.push(*entry.key());
            }
        }
        taken
    }

    /// Remove the key and run its callbacks outside the table lock
    fn complete(&self, key: &IdentHash, value: Option<Arc<T>>) -> usize {
        let Some((key, pending)) = self.entries.remove(key) else {
            return 0;
        };
        let callbacks = pending.callbacks.into_inner();
        let count = callbacks.len();
        for callback in callbacks {
            callback(key, value.clone());
        }
        count
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Coalescing front end of the [`LookupProtocol`]
pub struct LookupResolver {
    protocol: Arc<dyn LookupProtocol>,
    lease_sets: PendingTable<LeaseSet>,
    peer_infos: PendingTable<PeerInfo>,
    timeout: Duration,
    max_in_flight: usize,
    in_flight: AtomicUsize,
}

impl LookupResolver {
    pub(crate) fn new(protocol: Arc<dyn LookupProtocol>, timeout: Duration, max_in_flight: usize) -> Self {
        Self {
            protocol,
            lease_sets: PendingTable::new(),
            peer_infos: PendingTable::new(),
            timeout,
            max_in_flight: max_in_flight.max(1),
            in_flight: AtomicUsize::new(0),
        }
    }

    pub(crate) fn register_lease_set(&self, key: IdentHash, callback: LookupCallback<LeaseSet>) {
        if self.lease_sets.register(key, callback) {
            trace!(key = %key, "Queued lease set lookup");
        }
    }

    pub(crate) fn register_peer_info(&self, key: IdentHash, callback: LookupCallback<PeerInfo>) {
        if self.peer_infos.register(key, callback) {
            trace!(key = %key, "Queued peer info lookup");
        }
    }

    pub(crate) fn complete_lease_set(&self, key: &IdentHash, value: Option<Arc<LeaseSet>>) {
        let resolved = self.lease_sets.complete(key, value);
        if resolved > 0 {
            trace!(key = %key, resolved, "Completed lease set callbacks");
        }
    }

    pub(crate) fn complete_peer_info(&self, key: &IdentHash, value: Option<Arc<PeerInfo>>) {
        let resolved = self.peer_infos.complete(key, value);
        if resolved > 0 {
            trace!(key = %key, resolved, "Completed peer info callbacks");
        }
    }

    /// Keys waiting or in flight
    pub fn pending(&self) -> usize {
        self.lease_sets.len() + self.peer_infos.len()
    }

    fn budget(&self) -> usize {
        self.max_in_flight
            .saturating_sub(self.in_flight.load(Ordering::Acquire))
    }
}

/// Start protocol calls for queued keys
pub(crate) fn dispatch(directory: &Arc<NetworkDirectory>) {
    let resolver = directory.resolver();

    for key in resolver.lease_sets.take_queued(resolver.budget()) {
        resolver.in_flight.fetch_add(1, Ordering::AcqRel);
        let directory = directory.clone();
        tokio::spawn(async move {
            let resolver = directory.resolver();
            let result =
                tokio::time::timeout(resolver.timeout, resolver.protocol.lookup_lease_set(&key)).await;
            // Only what the network returned counts; a stale cached copy never answers
            let found = match result {
                Ok(Ok(Some(lease_set))) => {
                    let eol = lease_set.end_of_life();
                    match directory.add_lease_set(lease_set) {
                        Ok(_) => directory
                            .find_lease_set(&key)
                            .filter(|stored| stored.end_of_life() >= eol),
                        Err(e) => {
                            debug!(key = %key, error = %e, "Lookup returned an invalid lease set");
                            None
                        }
                    }
                }
                Ok(Ok(None)) => {
                    debug!(key = %key, "Lease set lookup found nothing");
                    None
                }
                Ok(Err(e)) => {
                    debug!(key = %key, error = %e, "Lease set lookup failed");
                    None
                }
                Err(_) => {
                    debug!(key = %key, "Lease set lookup timed out");
                    None
                }
            };
            resolver.in_flight.fetch_sub(1, Ordering::AcqRel);
            resolver.complete_lease_set(&key, found);
        });
    }

    for key in resolver.peer_infos.take_queued(resolver.budget()) {
        resolver.in_flight.fetch_add(1, Ordering::AcqRel);
        let directory = directory.clone();
        tokio::spawn(async move {
            let resolver = directory.resolver();
            let result =
                tokio::time::timeout(resolver.timeout, resolver.protocol.lookup_peer_info(&key)).await;
            let found = match result {
                Ok(Ok(Some(info))) => {
                    let published = info.published;
                    match directory.add_peer_info(info) {
                        Ok(_) => directory
                            .lookup(&key)
                            .filter(|stored| stored.published >= published),
                        Err(e) => {
                            debug!(key = %key, error = %e, "Lookup returned an invalid peer info");
                            None
                        }
                    }
                }
                Ok(Ok(None)) => {
                    debug!(key = %key, "Peer info lookup found nothing");
                    None
                }
                Ok(Err(e)) => {
                    debug!(key = %key, error = %e, "Peer info lookup failed");
                    None
                }
                Err(_) => {
                    debug!(key = %key, "Peer info lookup timed out");
                    None
                }
            };
            resolver.in_flight.fetch_sub(1, Ordering::AcqRel);
            resolver.complete_peer_info(&key, found);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u8) -> IdentHash {
        IdentHash::new([n; 32])
    }

    #[test]
    fn test_register_coalesces_keys() {
        let table: PendingTable<u32> = PendingTable::new();
        assert!(table.register(key(1), Box::new(|_, _| {})));
        assert!(!table.register(key(1), Box::new(|_, _| {})));
        assert!(table.register(key(2), Box::new(|_, _| {})));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_take_queued_marks_in_flight_once() {
        let table: PendingTable<u32> = PendingTable::new();
        table.register(key(1), Box::new(|_, _| {}));
        table.register(key(2), Box::new(|_, _| {}));
        assert_eq!(table.take_queued(1).len(), 1);
        assert_eq!(table.take_queued(5).len(), 1);
        assert!(table.take_queued(5).is_empty());
    }

    #[test]
    fn test_complete_runs_every_callback() {
        let table: PendingTable<u32> = PendingTable::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..3 {
            let seen = seen.clone();
            table.register(
                key(1),
                Box::new(move |k, v| seen.lock().push((k, v.map(|v| *v)))),
            );
        }
        assert_eq!(table.complete(&key(1), Some(Arc::new(7))), 3);
        assert_eq!(table.complete(&key(1), None), 0);
        assert_eq!(*seen.lock(), vec![(key(1), Some(7)); 3]);
    }
}
