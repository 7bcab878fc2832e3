//! Inbound and outbound tunnel pools of one session
//!
//! Membership changes only through the tunnel provider's callbacks. The
//! provider asks [`TunnelPools::inbound_needed`] and
//! [`TunnelPools::outbound_needed`] how many more tunnels to build.

use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use rand::Rng;
use sable_core::{TunnelDirection, TunnelInfo, TunnelKey};

struct Pool {
    established: DashMap<TunnelKey, TunnelInfo>,
    pending: DashSet<TunnelKey>,
    target: AtomicUsize,
}

impl Pool {
    fn new(target: usize) -> Self {
        Self {
            established: DashMap::new(),
            pending: DashSet::new(),
            target: AtomicUsize::new(target),
        }
    }

    fn needed(&self, now: DateTime<Utc>) -> i64 {
        let stable = self
            .established
            .iter()
            .filter(|t| !t.needs_recreation(now))
            .count();
        self.target.load(Ordering::Relaxed) as i64 - stable as i64 - self.pending.len() as i64
    }

    fn live(&self, now: DateTime<Utc>) -> Vec<TunnelInfo> {
        self.established
            .iter()
            .filter(|t| !t.is_expired(now))
            .map(|t| t.value().clone())
            .collect()
    }
}

pub struct TunnelPools {
    inbound: Pool,
    outbound: Pool,
}

impl TunnelPools {
    pub fn new(inbound_target: usize, outbound_target: usize) -> Self {
        Self {
            inbound: Pool::new(inbound_target),
            outbound: Pool::new(outbound_target),
        }
    }

    fn pool(&self, direction: TunnelDirection) -> &Pool {
        match direction {
            TunnelDirection::Inbound => &self.inbound,
            TunnelDirection::Outbound => &self.outbound,
        }
    }

    pub fn set_targets(&self, inbound: usize, outbound: usize) {
        self.inbound.target.store(inbound, Ordering::Relaxed);
        self.outbound.target.store(outbound, Ordering::Relaxed);
    }

    /// A build was started for `key`
    pub fn add_pending(&self, key: TunnelKey, direction: TunnelDirection) {
        self.pool(direction).pending.insert(key);
    }

    /// A build finished; the tunnel leaves the pending set
    pub fn establish(&self, tunnel: TunnelInfo) {
        let pool = self.pool(tunnel.direction);
        pool.pending.remove(&tunnel.key);
        pool.established.insert(tunnel.key, tunnel);
    }

    /// A tunnel went away or its build failed
    pub fn remove(&self, key: &TunnelKey) -> Option<TunnelInfo> {
        for pool in [&self.inbound, &self.outbound] {
            pool.pending.remove(key);
            if let Some((_, tunnel)) = pool.established.remove(key) {
                return Some(tunnel);
            }
        }
        None
    }

    /// Drop expired tunnels, returning them
    pub fn prune_expired(&self, now: DateTime<Utc>) -> Vec<TunnelInfo> {
        let mut removed = Vec::new();
        for pool in [&self.inbound, &self.outbound] {
            let expired: Vec<TunnelKey> = pool
                .established
                .iter()
                .filter(|t| t.is_expired(now))
                .map(|t| *t.key())
                .collect();
            for key in expired {
                if let Some((_, tunnel)) = pool.established.remove(&key) {
                    removed.push(tunnel);
                }
            }
        }
        removed
    }

    /// Target minus stable established minus pending inbound tunnels
    pub fn inbound_needed(&self, now: DateTime<Utc>) -> i64 {
        self.inbound.needed(now)
    }

    pub fn outbound_needed(&self, now: DateTime<Utc>) -> i64 {
        self.outbound.needed(now)
    }

    pub fn has_inbound(&self, now: DateTime<Utc>) -> bool {
        self.inbound.established.iter().any(|t| !t.is_expired(now))
    }

    pub fn has_outbound(&self, now: DateTime<Utc>) -> bool {
        self.outbound.established.iter().any(|t| !t.is_expired(now))
    }

    /// Both directions have at least one live tunnel
    pub fn status_ok(&self, now: DateTime<Utc>) -> bool {
        self.has_inbound(now) && self.has_outbound(now)
    }

    pub fn inbound(&self, now: DateTime<Utc>) -> Vec<TunnelInfo> {
        self.inbound.live(now)
    }

    pub fn counts(&self) -> (usize, usize) {
        (self.inbound.established.len(), self.outbound.established.len())
    }

    /// Draw an outbound tunnel, preferring ones not due for recreation
    pub fn select_outbound(&self, now: DateTime<Utc>) -> Option<TunnelInfo> {
        let live = self.outbound.live(now);
        let stable: Vec<&TunnelInfo> = live.iter().filter(|t| !t.needs_recreation(now)).collect();
        let mut rng = rand::rng();
        if !stable.is_empty() {
            return Some(stable[rng.random_range(0..stable.len())].clone());
        }
        if live.is_empty() {
            return None;
        }
        let index = rng.random_range(0..live.len());
        live.into_iter().nth(index)
    }
}
