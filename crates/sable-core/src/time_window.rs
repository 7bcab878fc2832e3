//! Time-windowed keyed cache
//!
//! [`TimeWindowMap`] behaves like a concurrent map whose entries become
//! unreachable once they are older than the window, even before anything
//! removes them. Expired entries are dropped lazily on access and in bulk by
//! [`TimeWindowMap::prune`].

use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::traits::Clock;

#[derive(Debug, Clone)]
struct WindowEntry<V> {
    value: V,
    inserted_at: DateTime<Utc>,
}

/// Concurrent map with an eviction horizon
pub struct TimeWindowMap<K, V> {
    entries: DashMap<K, WindowEntry<V>>,
    window: chrono::Duration,
    clock: Arc<dyn Clock>,
}

impl<K, V> TimeWindowMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a map whose entries live for `window` after their last write
    pub fn new(window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            window: chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX),
            clock,
        }
    }

    fn is_fresh(&self, entry: &WindowEntry<V>, now: DateTime<Utc>) -> bool {
        now - entry.inserted_at <= self.window
    }

    /// Insert or replace a value, restarting its window
    pub fn insert(&self, key: K, value: V) {
        let entry = WindowEntry {
            value,
            inserted_at: self.clock.now(),
        };
        self.entries.insert(key, entry);
    }

    /// Get a value if it is still inside the window
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        match self.entries.get(key) {
            None => return None,
            Some(entry) if self.is_fresh(&entry, now) => return Some(entry.value.clone()),
            Some(_) => {}
        }
        self.entries.remove_if(key, |_, e| !self.is_fresh(e, now));
        None
    }

    pub fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Remove a value, returning it if it was still inside the window
    pub fn remove(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        self.entries
            .remove(key)
            .filter(|(_, e)| self.is_fresh(e, now))
            .map(|(_, e)| e.value)
    }

    /// Mutate the value for `key` in place, starting from `init()` when the
    /// key is absent or expired
    ///
    /// The window of an existing entry is not restarted.
    pub fn upsert<I, F>(&self, key: K, init: I, f: F)
    where
        I: FnOnce() -> V,
        F: FnOnce(&mut V),
    {
        let now = self.clock.now();
        self.entries.remove_if(&key, |_, e| !self.is_fresh(e, now));
        let mut entry = self.entries.entry(key).or_insert_with(|| WindowEntry {
            value: init(),
            inserted_at: now,
        });
        f(&mut entry.value);
    }

    /// Insert `value` only if `accept` approves of the live value it would
    /// replace, returning whether it was inserted
    ///
    /// The check and the write happen under the same shard lock.
    pub fn insert_if<F>(&self, key: K, value: V, accept: F) -> bool
    where
        F: FnOnce(Option<&V>) -> bool,
    {
        use dashmap::mapref::entry::Entry;

        let now = self.clock.now();
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                let current = Some(&occupied.get().value).filter(|_| self.is_fresh(occupied.get(), now));
                if !accept(current) {
                    return false;
                }
                occupied.insert(WindowEntry {
                    value,
                    inserted_at: now,
                });
                true
            }
            Entry::Vacant(vacant) => {
                if !accept(None) {
                    return false;
                }
                vacant.insert(WindowEntry {
                    value,
                    inserted_at: now,
                });
                true
            }
        }
    }

    /// Drop all entries outside the window, returning how many were removed
    pub fn prune(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, e| now - e.inserted_at <= self.window);
        before.saturating_sub(self.entries.len())
    }

    /// Snapshot of all live entries
    pub fn snapshot(&self) -> Vec<(K, V)> {
        let now = self.clock.now();
        self.entries
            .iter()
            .filter(|e| self.is_fresh(e.value(), now))
            .map(|e| (e.key().clone(), e.value().value.clone()))
            .collect()
    }

    /// Number of stored entries, including expired ones not yet pruned
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ManualClock;

    fn map(clock: &Arc<ManualClock>) -> TimeWindowMap<u32, String> {
        TimeWindowMap::new(Duration::from_secs(120), clock.clone())
    }

    #[test]
    fn test_entries_vanish_after_window() {
        let clock = Arc::new(ManualClock::new());
        let map = map(&clock);
        map.insert(1, "one".into());
        clock.advance(chrono::Duration::seconds(119));
        assert_eq!(map.get(&1).as_deref(), Some("one"));
        clock.advance(chrono::Duration::seconds(2));
        assert!(map.get(&1).is_none());
        assert!(map.is_empty());
    }

    #[test]
    fn test_insert_restarts_window() {
        let clock = Arc::new(ManualClock::new());
        let map = map(&clock);
        map.insert(1, "a".into());
        clock.advance(chrono::Duration::seconds(100));
        map.insert(1, "b".into());
        clock.advance(chrono::Duration::seconds(100));
        assert_eq!(map.get(&1).as_deref(), Some("b"));
    }

    #[test]
    fn test_upsert_keeps_window_and_resets_expired() {
        let clock = Arc::new(ManualClock::new());
        let map = map(&clock);
        map.upsert(7, String::new, |v| v.push('x'));
        map.upsert(7, String::new, |v| v.push('y'));
        assert_eq!(map.get(&7).as_deref(), Some("xy"));

        clock.advance(chrono::Duration::seconds(121));
        map.upsert(7, String::new, |v| v.push('z'));
        assert_eq!(map.get(&7).as_deref(), Some("z"));
    }

    #[test]
    fn test_insert_if_consults_live_value_only() {
        let clock = Arc::new(ManualClock::new());
        let map = map(&clock);
        assert!(map.insert_if(1, "a".into(), |cur| cur.is_none()));
        assert!(!map.insert_if(1, "b".into(), |cur| cur.is_none()));
        assert_eq!(map.get(&1).as_deref(), Some("a"));

        clock.advance(chrono::Duration::seconds(121));
        assert!(map.insert_if(1, "c".into(), |cur| cur.is_none()));
        assert_eq!(map.get(&1).as_deref(), Some("c"));
    }

    #[test]
    fn test_remove_ignores_expired_values() {
        let clock = Arc::new(ManualClock::new());
        let map = map(&clock);
        map.insert(1, "a".into());
        map.insert(2, "b".into());
        assert_eq!(map.remove(&1).as_deref(), Some("a"));
        clock.advance(chrono::Duration::seconds(200));
        assert!(map.remove(&2).is_none());
    }

    #[test]
    fn test_prune_and_snapshot() {
        let clock = Arc::new(ManualClock::new());
        let map = map(&clock);
        map.insert(1, "old".into());
        clock.advance(chrono::Duration::seconds(90));
        map.insert(2, "new".into());
        clock.advance(chrono::Duration::seconds(60));
        let snap = map.snapshot();
        assert_eq!(snap, vec![(2, "new".to_string())]);
        assert_eq!(map.prune(), 1);
        assert_eq!(map.len(), 1);
    }
}
