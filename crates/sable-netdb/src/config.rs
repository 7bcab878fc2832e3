//! Configuration for the network directory

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for a [`crate::NetworkDirectory`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Accept peers that only publish IPv6 hosts
    pub use_ipv6: bool,
    /// Period of the maintenance loop
    pub tick_interval: Duration,
    /// Persist the directory and rebuild selection pools this often
    pub save_interval: Duration,
    /// Drive floodfill publication this often
    pub floodfill_interval: Duration,
    /// Startup fails if the initial load takes longer than this
    pub load_timeout: Duration,
    /// A replacing peer info must be published this much later than the stored one
    pub publish_skew: Duration,
    /// Nominal lifetime of a lease; lease sets are cached for twice this
    pub lease_lifetime: Duration,
    /// Reputation records older than this many days are pruned on load
    pub reputation_retention_days: u32,
    /// Peer infos published longer ago than this are expired during save
    pub peer_info_expiry: Duration,
    /// Never expire peer infos below this many known peers
    pub min_retained_peers: usize,
    /// Number of floodfills each record is published to
    pub floodfill_fanout: usize,
    /// A floodfill store without delivery status after this long counts as a timeout
    pub floodfill_confirm_timeout: Duration,
    /// Attempts per published record before giving up
    pub floodfill_max_attempts: u32,
    /// Upper bound for one external lookup
    pub lookup_timeout: Duration,
    /// Lookups allowed in flight at once
    pub max_concurrent_lookups: usize,
    /// Capacity of the notification channel
    pub event_channel_capacity: usize,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            use_ipv6: false,
            tick_interval: Duration::from_secs(2),
            save_interval: Duration::from_secs(5 * 60),
            floodfill_interval: Duration::from_secs(5),
            load_timeout: Duration::from_secs(450),
            publish_skew: Duration::from_secs(2),
            lease_lifetime: Duration::from_secs(10 * 60),
            reputation_retention_days: 7,
            peer_info_expiry: Duration::from_secs(24 * 60 * 60),
            min_retained_peers: 100,
            floodfill_fanout: 2,
            floodfill_confirm_timeout: Duration::from_secs(10),
            floodfill_max_attempts: 3,
            lookup_timeout: Duration::from_secs(60),
            max_concurrent_lookups: 16,
            event_channel_capacity: 1024,
        }
    }
}

impl DirectoryConfig {
    /// Short cadences for tests
    pub fn testing() -> Self {
        Self {
            tick_interval: Duration::from_millis(20),
            save_interval: Duration::from_millis(200),
            floodfill_interval: Duration::from_millis(20),
            load_timeout: Duration::from_secs(5),
            floodfill_confirm_timeout: Duration::from_millis(200),
            lookup_timeout: Duration::from_secs(2),
            ..Default::default()
        }
    }

    /// Accept or refuse IPv6-only peers
    pub fn with_ipv6(mut self, use_ipv6: bool) -> Self {
        self.use_ipv6 = use_ipv6;
        self
    }

    /// Set the maintenance tick
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Set the save and rescoring interval
    pub fn with_save_interval(mut self, interval: Duration) -> Self {
        self.save_interval = interval;
        self
    }

    /// Set the startup load timeout
    pub fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = timeout;
        self
    }

    /// Set the nominal lease lifetime
    pub fn with_lease_lifetime(mut self, lifetime: Duration) -> Self {
        self.lease_lifetime = lifetime;
        self
    }

    /// Eviction horizon of the lease-set cache
    pub fn lease_set_horizon(&self) -> Duration {
        self.lease_lifetime * 2
    }
}
