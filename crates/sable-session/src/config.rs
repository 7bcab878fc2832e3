//! Destination session configuration

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Configuration for a [`crate::DestinationSession`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Inbound tunnels to keep established
    pub inbound_quantity: usize,
    /// Outbound tunnels to keep established
    pub outbound_quantity: usize,
    /// Hops per inbound tunnel
    pub inbound_length: u8,
    /// Hops per outbound tunnel
    pub outbound_length: u8,
    pub inbound_nickname: Option<String>,
    pub outbound_nickname: Option<String>,
    /// Hand signed lease sets to the directory and the floodfills
    pub publish: bool,
    /// Push our lease set to remotes from the idle loop
    pub auto_update_remotes: bool,
    pub idle_interval: Duration,
    pub status_interval: Duration,
    /// Remotes refreshed per idle tick
    pub remotes_per_tick: usize,
    /// Lookups per remote before its entry is forgotten
    pub lookup_attempts: u32,
    /// A remote unused this long stops receiving our lease set
    pub inactivity_limit: Duration,
    /// A remote lease set closer than this to its end triggers a refresh
    pub min_lease_lifetime: Duration,
    /// A lookup answer must outlive this to count as fresh
    pub lease_freshness: Duration,
    /// Buffered messages are dropped after this
    pub unsent_horizon: Duration,
    pub tunnel_lifetime: Duration,
    pub event_channel_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            inbound_quantity: 2,
            outbound_quantity: 2,
            inbound_length: 3,
            outbound_length: 3,
            inbound_nickname: None,
            outbound_nickname: None,
            publish: true,
            auto_update_remotes: true,
            idle_interval: Duration::from_secs(10),
            status_interval: Duration::from_secs(15),
            remotes_per_tick: 2,
            lookup_attempts: 5,
            inactivity_limit: Duration::from_secs(5 * 60),
            min_lease_lifetime: Duration::from_secs(2 * 60),
            lease_freshness: Duration::from_secs(3 * 60),
            unsent_horizon: Duration::from_secs(2 * 60),
            tunnel_lifetime: Duration::from_secs(10 * 60),
            event_channel_capacity: 256,
        }
    }
}

impl SessionConfig {
    /// Short idle cadence for tests
    pub fn testing() -> Self {
        Self {
            idle_interval: Duration::from_millis(50),
            status_interval: Duration::from_millis(100),
            ..Default::default()
        }
    }

    pub fn with_tunnel_quantities(mut self, inbound: usize, outbound: usize) -> Self {
        self.inbound_quantity = inbound;
        self.outbound_quantity = outbound;
        self
    }

    pub fn with_publish(mut self, publish: bool) -> Self {
        self.publish = publish;
        self
    }

    pub fn with_auto_update_remotes(mut self, enabled: bool) -> Self {
        self.auto_update_remotes = enabled;
        self
    }

    pub fn with_idle_interval(mut self, interval: Duration) -> Self {
        self.idle_interval = interval;
        self
    }

    /// Apply client key/value options
    ///
    /// Unknown keys are ignored; unparsable values are logged and leave the
    /// current setting in place. Returns how many options were applied.
    pub fn apply_options(&mut self, options: &BTreeMap<String, String>) -> usize {
        let mut applied = 0;
        for (key, value) in options {
            let ok = match key.as_str() {
                "inbound.quantity" => parse_into(key, value, &mut self.inbound_quantity),
                "outbound.quantity" => parse_into(key, value, &mut self.outbound_quantity),
                "inbound.length" => parse_into(key, value, &mut self.inbound_length),
                "outbound.length" => parse_into(key, value, &mut self.outbound_length),
                "inbound.nickname" => {
                    self.inbound_nickname = Some(value.clone());
                    true
                }
                "outbound.nickname" => {
                    self.outbound_nickname = Some(value.clone());
                    true
                }
                _ => {
                    debug!(option = %key, "Ignoring unknown session option");
                    false
                }
            };
            if ok {
                applied += 1;
            }
        }
        applied
    }
}

fn parse_into<T: std::str::FromStr>(key: &str, value: &str, slot: &mut T) -> bool {
    match value.trim().parse() {
        Ok(parsed) => {
            *slot = parsed;
            true
        }
        Err(_) => {
            warn!(option = %key, value = %value, "Unparsable session option");
            false
        }
    }
}
