//! The destination session
//!
//! A [`DestinationSession`] is the runtime of one local destination. It
//! tracks the session's tunnels, keeps its lease set signed and published,
//! caches the lease sets of the remotes it talks to, and buffers messages
//! while nothing can be sent.
//!
//! Sends never wait on the network. When a remote lease set is missing the
//! message is buffered, a lookup is scheduled, and the message is flushed
//! when the directory reports a lease set for that remote.

mod inbound;
mod tasks;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashSet;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use sable_core::{
    Clock, CloveDelivery, DatabaseStore, Destination, Garlic, GarlicClove, IdentHash, Lease,
    LeaseSet, LeaseSetBuilder, RouterMessage, RouterTransport, TunnelDirection, TunnelInfo,
    TunnelKey, TunnelProvider, ValidationError,
};
use sable_crypto::{DestinationKeys, GarlicKey, SigningKeyPair, encrypt_garlic, sign_lease_set, verify_lease_set};
use sable_netdb::{LookupCallback, NetworkDirectory};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::event::{ClientState, SessionEvent};
use crate::pools::TunnelPools;
use crate::remote::RemoteDestinations;
use crate::unsent::{UnsentMessage, UnsentMessages};

fn chrono_duration(d: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

/// Keys a session runs with
pub struct SessionKeys {
    pub destination: Destination,
    /// Present when the router signs lease sets for the client
    pub signing: Option<SigningKeyPair>,
    /// Decrypts inbound garlic; advertised in the lease set
    pub temporary: GarlicKey,
}

impl SessionKeys {
    /// The router holds the signing key and signs lease sets itself
    pub fn router_signed(keys: &DestinationKeys) -> Self {
        Self {
            destination: keys.destination(),
            signing: Some(keys.signing.clone()),
            temporary: GarlicKey::generate(),
        }
    }

    /// The client keeps its signing key and signs lease sets on request
    pub fn external(destination: Destination, temporary: GarlicKey) -> Self {
        Self {
            destination,
            signing: None,
            temporary,
        }
    }
}

/// Collaborators of a session
#[derive(Clone)]
pub struct SessionDeps {
    pub directory: Arc<NetworkDirectory>,
    pub tunnels: Arc<dyn TunnelProvider>,
    pub transport: Arc<dyn RouterTransport>,
    pub clock: Arc<dyn Clock>,
}

impl SessionDeps {
    /// Dependencies sharing the directory's clock
    pub fn new(
        directory: Arc<NetworkDirectory>,
        tunnels: Arc<dyn TunnelProvider>,
        transport: Arc<dyn RouterTransport>,
    ) -> Self {
        let clock = directory.clock().clone();
        Self {
            directory,
            tunnels,
            transport,
            clock,
        }
    }
}

pub struct DestinationSession {
    ident: IdentHash,
    destination: Destination,
    config: RwLock<SessionConfig>,
    signing: Option<SigningKeyPair>,
    temporary_key: RwLock<GarlicKey>,
    builder: Mutex<LeaseSetBuilder>,
    signed: RwLock<Option<Arc<LeaseSet>>>,
    pools: TunnelPools,
    remotes: RemoteDestinations,
    unsent: UnsentMessages,
    /// Background lookups this session has in flight
    lookups: DashSet<IdentHash>,
    state: Mutex<ClientState>,
    terminated: AtomicBool,
    events: broadcast::Sender<SessionEvent>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    directory: Arc<NetworkDirectory>,
    tunnels: Arc<dyn TunnelProvider>,
    transport: Arc<dyn RouterTransport>,
    clock: Arc<dyn Clock>,
}

impl DestinationSession {
    /// Create a session without its background tasks
    pub fn new(config: SessionConfig, keys: SessionKeys, deps: SessionDeps) -> Arc<Self> {
        let ident = keys.destination.ident_hash();
        let builder = LeaseSetBuilder::new(keys.destination, keys.temporary.public_key());
        let (events, _) = broadcast::channel(config.event_channel_capacity.max(1));
        let (shutdown_tx, _) = broadcast::channel(1);

        Arc::new(Self {
            ident,
            destination: keys.destination,
            pools: TunnelPools::new(config.inbound_quantity, config.outbound_quantity),
            remotes: RemoteDestinations::new(),
            unsent: UnsentMessages::new(config.unsent_horizon, deps.clock.clone()),
            config: RwLock::new(config),
            signing: keys.signing,
            temporary_key: RwLock::new(keys.temporary),
            builder: Mutex::new(builder),
            signed: RwLock::new(None),
            lookups: DashSet::new(),
            state: Mutex::new(ClientState::NoTunnels),
            terminated: AtomicBool::new(false),
            events,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
            directory: deps.directory,
            tunnels: deps.tunnels,
            transport: deps.transport,
            clock: deps.clock,
        })
    }

    /// Create a session and spawn its idle loop and directory listener
    pub fn start(config: SessionConfig, keys: SessionKeys, deps: SessionDeps) -> Arc<Self> {
        let session = Self::new(config, keys, deps);
        let directory_events = session.directory.subscribe();
        let idle = tasks::spawn_idle(Arc::downgrade(&session), session.shutdown_tx.subscribe());
        let listener = tasks::spawn_listener(
            Arc::downgrade(&session),
            directory_events,
            session.shutdown_tx.subscribe(),
        );
        session.tasks.lock().extend([idle, listener]);
        info!(
            destination = %session.ident.short_id(),
            router_signed = session.signing.is_some(),
            "Destination session started"
        );
        session
    }

    // ========== Accessors ==========

    pub fn ident_hash(&self) -> IdentHash {
        self.ident
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    pub fn state(&self) -> ClientState {
        *self.state.lock()
    }

    pub fn config(&self) -> SessionConfig {
        self.config.read().clone()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// The lease set currently published for this session
    pub fn signed_lease_set(&self) -> Option<Arc<LeaseSet>> {
        self.signed.read().clone()
    }

    /// Snapshot of the leases waiting to be signed
    pub fn lease_set_builder(&self) -> LeaseSetBuilder {
        self.builder.lock().clone()
    }

    pub fn remotes(&self) -> &RemoteDestinations {
        &self.remotes
    }

    pub fn unsent_count(&self) -> usize {
        self.unsent.total()
    }

    pub fn inbound_tunnels_needed(&self) -> i64 {
        self.pools.inbound_needed(self.clock.now())
    }

    pub fn outbound_tunnels_needed(&self) -> i64 {
        self.pools.outbound_needed(self.clock.now())
    }

    pub fn tunnels_status_ok(&self) -> bool {
        self.pools.status_ok(self.clock.now())
    }

    /// Apply client options, returning how many were applied
    pub fn reconfigure(&self, options: &BTreeMap<String, String>) -> usize {
        let mut config = self.config.write();
        let applied = config.apply_options(options);
        self.pools
            .set_targets(config.inbound_quantity, config.outbound_quantity);
        debug!(
            destination = %self.ident.short_id(),
            applied,
            inbound = config.inbound_quantity,
            outbound = config.outbound_quantity,
            "Session reconfigured"
        );
        applied
    }

    // ========== State ==========

    /// Recompute the coarse client state, broadcasting a change
    fn refresh_state(&self) -> ClientState {
        let now = self.clock.now();
        let state = if !self.pools.status_ok(now) {
            ClientState::NoTunnels
        } else if self
            .unsent
            .destinations()
            .iter()
            .any(|dest| self.remote_lease_set(dest, now).is_none())
        {
            ClientState::NoLeases
        } else {
            ClientState::Established
        };

        let changed = {
            let mut current = self.state.lock();
            let changed = *current != state;
            *current = state;
            changed
        };
        if changed {
            debug!(destination = %self.ident.short_id(), %state, "Session state changed");
            let _ = self.events.send(SessionEvent::StateChanged(state));
        }
        state
    }

    // ========== Tunnel callbacks ==========

    pub fn tunnel_build_started(&self, key: TunnelKey, direction: TunnelDirection) {
        self.pools.add_pending(key, direction);
    }

    pub fn tunnel_established(&self, tunnel: TunnelInfo) {
        if self.is_terminated() {
            return;
        }
        let direction = tunnel.direction;
        trace!(destination = %self.ident.short_id(), tunnel = %tunnel.key, ?direction, "Tunnel established");
        if direction == TunnelDirection::Inbound {
            self.builder.lock().add_lease(tunnel.lease());
        }
        self.pools.establish(tunnel);
        if direction == TunnelDirection::Inbound {
            self.leases_changed();
        }
        self.refresh_state();
    }

    pub fn tunnel_removed(&self, key: TunnelKey) {
        if self.is_terminated() {
            return;
        }
        if let Some(tunnel) = self.pools.remove(&key) {
            trace!(destination = %self.ident.short_id(), tunnel = %key, "Tunnel removed");
            if tunnel.direction == TunnelDirection::Inbound
                && self
                    .builder
                    .lock()
                    .remove_lease(&tunnel.gateway, tunnel.gateway_tunnel_id)
            {
                self.leases_changed();
            }
        }
        self.refresh_state();
    }

    // ========== Lease set publication ==========

    /// The leases under construction changed
    ///
    /// Router-signed sessions sign right away; externally signed sessions
    /// ask the client once enough inbound tunnels exist.
    fn leases_changed(&self) {
        let builder = self.builder.lock().clone();
        if builder.is_empty() {
            return;
        }
        match &self.signing {
            Some(key) => match sign_lease_set(&builder, key) {
                Ok(lease_set) => self.install_signed(lease_set),
                Err(e) => warn!(destination = %self.ident.short_id(), error = %e, "Lease set signing failed"),
            },
            None => {
                if self.pools.inbound_needed(self.clock.now()) <= 0 {
                    debug!(destination = %self.ident.short_id(), leases = builder.len(), "Requesting lease set signature");
                    let _ = self.events.send(SessionEvent::SignLeasesRequest(builder));
                }
            }
        }
    }

    fn install_signed(&self, lease_set: LeaseSet) {
        let lease_set = Arc::new(lease_set);
        *self.signed.write() = Some(lease_set.clone());
        self.remotes.mark_all_need_push();

        if self.config.read().publish {
            if let Err(e) = self.directory.add_lease_set(lease_set.as_ref().clone()) {
                warn!(destination = %self.ident.short_id(), error = %e, "Directory refused our lease set");
            }
            self.directory.publish_lease_set(lease_set.clone());
        }
        debug!(
            destination = %self.ident.short_id(),
            leases = lease_set.leases().len(),
            "Installed signed lease set"
        );
    }

    /// Accept a lease set signed by the client
    pub fn set_signed_leases(&self, lease_set: LeaseSet) -> SessionResult<()> {
        if self.is_terminated() {
            return Err(SessionError::Terminated);
        }
        let owner = lease_set.ident_hash();
        if owner != self.ident {
            return Err(ValidationError::WrongOwner {
                expected: self.ident.to_string(),
                actual: owner.to_string(),
            }
            .into());
        }
        verify_lease_set(&lease_set).map_err(|_| ValidationError::BadSignature)?;
        self.install_signed(lease_set);
        Ok(())
    }

    /// Rotate the key inbound garlic is decrypted with
    pub fn set_temporary_key(&self, key: GarlicKey) -> SessionResult<()> {
        if self.is_terminated() {
            return Err(SessionError::Terminated);
        }
        let public = key.public_key();
        *self.temporary_key.write() = key;
        self.builder.lock().set_encryption_key(public);
        if self.signing.is_some() {
            self.leases_changed();
        }
        Ok(())
    }

    // ========== Sending ==========

    /// Send a payload to a remote destination
    ///
    /// Anything short of [`ClientState::Established`] buffers the payload
    /// until the session can send it.
    pub async fn send(self: &Arc<Self>, dest: IdentHash, payload: Bytes) -> SessionResult<ClientState> {
        self.deliver(dest, payload, None).await
    }

    /// Send a payload that the receiver drops after `expires`
    pub async fn send_with_expiry(
        self: &Arc<Self>,
        dest: IdentHash,
        payload: Bytes,
        expires: DateTime<Utc>,
    ) -> SessionResult<ClientState> {
        self.deliver(dest, payload, Some(expires)).await
    }

    #[instrument(skip(self, payload), fields(dest = %dest.short_id(), len = payload.len()))]
    async fn deliver(
        self: &Arc<Self>,
        dest: IdentHash,
        payload: Bytes,
        expires: Option<DateTime<Utc>>,
    ) -> SessionResult<ClientState> {
        if self.is_terminated() {
            return Err(SessionError::Terminated);
        }
        let state = self.try_send(dest, &payload, expires).await?;
        if state != ClientState::Established {
            debug!(%state, "Buffering message");
            self.unsent.push(dest, UnsentMessage { payload, expires });
            self.refresh_state();
        }
        Ok(state)
    }

    async fn try_send(
        self: &Arc<Self>,
        dest: IdentHash,
        payload: &Bytes,
        expires: Option<DateTime<Utc>>,
    ) -> SessionResult<ClientState> {
        let now = self.clock.now();
        if !self.pools.has_inbound(now) {
            return Ok(ClientState::NoTunnels);
        }
        let Some(remote) = self.remote_lease_set(&dest, now) else {
            self.lookup_in_background(dest);
            return Ok(ClientState::NoLeases);
        };
        let min_lifetime = chrono_duration(self.config.read().min_lease_lifetime);
        if !remote.expires_after(now, min_lifetime) {
            trace!(dest = %dest, "Remote lease set running out, refreshing");
            self.lookup_in_background(dest);
        }
        let Some(outbound) = self.pools.select_outbound(now) else {
            return Ok(ClientState::NoTunnels);
        };
        let Some(lease) = select_lease(&remote, now) else {
            self.lookup_in_background(dest);
            return Ok(ClientState::NoLeases);
        };

        let mut data = GarlicClove::new(
            CloveDelivery::Destination { destination: dest },
            RouterMessage::Data(payload.clone()),
        );
        if let Some(expires) = expires {
            data = data.with_expiry(expires);
        }
        let bundle = self.lease_set_clove(&dest);
        let bundled = bundle.is_some();
        // The bundled lease set goes first so the receiver knows the sender
        let garlic = Garlic::new(bundle.into_iter().chain(std::iter::once(data)).collect());

        let sealed = match self.remotes.seal(&dest, &garlic) {
            Some(sealed) => sealed?,
            None => encrypt_garlic(remote.encryption_key(), &garlic)?,
        };
        self.tunnels
            .send_through(&outbound, &lease.gateway, lease.tunnel_id, RouterMessage::Garlic(sealed))
            .await?;

        self.remotes.record_use(&dest, now);
        if bundled {
            self.remotes.mark_pushed(&dest, now);
        }
        trace!(dest = %dest, outbound = %outbound.key, gateway = %lease.gateway, bundled, "Sent garlic");
        Ok(ClientState::Established)
    }

    /// Our signed lease set as a clove, if `dest` is owed it
    fn lease_set_clove(&self, dest: &IdentHash) -> Option<GarlicClove> {
        if !self.remotes.needs_push(dest) {
            return None;
        }
        let signed = self.signed.read().clone()?;
        Some(GarlicClove::new(
            CloveDelivery::Destination { destination: *dest },
            RouterMessage::DatabaseStore(DatabaseStore::lease_set(signed.as_ref().clone(), 0)),
        ))
    }

    /// A lease set for `dest` with at least one unexpired lease, from the
    /// remote cache or the directory
    fn remote_lease_set(&self, dest: &IdentHash, now: DateTime<Utc>) -> Option<Arc<LeaseSet>> {
        if let Some(lease_set) = self.remotes.usable_lease_set(dest, now) {
            return Some(lease_set);
        }
        let lease_set = self
            .directory
            .find_lease_set(dest)
            .filter(|ls| ls.expires_after(now, chrono::Duration::zero()))?;
        self.remotes.update(lease_set.clone(), now);
        Some(lease_set)
    }

    /// Push our lease set to a remote on its own
    async fn push_lease_set(&self, dest: IdentHash) -> SessionResult<bool> {
        let now = self.clock.now();
        let Some(clove) = self.lease_set_clove(&dest) else {
            return Ok(false);
        };
        let Some(remote) = self.remotes.usable_lease_set(&dest, now) else {
            return Ok(false);
        };
        let (Some(outbound), Some(lease)) = (self.pools.select_outbound(now), select_lease(&remote, now)) else {
            return Ok(false);
        };
        let garlic = Garlic::new(vec![clove]);
        let sealed = match self.remotes.seal(&dest, &garlic) {
            Some(sealed) => sealed?,
            None => encrypt_garlic(remote.encryption_key(), &garlic)?,
        };
        self.tunnels
            .send_through(&outbound, &lease.gateway, lease.tunnel_id, RouterMessage::Garlic(sealed))
            .await?;
        self.remotes.mark_pushed(&dest, now);
        trace!(dest = %dest, "Pushed our lease set");
        Ok(true)
    }

    /// Send everything buffered for `dest`, returning how many went out
    ///
    /// Messages that still cannot be sent go back to the bucket through
    /// the normal send path.
    async fn send_unsent(self: &Arc<Self>, dest: IdentHash) -> usize {
        let messages = self.unsent.take(&dest);
        if messages.is_empty() {
            return 0;
        }
        debug!(dest = %dest.short_id(), count = messages.len(), "Flushing unsent messages");
        let now = self.clock.now();
        let mut delivered = 0;
        for message in messages {
            if message.expires.is_some_and(|e| e <= now) {
                trace!(dest = %dest, "Dropping expired buffered message");
                continue;
            }
            match self.deliver(dest, message.payload, message.expires).await {
                Ok(ClientState::Established) => delivered += 1,
                Ok(state) => debug!(dest = %dest, %state, "Buffered message still not sendable"),
                Err(e) => warn!(dest = %dest, error = %e, "Flushing buffered message failed"),
            }
        }
        delivered
    }

    /// Flush every bucket whose remote now has a usable lease set
    async fn flush_ready(self: &Arc<Self>) {
        let now = self.clock.now();
        if !self.pools.status_ok(now) {
            return;
        }
        for dest in self.unsent.destinations() {
            if self.remote_lease_set(&dest, now).is_some() {
                self.send_unsent(dest).await;
            }
        }
    }

    /// The directory accepted a lease set
    async fn lease_set_arrived(self: &Arc<Self>, lease_set: Arc<LeaseSet>) {
        let key = lease_set.ident_hash();
        if key == self.ident {
            return;
        }
        self.remotes.update_existing(lease_set, self.clock.now());
        if self.unsent.contains(&key) {
            self.send_unsent(key).await;
            self.refresh_state();
        }
    }

    // ========== Lookups ==========

    /// Find a remote's lease set
    ///
    /// Answers from the fresh remote cache, then the directory, then the
    /// network. Failed network lookups are retried up to the configured
    /// attempts; after that the remote is forgotten and `callback` gets
    /// `None`.
    pub fn lookup_destination(self: &Arc<Self>, key: IdentHash, callback: Option<LookupCallback<LeaseSet>>) {
        if self.is_terminated() {
            return;
        }
        let now = self.clock.now();
        let freshness = chrono_duration(self.config.read().lease_freshness);
        if let Some(lease_set) = self.remotes.fresh_lease_set(&key, now, freshness) {
            if let Some(callback) = callback {
                callback(key, Some(lease_set));
            }
            return;
        }
        if let Some(lease_set) = self
            .directory
            .find_lease_set(&key)
            .filter(|ls| ls.expires_after(now, freshness))
        {
            self.remotes.update(lease_set.clone(), now);
            if let Some(callback) = callback {
                callback(key, Some(lease_set));
            }
            return;
        }
        self.request_lookup(key, 1, callback);
    }

    /// Start a lookup unless this session already has one for `key`
    fn lookup_in_background(self: &Arc<Self>, key: IdentHash) {
        if self.lookups.insert(key) {
            self.request_lookup(key, 1, None);
        }
    }

    fn request_lookup(self: &Arc<Self>, key: IdentHash, attempt: u32, callback: Option<LookupCallback<LeaseSet>>) {
        trace!(remote = %key, attempt, "Requesting lease set lookup");
        let session: Weak<Self> = Arc::downgrade(self);
        self.directory.request_lease_set(
            key,
            Box::new(move |key, found| {
                let Some(session) = session.upgrade() else {
                    return;
                };
                if session.is_terminated() {
                    return;
                }
                session.lookup_finished(key, found, attempt, callback);
            }),
        );
    }

    fn lookup_finished(
        self: &Arc<Self>,
        key: IdentHash,
        found: Option<Arc<LeaseSet>>,
        attempt: u32,
        callback: Option<LookupCallback<LeaseSet>>,
    ) {
        let now = self.clock.now();
        match found.filter(|ls| ls.expires_after(now, chrono::Duration::zero())) {
            Some(lease_set) => {
                self.lookups.remove(&key);
                self.remotes.update(lease_set.clone(), now);
                if let Some(callback) = callback {
                    callback(key, Some(lease_set));
                }
            }
            None => {
                self.remotes.lookup_failed(&key);
                let attempts = self.config.read().lookup_attempts;
                if attempt < attempts {
                    debug!(remote = %key.short_id(), attempt, "Lease set lookup failed, retrying");
                    self.request_lookup(key, attempt + 1, callback);
                } else {
                    warn!(remote = %key.short_id(), attempts, "Giving up on remote destination");
                    self.lookups.remove(&key);
                    self.remotes.forget(&key);
                    if let Some(callback) = callback {
                        callback(key, None);
                    }
                }
            }
        }
    }

    // ========== Maintenance ==========

    /// One idle tick
    async fn run_idle(self: &Arc<Self>) {
        let now = self.clock.now();
        let mut leases_removed = false;
        for tunnel in self.pools.prune_expired(now) {
            if tunnel.direction == TunnelDirection::Inbound {
                leases_removed |= self
                    .builder
                    .lock()
                    .remove_lease(&tunnel.gateway, tunnel.gateway_tunnel_id);
            }
        }
        if leases_removed {
            self.leases_changed();
        }

        let (inactivity, tunnel_lifetime, push, per_tick) = {
            let config = self.config.read();
            (
                chrono_duration(config.inactivity_limit),
                chrono_duration(config.tunnel_lifetime),
                config.publish && config.auto_update_remotes,
                config.remotes_per_tick,
            )
        };
        let forgotten = self.remotes.maintain(now, inactivity, tunnel_lifetime);
        let dropped = self.unsent.prune();
        if forgotten > 0 || dropped > 0 {
            debug!(destination = %self.ident.short_id(), forgotten, dropped, "Session cleanup");
        }

        if push {
            for dest in self.remotes.destinations_to_update(now, inactivity, per_tick) {
                if let Err(e) = self.push_lease_set(dest).await {
                    debug!(dest = %dest, error = %e, "Lease set push failed");
                }
            }
        }

        self.flush_ready().await;
        self.refresh_state();
    }

    fn log_status(&self) {
        let (inbound, outbound) = self.pools.counts();
        debug!(
            destination = %self.ident.short_id(),
            state = %self.state(),
            inbound,
            outbound,
            remotes = self.remotes.len(),
            unsent = self.unsent.total(),
            "Session status"
        );
    }

    /// Stop the session and release its tunnels
    ///
    /// Sends fail with [`SessionError::Terminated`] afterwards and pending
    /// lookups complete into nothing.
    pub fn terminate(&self) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.shutdown_tx.send(());
        self.tunnels.release_tunnels(&self.ident);
        info!(destination = %self.ident.short_id(), "Destination session terminated");
    }

    /// Wait for the background tasks to stop after [`Self::terminate`]
    pub async fn join(&self) {
        let handles: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Session task panicked");
            }
        }
    }
}

/// Pick at random between the two unexpired leases that last longest
fn select_lease(lease_set: &LeaseSet, now: DateTime<Utc>) -> Option<Lease> {
    let live = lease_set.live_leases(now);
    let candidates = &live[..live.len().min(2)];
    if candidates.is_empty() {
        return None;
    }
    Some(candidates[rand::rng().random_range(0..candidates.len())])
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use sable_core::TunnelId;

    use super::*;

    fn lease(gw: u8, expires: DateTime<Utc>) -> Lease {
        Lease {
            gateway: IdentHash::new([gw; 32]),
            tunnel_id: TunnelId(gw as u32),
            expires,
        }
    }

    #[test]
    fn test_select_lease_uses_two_latest() {
        let keys = DestinationKeys::generate();
        let now = Utc::now();
        let mut builder = LeaseSetBuilder::new(keys.destination(), keys.encryption.public_key());
        builder.add_lease(lease(1, now + Duration::minutes(3)));
        builder.add_lease(lease(2, now + Duration::minutes(9)));
        builder.add_lease(lease(3, now + Duration::minutes(8)));
        builder.add_lease(lease(4, now - Duration::minutes(1)));
        let lease_set = sign_lease_set(&builder, &keys.signing).unwrap();

        for _ in 0..50 {
            let chosen = select_lease(&lease_set, now).unwrap();
            assert!(chosen.gateway == IdentHash::new([2; 32]) || chosen.gateway == IdentHash::new([3; 32]));
        }
        assert!(select_lease(&lease_set, now + Duration::minutes(10)).is_none());
    }
}
