//! # Sable Router
//!
//! Composition root of the Sable overlay router.
//!
//! This crate provides [`Router`], which ties together:
//! - The network directory and its persistent stores (redb or in-memory)
//! - The directory maintenance task
//! - The destination sessions hosted for clients
//!
//! It also exposes the client control surface as typed calls: create,
//! reconfigure and destroy sessions, attach signed lease sets, look up hosts,
//! and send messages.
//!
//! ## Example
//!
//! ```rust,ignore
//! use sable_router::{Router, RouterConfig, RouterDeps, SessionConfigBody, SignedSessionConfig};
//!
//! let router = Router::start(RouterConfig::with_data_dir("./sable"), deps).await?;
//!
//! let body = SessionConfigBody::new(keys.destination()).with_option("inbound.quantity", "3");
//! let (status, id) = router.create_session(SignedSessionConfig::sign(body, &keys.signing)?);
//!
//! let status = router.send_message(id.unwrap(), remote, payload).await?;
//! router.shutdown().await;
//! ```

mod config;
pub mod control;
mod error;

pub use config::RouterConfig;
pub use control::{
    HostLookup, MessageStatus, SessionConfigBody, SessionId, SessionStatus, SignedSessionConfig,
};
pub use error::{RouterError, RouterResult};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use sable_core::{
    Clock, GarlicMessage, IdentHash, LeaseSet, LookupProtocol, RouterMessage, RouterTransport,
    StoreRecord, SystemClock, TunnelProvider,
};
use sable_crypto::{DestinationKeys, GarlicKey, RouterKeys};
use sable_logging::router_span;
use sable_netdb::{DirectoryDeps, LookupCallback, NetworkDirectory};
use sable_session::{DestinationSession, SessionDeps, SessionKeys};
use sable_storage::redb_store::{PEER_INFO_TABLE, REPUTATION_TABLE};
use sable_storage::{InMemoryRecordStore, RecordStore, RedbStorage, RedbStorageConfig};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, instrument, trace, warn};

/// Session id clients use to mean "no session"
const RESERVED_SESSION_ID: u16 = u16::MAX;

/// Collaborators of a router
pub struct RouterDeps {
    pub keys: RouterKeys,
    pub transport: Arc<dyn RouterTransport>,
    pub lookup: Arc<dyn LookupProtocol>,
    pub tunnels: Arc<dyn TunnelProvider>,
    pub clock: Arc<dyn Clock>,
}

impl RouterDeps {
    /// Dependencies with the system clock
    pub fn new(
        keys: RouterKeys,
        transport: Arc<dyn RouterTransport>,
        lookup: Arc<dyn LookupProtocol>,
        tunnels: Arc<dyn TunnelProvider>,
    ) -> Self {
        Self {
            keys,
            transport,
            lookup,
            tunnels,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// The overlay router core
///
/// Owns the network directory and every destination session. Tunnel and
/// transport plumbing stay behind the collaborator traits in [`RouterDeps`].
pub struct Router {
    config: RouterConfig,
    keys: RouterKeys,
    ident: IdentHash,
    directory: Arc<NetworkDirectory>,
    sessions: DashMap<SessionId, Arc<DestinationSession>>,
    destinations: DashMap<IdentHash, SessionId>,
    next_session_id: AtomicU16,
    tunnels: Arc<dyn TunnelProvider>,
    transport: Arc<dyn RouterTransport>,
    clock: Arc<dyn Clock>,
    shutdown_tx: broadcast::Sender<()>,
    background_tasks: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
}

impl Router {
    /// Open the stores, load the directory, and start maintenance
    ///
    /// Fails when the stores cannot be opened or the directory load errors
    /// or times out; a router never runs on a partial directory.
    #[instrument(skip_all, fields(data_dir = ?config.data_dir))]
    pub async fn start(config: RouterConfig, deps: RouterDeps) -> RouterResult<Arc<Self>> {
        let ident = deps.keys.ident_hash();
        let (peer_store, reputation_store) = open_stores(&config)?;
        let (shutdown_tx, _) = broadcast::channel(1);

        let directory_deps = DirectoryDeps {
            local: ident,
            peer_store,
            reputation_store,
            transport: deps.transport.clone(),
            lookup: deps.lookup,
            clock: deps.clock.clone(),
        };
        let (directory, maintenance) =
            NetworkDirectory::start(config.directory.clone(), directory_deps, shutdown_tx.subscribe())
                .instrument(router_span(&ident))
                .await?;

        info!(
            router = %ident.short_id(),
            peers = directory.peer_count(),
            persistent = config.data_dir.is_some(),
            "Router started"
        );

        Ok(Arc::new(Self {
            config,
            keys: deps.keys,
            ident,
            directory,
            sessions: DashMap::new(),
            destinations: DashMap::new(),
            next_session_id: AtomicU16::new(0),
            tunnels: deps.tunnels,
            transport: deps.transport,
            clock: deps.clock,
            shutdown_tx,
            background_tasks: Mutex::new(vec![maintenance]),
            running: AtomicBool::new(true),
        }))
    }

    /// Terminate every session and stop the directory
    ///
    /// The directory task saves once more before it exits.
    #[instrument(skip(self), fields(router = %self.ident.short_id()))]
    pub async fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        let sessions: Vec<Arc<DestinationSession>> =
            self.sessions.iter().map(|e| e.value().clone()).collect();
        self.sessions.clear();
        self.destinations.clear();
        for session in &sessions {
            session.terminate();
        }
        for session in &sessions {
            session.join().await;
        }

        let _ = self.shutdown_tx.send(());
        let tasks: Vec<JoinHandle<()>> = self.background_tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Router task panicked");
            }
        }
        info!(sessions = sessions.len(), "Router stopped");
    }

    pub fn ident_hash(&self) -> IdentHash {
        self.ident
    }

    pub fn keys(&self) -> &RouterKeys {
        &self.keys
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn directory(&self) -> &Arc<NetworkDirectory> {
        &self.directory
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn session(&self, id: SessionId) -> RouterResult<Arc<DestinationSession>> {
        self.sessions
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(RouterError::SessionNotFound(id))
    }

    /// The session hosting `destination`, if any
    pub fn session_for(&self, destination: &IdentHash) -> Option<(SessionId, Arc<DestinationSession>)> {
        let id = *self.destinations.get(destination)?;
        self.sessions.get(&id).map(|e| (id, e.value().clone()))
    }

    // ========== Client control ==========

    /// Create a session for a client that signs its own lease sets
    ///
    /// A config whose signature does not verify against the destination is
    /// `Invalid`; a destination that already has a session, or a router at
    /// its session limit, is `Refused`.
    #[instrument(skip(self, signed), fields(destination = %signed.ident_hash().short_id()))]
    pub fn create_session(&self, signed: SignedSessionConfig) -> (SessionStatus, Option<SessionId>) {
        if !self.is_running() {
            return (SessionStatus::Refused, None);
        }
        if let Err(e) = signed.verify() {
            warn!(error = %e, "Session config signature invalid");
            return (SessionStatus::Invalid, None);
        }
        let keys = SessionKeys::external(signed.body.destination, GarlicKey::generate());
        match self.spawn_session(keys, &signed.body.options) {
            Ok(id) => (SessionStatus::Created, Some(id)),
            Err(status) => (status, None),
        }
    }

    /// Create a session whose lease sets the router signs
    pub fn create_local_session(
        &self,
        keys: &DestinationKeys,
        options: &BTreeMap<String, String>,
    ) -> RouterResult<SessionId> {
        if !self.is_running() {
            return Err(RouterError::ShutDown);
        }
        self.spawn_session(SessionKeys::router_signed(keys), options)
            .map_err(|_| RouterError::Refused(keys.ident_hash().short_id()))
    }

    fn spawn_session(
        &self,
        keys: SessionKeys,
        options: &BTreeMap<String, String>,
    ) -> Result<SessionId, SessionStatus> {
        let destination = keys.destination.ident_hash();
        if self.sessions.len() >= self.config.max_sessions {
            warn!(limit = self.config.max_sessions, "Session limit reached");
            return Err(SessionStatus::Refused);
        }
        let id = self.allocate_session_id().ok_or(SessionStatus::Refused)?;
        match self.destinations.entry(destination) {
            Entry::Occupied(_) => {
                debug!(destination = %destination.short_id(), "Destination already has a session");
                return Err(SessionStatus::Refused);
            }
            Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }

        let mut config = self.config.session.clone();
        let applied = config.apply_options(options);
        let deps = SessionDeps {
            directory: self.directory.clone(),
            tunnels: self.tunnels.clone(),
            transport: self.transport.clone(),
            clock: self.clock.clone(),
        };
        let session = DestinationSession::start(config, keys, deps);
        self.sessions.insert(id, session);
        info!(session = %id, destination = %destination.short_id(), applied, "Session created");
        Ok(id)
    }

    fn allocate_session_id(&self) -> Option<SessionId> {
        for _ in 0..u16::MAX {
            let candidate = self.next_session_id.fetch_add(1, Ordering::Relaxed);
            if candidate == RESERVED_SESSION_ID {
                continue;
            }
            let id = SessionId(candidate);
            if !self.sessions.contains_key(&id) {
                return Some(id);
            }
        }
        None
    }

    /// Apply client options to a running session
    pub fn reconfigure(&self, id: SessionId, options: &BTreeMap<String, String>) -> RouterResult<SessionStatus> {
        let session = self.session(id)?;
        let applied = session.reconfigure(options);
        debug!(session = %id, applied, "Session reconfigured");
        Ok(SessionStatus::Updated)
    }

    /// Attach a client-signed lease set and the key it advertises
    ///
    /// The lease set is validated before the session's decrypt key changes.
    pub fn create_lease_set(&self, id: SessionId, lease_set: LeaseSet, temporary_key: GarlicKey) -> RouterResult<()> {
        let session = self.session(id)?;
        if lease_set.encryption_key() != &temporary_key.public_key() {
            return Err(sable_crypto::CryptoError::KeyMismatch.into());
        }
        session.set_signed_leases(lease_set)?;
        session.set_temporary_key(temporary_key)?;
        Ok(())
    }

    /// Find a destination's lease set
    ///
    /// With a session the lookup goes through the session's remote cache
    /// and retry policy; without one it goes straight to the directory.
    /// A name that is not a hash resolves to `None`.
    pub async fn lookup(&self, session: Option<SessionId>, host: HostLookup) -> RouterResult<Option<Arc<LeaseSet>>> {
        let Some(key) = host.ident_hash() else {
            debug!(?host, "Unresolvable host name");
            return Ok(None);
        };
        let (tx, rx) = oneshot::channel();
        let callback: LookupCallback<LeaseSet> = Box::new(move |_, found| {
            let _ = tx.send(found);
        });
        match session {
            Some(id) => self.session(id)?.lookup_destination(key, Some(callback)),
            None => self.directory.resolve_lease_set(key, callback),
        }
        // A dropped callback means the session went away mid-lookup
        Ok(rx.await.unwrap_or(None))
    }

    pub async fn send_message(&self, id: SessionId, dest: IdentHash, payload: Bytes) -> RouterResult<MessageStatus> {
        let session = self.session(id)?;
        let state = session.send(dest, payload).await?;
        Ok(state.into())
    }

    pub async fn send_message_expires(
        &self,
        id: SessionId,
        dest: IdentHash,
        payload: Bytes,
        expires: DateTime<Utc>,
    ) -> RouterResult<MessageStatus> {
        let session = self.session(id)?;
        let state = session.send_with_expiry(dest, payload, expires).await?;
        Ok(state.into())
    }

    /// Terminate a session and release its tunnels
    pub async fn destroy_session(&self, id: SessionId) -> RouterResult<SessionStatus> {
        let (_, session) = self
            .sessions
            .remove(&id)
            .ok_or(RouterError::SessionNotFound(id))?;
        self.destinations.remove(&session.ident_hash());
        session.terminate();
        session.join().await;
        info!(session = %id, destination = %session.ident_hash().short_id(), "Session destroyed");
        Ok(SessionStatus::Destroyed)
    }

    // ========== Inbound traffic ==========

    /// Hand garlic that arrived for a local destination to its session
    pub async fn garlic_received(&self, destination: &IdentHash, message: GarlicMessage) -> usize {
        match self.session_for(destination) {
            Some((_, session)) => session.garlic_received(message).await,
            None => {
                debug!(destination = %destination.short_id(), "Garlic for unknown destination");
                0
            }
        }
    }

    /// Handle a message addressed to the router itself
    pub fn handle_router_message(&self, message: RouterMessage) {
        match message {
            RouterMessage::DatabaseStore(store) => {
                let result = match store.record {
                    StoreRecord::PeerInfo(info) => self.directory.add_peer_info(info),
                    StoreRecord::LeaseSet(lease_set) => self.directory.add_lease_set(lease_set),
                };
                if let Err(e) = result {
                    debug!(key = %store.key, error = %e, "Refused stored record");
                }
            }
            RouterMessage::DeliveryStatus { message_id } => {
                self.directory.handle_delivery_status(message_id);
            }
            RouterMessage::DatabaseSearchReply(reply) => self.directory.add_search_reply(reply),
            other => {
                trace!(kind = other.kind(), "Passing message to the tunnel layer");
                self.tunnels.distribute_local(other);
            }
        }
    }
}

fn open_stores(config: &RouterConfig) -> RouterResult<(Arc<dyn RecordStore>, Arc<dyn RecordStore>)> {
    match config.db_path() {
        Some(db_path) => {
            let storage = RedbStorage::open(RedbStorageConfig { db_path })?;
            let peers: Arc<dyn RecordStore> = Arc::new(storage.record_store(PEER_INFO_TABLE)?);
            let reputation: Arc<dyn RecordStore> = Arc::new(storage.record_store(REPUTATION_TABLE)?);
            Ok((peers, reputation))
        }
        None => Ok((
            Arc::new(InMemoryRecordStore::new()),
            Arc::new(InMemoryRecordStore::new()),
        )),
    }
}
