//! # Sable NetDb
//!
//! The network directory of the Sable overlay router: peer infos, lease
//! sets, peer reputation, and weighted peer selection.
//!
//! ## Components
//!
//! - [`WeightedSelector`]: Score-weighted random draws without order bias
//! - [`PeerReputationStore`]: Atomic per-peer outcome counters, scoring,
//!   inactivity classification, and persistence
//! - [`NetworkDirectory`]: Verified peer info and lease set tables, the
//!   floodfill subset, the selection pools, and the maintenance task
//!
//! ## Example
//!
//! ```rust,ignore
//! use sable_netdb::{DirectoryConfig, DirectoryDeps, NetworkDirectory, PoolKind};
//!
//! let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
//! let deps = DirectoryDeps::in_memory(local, transport, lookup);
//! let (directory, task) = NetworkDirectory::start(DirectoryConfig::default(), deps, shutdown_rx).await?;
//!
//! directory.add_peer_info(info)?;
//! let floodfill = directory.select_peer(PoolKind::Floodfill)?;
//! ```

pub mod config;
pub mod directory;
pub mod error;
pub mod floodfill;
mod maintenance;
pub mod reputation;
pub mod resolver;
pub mod selection;

pub use config::DirectoryConfig;
pub use directory::{AddOutcome, DirectoryDeps, DirectorySaveSummary, NetworkDirectory, PoolKind};
pub use error::{DirectoryError, DirectoryResult, SelectionError};
pub use floodfill::{FloodfillUpdater, PublishRecord};
pub use reputation::{
    Outcome, PeerReputation, PeerReputationStore, ReputationCounters, ReputationSnapshot,
    SaveSummary, compute_score,
};
pub use resolver::{LookupCallback, LookupResolver};
pub use selection::{PoolStats, WeightedSelector};
