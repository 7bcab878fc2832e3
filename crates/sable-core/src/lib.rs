//! # Sable Core
//!
//! Core types, collaborator traits, and errors for the Sable overlay router.
//!
//! Everything the directory, the reputation engine, and destination sessions
//! share lives here, so that the higher crates agree on one vocabulary.
//!
//! ## Key Types
//!
//! - [`IdentHash`]: 32-byte identity hash used as the primary key everywhere
//! - [`PeerInfo`]: Signed router record with capabilities and addresses
//! - [`LeaseSet`]: Signed set of inbound paths into a destination
//! - [`Garlic`]/[`GarlicClove`]: Decrypted garlic payload and its cloves
//! - [`TimeWindowMap`]: Keyed cache whose entries vanish after a horizon
//!
//! ## Collaborators
//!
//! - [`RouterTransport`]: Best-effort router-to-router send
//! - [`TunnelProvider`]: Local tunnel distribution and outbound tunnel sends
//! - [`LookupProtocol`]: Network lookups for unknown records
//! - [`Clock`]: Time abstraction for testability

pub mod error;
pub mod event;
pub mod garlic;
pub mod identity;
pub mod lease_set;
pub mod message;
pub mod mock;
pub mod peer_info;
pub mod time_window;
pub mod traits;
pub mod transport;
pub mod tunnel;

pub use error::*;
pub use event::*;
pub use garlic::*;
pub use identity::*;
pub use lease_set::*;
pub use message::*;
pub use mock::*;
pub use peer_info::*;
pub use time_window::*;
pub use traits::*;
pub use transport::*;
pub use tunnel::*;
