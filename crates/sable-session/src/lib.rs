//! # Sable Session
//!
//! Destination sessions for the Sable overlay router.
//!
//! A session is the router-side runtime of one local destination. It owns
//! the destination's tunnel pools, keeps its lease set signed and
//! published, caches what it knows about remote destinations, and turns
//! application payloads into garlic sent through its outbound tunnels.
//!
//! ## Components
//!
//! - [`DestinationSession`]: Send path, inbound garlic dispatch, lease set
//!   publication, remote lookups, and the idle loop
//! - [`TunnelPools`]: Established and pending tunnels per direction
//! - [`RemoteDestinations`]: Per-remote lease sets, usage, and push state
//! - [`UnsentMessages`]: Payloads buffered until a remote becomes reachable
//!
//! ## Example
//!
//! ```rust,ignore
//! use sable_session::{DestinationSession, SessionConfig, SessionDeps, SessionKeys};
//!
//! let deps = SessionDeps::new(directory, tunnels, transport);
//! let session = DestinationSession::start(SessionConfig::default(), SessionKeys::router_signed(&keys), deps);
//!
//! session.tunnel_established(inbound);
//! session.tunnel_established(outbound);
//! let state = session.send(remote, Bytes::from_static(b"hello")).await?;
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod pools;
pub mod remote;
pub mod session;
pub mod unsent;

pub use config::SessionConfig;
pub use context::GarlicContext;
pub use error::{SessionError, SessionResult};
pub use event::{ClientState, SessionEvent};
pub use pools::TunnelPools;
pub use remote::{RemoteDestinations, RemoteEntry};
pub use session::{DestinationSession, SessionDeps, SessionKeys};
pub use unsent::{UnsentMessage, UnsentMessages};
