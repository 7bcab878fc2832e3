//! # Sable Storage
//!
//! Keyed record stores used by the directory and the reputation engine.
//!
//! A [`RecordStore`] is a flat sequence of binary records addressed by a
//! [`RecordId`] cursor. Callers walk it with [`RecordStore::next`], and every
//! record starts with a small type tag (see [`record`]) so that obsolete
//! record kinds can be recognized and deleted on load.
//!
//! ## Features
//!
//! - **InMemoryRecordStore**: Ordered in-memory store for tests and ephemeral routers
//! - **RedbRecordStore**: Persistent store backed by one redb table
//!
//! ## Example
//!
//! ```rust,ignore
//! use sable_storage::{InMemoryRecordStore, RecordStore};
//!
//! let store = InMemoryRecordStore::new();
//! let id = store.write(b"payload", None)?;
//! assert_eq!(store.read(id)?, b"payload");
//! assert_eq!(store.next(None)?, Some(id));
//! ```

pub mod error;
pub mod memory;
pub mod record;
pub mod redb_store;

pub use error::{StorageError, StorageResult};
pub use memory::InMemoryRecordStore;
pub use record::{RecordKind, decode_record, encode_record};
pub use redb_store::{RedbRecordStore, RedbStorage, RedbStorageConfig};

use serde::{Deserialize, Serialize};

/// Cursor addressing one record in a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(pub u64);

/// Keyed binary record store
///
/// Implementations are synchronous; async callers wrap bulk work in
/// `spawn_blocking`.
pub trait RecordStore: Send + Sync {
    /// The record following `after`, or the first record when `after` is `None`
    fn next(&self, after: Option<RecordId>) -> StorageResult<Option<RecordId>>;

    /// Read the record at `id`
    fn read(&self, id: RecordId) -> StorageResult<Vec<u8>>;

    /// Write a record, overwriting `id` when given, else appending
    fn write(&self, data: &[u8], id: Option<RecordId>) -> StorageResult<RecordId>;

    /// Delete the record at `id`
    fn delete(&self, id: RecordId) -> StorageResult<()>;

    /// Collect every record id in order
    fn ids(&self) -> StorageResult<Vec<RecordId>> {
        let mut ids = Vec::new();
        let mut cursor = None;
        while let Some(id) = self.next(cursor)? {
            ids.push(id);
            cursor = Some(id);
        }
        Ok(ids)
    }
}
