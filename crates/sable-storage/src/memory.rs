//! In-memory record store
//!
//! Records live in an ordered map so that cursor iteration is stable.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::trace;

use crate::error::{StorageError, StorageResult};
use crate::{RecordId, RecordStore};

/// In-memory implementation of RecordStore
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    records: RwLock<BTreeMap<u64, Vec<u8>>>,
    next_id: AtomicU64,
}

impl InMemoryRecordStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl RecordStore for InMemoryRecordStore {
    fn next(&self, after: Option<RecordId>) -> StorageResult<Option<RecordId>> {
        let records = self.records.read();
        let next = match after {
            None => records.keys().next(),
            Some(RecordId(id)) => records.range(id.saturating_add(1)..).map(|(k, _)| k).next(),
        };
        Ok(next.copied().map(RecordId))
    }

    fn read(&self, id: RecordId) -> StorageResult<Vec<u8>> {
        self.records
            .read()
            .get(&id.0)
            .cloned()
            .ok_or_else(|| StorageError::not_found(format!("record {}", id.0)))
    }

    fn write(&self, data: &[u8], id: Option<RecordId>) -> StorageResult<RecordId> {
        let id = match id {
            Some(id) => id,
            None => RecordId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1),
        };
        self.records.write().insert(id.0, data.to_vec());
        trace!(record = id.0, len = data.len(), "Wrote record");
        Ok(id)
    }

    fn delete(&self, id: RecordId) -> StorageResult<()> {
        self.records.write().remove(&id.0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_iterate() {
        let store = InMemoryRecordStore::new();
        let a = store.write(b"a", None).unwrap();
        let b = store.write(b"b", None).unwrap();
        assert!(a < b);
        assert_eq!(store.next(None).unwrap(), Some(a));
        assert_eq!(store.next(Some(a)).unwrap(), Some(b));
        assert_eq!(store.next(Some(b)).unwrap(), None);
        assert_eq!(store.ids().unwrap(), vec![a, b]);
    }

    #[test]
    fn test_overwrite_and_delete() {
        let store = InMemoryRecordStore::new();
        let id = store.write(b"first", None).unwrap();
        assert_eq!(store.write(b"second", Some(id)).unwrap(), id);
        assert_eq!(store.read(id).unwrap(), b"second");
        store.delete(id).unwrap();
        assert!(store.is_empty());
        assert!(matches!(store.read(id), Err(StorageError::NotFound(_))));
    }
}
