//! redb-backed record store
//!
//! One [`RedbStorage`] owns the database file; each [`RedbRecordStore`] is a
//! `u64 -> bytes` table inside it.

use std::path::PathBuf;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::error::{StorageError, StorageResult};
use crate::{RecordId, RecordStore};

/// Table holding signed peer infos
pub const PEER_INFO_TABLE: &str = "peer_info";

/// Table holding reputation records
pub const REPUTATION_TABLE: &str = "reputation";

/// Configuration for redb storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedbStorageConfig {
    /// Path to the database file
    pub db_path: PathBuf,
}

impl Default for RedbStorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/sable.redb"),
        }
    }
}

/// Main redb storage manager
pub struct RedbStorage {
    db: Arc<Database>,
    config: RedbStorageConfig,
}

impl RedbStorage {
    /// Open or create the database
    #[instrument(skip(config), fields(path = %config.db_path.display()))]
    pub fn open(config: RedbStorageConfig) -> StorageResult<Self> {
        if let Some(parent) = config.db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Io(e.to_string()))?;
        }

        let db = Database::create(&config.db_path).map_err(|e| StorageError::Io(e.to_string()))?;

        info!("Opened redb database");

        Ok(Self {
            db: Arc::new(db),
            config,
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &RedbStorageConfig {
        &self.config
    }

    /// Open (creating if needed) a record table
    pub fn record_store(&self, table: &'static str) -> StorageResult<RedbRecordStore> {
        let definition: TableDefinition<'static, u64, &[u8]> = TableDefinition::new(table);
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| StorageError::Database(e.to_string()))?;
        write_txn
            .open_table(definition)
            .map_err(|e| StorageError::Database(e.to_string()))?;
        write_txn
            .commit()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        debug!(table, "Initialized record table");
        Ok(RedbRecordStore {
            db: self.db.clone(),
            table: definition,
        })
    }
}

/// One record table in a redb database
pub struct RedbRecordStore {
    db: Arc<Database>,
    table: TableDefinition<'static, u64, &'static [u8]>,
}

impl RecordStore for RedbRecordStore {
    fn next(&self, after: Option<RecordId>) -> StorageResult<Option<RecordId>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| StorageError::Database(e.to_string()))?;
        let table = read_txn
            .open_table(self.table)
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let start = after.map(|id| id.0.saturating_add(1)).unwrap_or(0);
        let mut range = table
            .range(start..)
            .map_err(|e| StorageError::Io(e.to_string()))?;

        match range.next() {
            None => Ok(None),
            Some(entry) => {
                let (key, _) = entry.map_err(|e| StorageError::Io(e.to_string()))?;
                Ok(Some(RecordId(key.value())))
            }
        }
    }

    fn read(&self, id: RecordId) -> StorageResult<Vec<u8>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| StorageError::Database(e.to_string()))?;
        let table = read_txn
            .open_table(self.table)
            .map_err(|e| StorageError::Database(e.to_string()))?;

        table
            .get(id.0)
            .map_err(|e| StorageError::Io(e.to_string()))?
            .map(|v| v.value().to_vec())
            .ok_or_else(|| StorageError::not_found(format!("record {}", id.0)))
    }

    fn write(&self, data: &[u8], id: Option<RecordId>) -> StorageResult<RecordId> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let id = {
            let mut table = write_txn
                .open_table(self.table)
                .map_err(|e| StorageError::Database(e.to_string()))?;
            let id = match id {
                Some(id) => id.0,
                None => table
                    .last()
                    .map_err(|e| StorageError::Io(e.to_string()))?
                    .map(|(k, _)| k.value() + 1)
                    .unwrap_or(1),
            };
            table
                .insert(id, data)
                .map_err(|e| StorageError::Io(e.to_string()))?;
            id
        };

        write_txn
            .commit()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(RecordId(id))
    }

    fn delete(&self, id: RecordId) -> StorageResult<()> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        {
            let mut table = write_txn
                .open_table(self.table)
                .map_err(|e| StorageError::Database(e.to_string()))?;
            table
                .remove(id.0)
                .map_err(|e| StorageError::Io(e.to_string()))?;
        }

        write_txn
            .commit()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(())
    }
}
