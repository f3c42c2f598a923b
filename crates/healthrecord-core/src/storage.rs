//! Persistent storage using redb.
//!
//! Holds the saved record document and local flags such as `isActive`.
//! Nothing stored here besides the document is ever replicated.

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use redb::{Database, ReadableTable, TableDefinition};
use tracing::{debug, warn};

use crate::error::RecordResult;
use crate::store::ActivityFlag;

const DOCUMENTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("documents");
const FLAGS_TABLE: TableDefinition<&str, bool> = TableDefinition::new("flags");

/// Key of the current health record document
pub const RECORD_KEY: &str = "healthRecord";

/// Flag set while a record with an identity is loaded
pub const IS_ACTIVE_FLAG: &str = "isActive";

/// Storage layer using redb for ACID-compliant persistence
#[derive(Clone)]
pub struct Storage {
    db: Arc<RwLock<Database>>,
}

impl Storage {
    /// Create a new storage instance at the given path.
    ///
    /// Creates the parent directory and all tables if they don't exist.
    pub fn new(path: impl AsRef<Path>) -> RecordResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path)?;
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(DOCUMENTS_TABLE)?;
            let _ = write_txn.open_table(FLAGS_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self {
            db: Arc::new(RwLock::new(db)),
        })
    }

    /// Save a document, overwriting any previous version under `key`.
    pub fn save_document(&self, key: &str, data: &[u8]) -> RecordResult<()> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(DOCUMENTS_TABLE)?;
            table.insert(key, data)?;
        }
        write_txn.commit()?;
        debug!(key, bytes = data.len(), "Saved document");
        Ok(())
    }

    /// Load a document.
    ///
    /// Returns `None` if nothing is stored under `key`.
    pub fn load_document(&self, key: &str) -> RecordResult<Option<Vec<u8>>> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(DOCUMENTS_TABLE)?;
        Ok(table.get(key)?.map(|v| v.value().to_vec()))
    }

    /// Delete a document. Deleting a missing document is not an error.
    pub fn delete_document(&self, key: &str) -> RecordResult<()> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(DOCUMENTS_TABLE)?;
            table.remove(key)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn set_flag(&self, name: &str, value: bool) -> RecordResult<()> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(FLAGS_TABLE)?;
            table.insert(name, value)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Read a flag; unset flags read as `false`.
    pub fn get_flag(&self, name: &str) -> RecordResult<bool> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(FLAGS_TABLE)?;
        Ok(table.get(name)?.map(|v| v.value()).unwrap_or(false))
    }
}

impl ActivityFlag for Storage {
    fn set_active(&self, active: bool) {
        match self.set_flag(IS_ACTIVE_FLAG, active) {
            Ok(()) => debug!(active, "Stored activity flag"),
            Err(e) => warn!(error = %e, "Failed to store activity flag"),
        }
    }
}
