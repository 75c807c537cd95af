//! Storage module for persisting harvested records and crawl checkpoints
//!
//! This module handles all database operations for the harvester, including:
//! - SQLite database initialization and schema management
//! - Per-job record tables with identifier uniqueness
//! - The checkpoint table used to resume interrupted crawls

mod schema;
mod sqlite;
mod traits;

pub use schema::is_sql_identifier;
pub use sqlite::SqliteStore;
pub use traits::{StorageError, StorageResult, Store};

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Store handle shared between the crawl worker and the controller
pub type SharedStore = Arc<Mutex<SqliteStore>>;

/// Opens a store and wraps it for sharing
pub fn open_shared(path: &Path) -> StorageResult<SharedStore> {
    Ok(Arc::new(Mutex::new(SqliteStore::open(path)?)))
}

/// Locks a shared store, mapping lock poisoning to a storage error
pub fn lock_store(store: &SharedStore) -> StorageResult<MutexGuard<'_, SqliteStore>> {
    store.lock().map_err(|_| StorageError::Poisoned)
}

/// Reads a numeric checkpoint, treating absent or unparsable values as zero
pub fn read_count(store: &mut impl Store, key: &str) -> StorageResult<u64> {
    let value = store.read_checkpoint(key)?;
    Ok(value.and_then(|v| v.trim().parse().ok()).unwrap_or(0))
}
