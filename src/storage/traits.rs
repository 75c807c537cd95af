//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use std::collections::HashSet;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Duplicate key {identifier} in table {table}")]
    DuplicateKey { table: String, identifier: String },

    #[error("Invalid table or column name: {0}")]
    InvalidName(String),

    #[error("Store connection is closed")]
    Closed,

    #[error("Store lock poisoned")]
    Poisoned,
}

impl StorageError {
    /// Returns true for the uniqueness race a pre-filter should have prevented
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, Self::DuplicateKey { .. })
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// Every mutating operation runs inside a transaction that commits on success
/// and rolls back on error, so a failed call leaves the store unchanged.
pub trait Store {
    // ===== Record Tables =====

    /// Creates the record table for a job if it does not exist
    fn ensure_record_table(&mut self, table: &str, id_column: &str) -> StorageResult<()>;

    /// Returns the subset of `candidates` already stored in `table`
    ///
    /// Issued as a single bulk lookup, not one query per identifier.
    fn existing_identifiers(
        &mut self,
        table: &str,
        id_column: &str,
        candidates: &[String],
    ) -> StorageResult<HashSet<String>>;

    /// Inserts all entries in one transaction
    ///
    /// Fails with [`StorageError::DuplicateKey`] and inserts nothing if any
    /// identifier is already present.
    fn insert_records(
        &mut self,
        table: &str,
        id_column: &str,
        entries: &[(String, String)],
    ) -> StorageResult<()>;

    /// Inserts a chunk of records and advances the count checkpoint in the
    /// same transaction
    fn commit_chunk(
        &mut self,
        table: &str,
        id_column: &str,
        entries: &[(String, String)],
        count_key: &str,
        new_count: u64,
    ) -> StorageResult<()>;

    /// Counts the records stored in `table`
    fn count_records(&mut self, table: &str) -> StorageResult<u64>;

    // ===== Checkpoints =====

    /// Inserts or replaces a checkpoint value
    fn upsert_checkpoint(&mut self, key: &str, value: &str) -> StorageResult<()>;

    /// Reads a checkpoint value
    fn read_checkpoint(&mut self, key: &str) -> StorageResult<Option<String>>;

    /// Removes a checkpoint
    fn delete_checkpoint(&mut self, key: &str) -> StorageResult<()>;

    // ===== Connection =====

    /// Releases the underlying connection
    fn close(&mut self);
}
