//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Store trait.

use crate::storage::schema::{check_identifier, initialize_schema, record_table_sql};
use crate::storage::traits::{StorageError, StorageResult, Store};
use chrono::Utc;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Transaction};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Upper bound on bound parameters per `IN (...)` lookup
const MAX_LOOKUP_PARAMS: usize = 900;

/// SQLite storage backend
///
/// File-backed stores release their connection on [`Store::close`] and reopen
/// it lazily on the next call, so a status poller can keep reading checkpoints
/// after the worker has stopped.
pub struct SqliteStore {
    path: Option<PathBuf>,
    conn: Option<Connection>,
}

impl SqliteStore {
    /// Opens or creates a store at the given path
    ///
    /// Fails immediately if the file cannot be opened or the schema cannot be
    /// created, so configuration problems surface before any crawl starts.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = open_connection(path)?;
        Ok(Self {
            path: Some(path.to_path_buf()),
            conn: Some(conn),
        })
    }

    /// Creates an in-memory store (for testing)
    ///
    /// Closing an in-memory store is a no-op since reopening would lose its data.
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            path: None,
            conn: Some(conn),
        })
    }

    /// Returns true while a connection is held
    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    fn conn(&mut self) -> StorageResult<&mut Connection> {
        if self.conn.is_none() {
            if let Some(path) = &self.path {
                tracing::debug!("Reopening store at {}", path.display());
                self.conn = Some(open_connection(path)?);
            }
        }
        self.conn.as_mut().ok_or(StorageError::Closed)
    }

    /// Runs `f` inside a transaction, committing on `Ok` and rolling back on `Err`
    fn with_transaction<T>(
        &mut self,
        f: impl FnOnce(&Transaction<'_>) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let conn = self.conn()?;
        let tx = conn.transaction()?;
        // Dropping an uncommitted transaction rolls it back
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

fn open_connection(path: &Path) -> StorageResult<Connection> {
    let conn = Connection::open(path)?;

    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA temp_store = MEMORY;
    ",
    )?;

    initialize_schema(&conn)?;

    Ok(conn)
}

fn insert_all(
    tx: &Transaction<'_>,
    table: &str,
    id_column: &str,
    entries: &[(String, String)],
) -> StorageResult<()> {
    check_identifier(table)?;
    check_identifier(id_column)?;

    let now = Utc::now().to_rfc3339();
    let mut stmt = tx.prepare(&format!(
        "INSERT INTO \"{table}\" (\"{id_column}\", content, captured_at) VALUES (?1, ?2, ?3)"
    ))?;

    for (identifier, content) in entries {
        stmt.execute(params![identifier, content, now])
            .map_err(|e| map_insert_error(e, table, identifier))?;
    }

    Ok(())
}

fn map_insert_error(err: rusqlite::Error, table: &str, identifier: &str) -> StorageError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation
                && (failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                    || failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE) =>
        {
            StorageError::DuplicateKey {
                table: table.to_string(),
                identifier: identifier.to_string(),
            }
        }
        _ => StorageError::Sqlite(err),
    }
}

fn upsert(tx: &Transaction<'_>, key: &str, value: &str) -> StorageResult<()> {
    tx.execute(
        "INSERT OR REPLACE INTO progress (key, value) VALUES (?1, ?2)",
        params![key, value],
    )?;
    Ok(())
}

impl Store for SqliteStore {
    // ===== Record Tables =====

    fn ensure_record_table(&mut self, table: &str, id_column: &str) -> StorageResult<()> {
        let sql = record_table_sql(table, id_column)?;
        self.with_transaction(|tx| {
            tx.execute_batch(&sql)?;
            Ok(())
        })
    }

    fn existing_identifiers(
        &mut self,
        table: &str,
        id_column: &str,
        candidates: &[String],
    ) -> StorageResult<HashSet<String>> {
        check_identifier(table)?;
        check_identifier(id_column)?;

        let mut found = HashSet::new();
        if candidates.is_empty() {
            return Ok(found);
        }

        let conn = self.conn()?;
        // A listing page (at most 500 members) always fits in one lookup
        for group in candidates.chunks(MAX_LOOKUP_PARAMS) {
            let placeholders = vec!["?"; group.len()].join(", ");
            let mut stmt = conn.prepare(&format!(
                "SELECT \"{id_column}\" FROM \"{table}\" WHERE \"{id_column}\" IN ({placeholders})"
            ))?;
            let rows = stmt.query_map(params_from_iter(group.iter()), |row| {
                row.get::<_, String>(0)
            })?;
            for row in rows {
                found.insert(row?);
            }
        }

        Ok(found)
    }

    fn insert_records(
        &mut self,
        table: &str,
        id_column: &str,
        entries: &[(String, String)],
    ) -> StorageResult<()> {
        self.with_transaction(|tx| insert_all(tx, table, id_column, entries))
    }

    fn commit_chunk(
        &mut self,
        table: &str,
        id_column: &str,
        entries: &[(String, String)],
        count_key: &str,
        new_count: u64,
    ) -> StorageResult<()> {
        self.with_transaction(|tx| {
            insert_all(tx, table, id_column, entries)?;
            upsert(tx, count_key, &new_count.to_string())
        })
    }

    fn count_records(&mut self, table: &str) -> StorageResult<u64> {
        check_identifier(table)?;
        let count: i64 =
            self.conn()?
                .query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |row| {
                    row.get(0)
                })?;
        Ok(count as u64)
    }

    // ===== Checkpoints =====

    fn upsert_checkpoint(&mut self, key: &str, value: &str) -> StorageResult<()> {
        self.with_transaction(|tx| upsert(tx, key, value))
    }

    fn read_checkpoint(&mut self, key: &str) -> StorageResult<Option<String>> {
        let value = self
            .conn()?
            .query_row(
                "SELECT value FROM progress WHERE key = ?1",
                params![key],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .flatten();
        Ok(value)
    }

    fn delete_checkpoint(&mut self, key: &str) -> StorageResult<()> {
        self.with_transaction(|tx| {
            tx.execute("DELETE FROM progress WHERE key = ?1", params![key])?;
            Ok(())
        })
    }

    // ===== Connection =====

    fn close(&mut self) {
        if self.path.is_some() {
            if let Some(conn) = self.conn.take() {
                if let Err((_, e)) = conn.close() {
                    tracing::warn!("Failed to close store cleanly: {}", e);
                }
            }
        }
    }
}
