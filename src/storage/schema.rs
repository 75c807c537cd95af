//! Database schema definitions
//!
//! The checkpoint table is fixed. Record tables are created per job from the
//! job's table and identifier column names.

use crate::storage::traits::{StorageError, StorageResult};

/// SQL schema for the fixed part of the database
pub const SCHEMA_SQL: &str = r#"
-- Crawl checkpoints: record counts, pagination cursors, exhaustion markers
CREATE TABLE IF NOT EXISTS progress (
    key TEXT PRIMARY KEY,
    value TEXT
);
"#;

/// Initializes the fixed schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

/// Builds the `CREATE TABLE` statement for a record table
///
/// Table and column names are interpolated into SQL, so both must pass
/// [`check_identifier`] first.
pub fn record_table_sql(table: &str, id_column: &str) -> StorageResult<String> {
    check_identifier(table)?;
    check_identifier(id_column)?;
    Ok(format!(
        "CREATE TABLE IF NOT EXISTS \"{table}\" (
            \"{id_column}\" TEXT PRIMARY KEY,
            content TEXT,
            captured_at TIMESTAMP
        )"
    ))
}

/// Returns true if `name` is a plain SQL identifier (`[A-Za-z_][A-Za-z0-9_]*`)
pub fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Rejects names that are not plain SQL identifiers
pub fn check_identifier(name: &str) -> StorageResult<()> {
    if is_sql_identifier(name) {
        Ok(())
    } else {
        Err(StorageError::InvalidName(name.to_string()))
    }
}
