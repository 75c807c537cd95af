//! Append-only error journal
//!
//! One line per failure: `timestamp | identifier | class | message`. The
//! header is written only when the file is first created; the engine never
//! reads the journal back.

use crate::source::SourceError;
use crate::storage::StorageError;
use chrono::Local;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Timestamp format shared by the header and every entry
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Classification recorded for each journaled failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Remote service reported overload (429/502/503/504, maxlag)
    Overloaded,
    /// Any other remote failure
    Remote,
    /// Storage failure
    Storage,
    /// Uniqueness race on insert
    DuplicateKey,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Overloaded => "502_ERROR",
            Self::Remote => "OTHER_ERROR",
            Self::Storage => "STORAGE_ERROR",
            Self::DuplicateKey => "DUPLICATE_KEY",
        }
    }

    pub fn of_source(err: &SourceError) -> Self {
        if err.is_overloaded() {
            Self::Overloaded
        } else {
            Self::Remote
        }
    }

    pub fn of_storage(err: &StorageError) -> Self {
        if err.is_duplicate_key() {
            Self::DuplicateKey
        } else {
            Self::Storage
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only failure log
#[derive(Debug)]
pub struct ErrorJournal {
    path: PathBuf,
    file: Mutex<File>,
}

impl ErrorJournal {
    /// Opens the journal, creating it with a header if it does not exist
    pub fn open(path: &Path) -> io::Result<Self> {
        let is_new = !path.exists();
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;

        if is_new {
            writeln!(file, "# SNPedia Scraper Error Log")?;
            writeln!(file, "# Started: {}", Local::now().format(TIMESTAMP_FORMAT))?;
            writeln!(file, "# Format: timestamp | rsid | error_type | error_message")?;
            writeln!(file, "{}", "-".repeat(80))?;
            file.flush()?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one failure line and flushes it
    pub fn record(&self, identifier: &str, class: ErrorClass, message: &str) -> io::Result<()> {
        let timestamp = Local::now().format(TIMESTAMP_FORMAT);
        // Keep one failure per line
        let message = message.replace(['\n', '\r'], " ");

        let mut file = self
            .file
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "journal lock poisoned"))?;
        writeln!(file, "{} | {} | {} | {}", timestamp, identifier, class, message)?;
        file.flush()
    }
}
