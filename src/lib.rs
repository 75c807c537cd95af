//! SNPedia-Harvest: a resumable category harvester for MediaWiki sites
//!
//! This crate walks wiki categories page by page, fetches the content of every
//! member it has not stored yet, and persists records together with pagination
//! checkpoints so an interrupted multi-hour run picks up where it left off.

pub mod config;
pub mod engine;
pub mod job;
pub mod journal;
pub mod progress;
pub mod source;
pub mod storage;

use thiserror::Error;

/// Main error type for harvester operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Remote source error: {0}")]
    Source(#[from] source::SourceError),

    #[error("Engine error: {0}")]
    Engine(#[from] engine::EngineError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for harvester operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use engine::{Engine, EngineState};
pub use job::CrawlJob;
pub use progress::{ProgressObserver, SilentObserver, TracingObserver};
pub use source::{ContentSource, MediaWikiSource, SourceError};
pub use storage::{SqliteStore, Store, StorageError};
