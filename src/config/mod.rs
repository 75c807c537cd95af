//! Configuration module for the harvester
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//! Every section is optional; an empty file reproduces the default SNPedia
//! harvest of SNP and genotype pages.
//!
//! # Example
//!
//! ```no_run
//! use snpedia_harvest::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! println!("Harvesting {} categories", config.effective_jobs().len());
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{Config, SourceConfig, StorageConfig, TimingConfig, UserAgentConfig};

// Re-export parser functions
pub use parser::{compute_config_hash, hash_content, load_config, load_config_with_hash, parse_config};
