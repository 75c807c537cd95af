use crate::job::CrawlJob;
use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for the harvester
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(rename = "user-agent", default)]
    pub user_agent: UserAgentConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(rename = "job", default)]
    pub jobs: Vec<CrawlJob>,
}

impl Config {
    /// Configured jobs, or the default SNP/genotype work list when none are given
    pub fn effective_jobs(&self) -> Vec<CrawlJob> {
        if self.jobs.is_empty() {
            CrawlJob::default_jobs()
        } else {
            self.jobs.clone()
        }
    }
}

/// Local file locations
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path", default = "default_database_path")]
    pub database_path: String,

    /// Path to the append-only error journal
    #[serde(rename = "error-log-path", default = "default_error_log_path")]
    pub error_log_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            error_log_path: default_error_log_path(),
        }
    }
}

fn default_database_path() -> String {
    "snpedia.db".to_string()
}

fn default_error_log_path() -> String {
    "scraper_errors.log".to_string()
}

/// Remote API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// MediaWiki `api.php` endpoint
    #[serde(rename = "api-url", default = "default_api_url")]
    pub api_url: String,

    /// Category members requested per listing call
    #[serde(rename = "page-limit", default = "default_page_limit")]
    pub page_limit: u32,

    /// Per-request timeout (seconds)
    #[serde(rename = "timeout-secs", default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            page_limit: default_page_limit(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_api_url() -> String {
    "https://bots.snpedia.com/api.php".to_string()
}

fn default_page_limit() -> u32 {
    500
}

fn default_timeout_secs() -> u64 {
    30
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the harvester
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the harvester
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the harvester
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for harvester-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

impl Default for UserAgentConfig {
    fn default() -> Self {
        Self {
            crawler_name: "SNPediaScraper".to_string(),
            crawler_version: "1.0".to_string(),
            contact_url: "https://github.com/jaykobdetar/SNPedia-Scraper".to_string(),
            contact_email: "simyc4982@email.com".to_string(),
        }
    }
}

/// Delays, poll intervals and retry bounds of the crawl loop
#[derive(Debug, Clone, Deserialize)]
pub struct TimingConfig {
    /// Backoff after any remote or storage error (milliseconds)
    #[serde(rename = "retry-backoff-ms", default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Delay between content chunks (milliseconds)
    #[serde(rename = "chunk-delay-ms", default = "default_chunk_delay_ms")]
    pub chunk_delay_ms: u64,

    /// Pause-wait poll interval; also bounds how long a stop request can go unnoticed
    #[serde(rename = "poll-interval-ms", default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Consecutive listing failures tolerated before the worker stops.
    /// Absent means retry forever.
    #[serde(rename = "max-list-retries", default)]
    pub max_list_retries: Option<u32>,

    /// Times a page with failed chunks is re-drained before its cursor advances anyway
    #[serde(rename = "max-page-attempts", default = "default_max_page_attempts")]
    pub max_page_attempts: u32,

    /// Skip categories carrying an exhaustion marker on restart
    #[serde(rename = "skip-completed", default = "default_skip_completed")]
    pub skip_completed: bool,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            retry_backoff_ms: default_retry_backoff_ms(),
            chunk_delay_ms: default_chunk_delay_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            max_list_retries: None,
            max_page_attempts: default_max_page_attempts(),
            skip_completed: default_skip_completed(),
        }
    }
}

impl TimingConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

fn default_retry_backoff_ms() -> u64 {
    30_000
}

fn default_chunk_delay_ms() -> u64 {
    3_000
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_max_page_attempts() -> u32 {
    3
}

fn default_skip_completed() -> bool {
    true
}
