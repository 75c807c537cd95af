use crate::config::types::{Config, SourceConfig, StorageConfig, TimingConfig, UserAgentConfig};
use crate::job::{CrawlJob, MAX_BATCH_SIZE};
use crate::source::MAX_PAGE_LIMIT;
use crate::storage::is_sql_identifier;
use crate::ConfigError;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_storage_config(&config.storage)?;
    validate_source_config(&config.source)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_timing_config(&config.timing)?;
    validate_jobs(&config.effective_jobs())?;
    Ok(())
}

/// Validates storage paths
fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    if config.error_log_path.is_empty() {
        return Err(ConfigError::Validation(
            "error_log_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates remote API configuration
fn validate_source_config(config: &SourceConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.api_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid api_url: {}", e)))?;

    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(ConfigError::InvalidUrl(format!(
            "api_url '{}' must use http or https",
            config.api_url
        )));
    }

    if config.page_limit < 1 || config.page_limit > MAX_PAGE_LIMIT {
        return Err(ConfigError::Validation(format!(
            "page_limit must be between 1 and {}, got {}",
            MAX_PAGE_LIMIT, config.page_limit
        )));
    }

    if config.timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "timeout_secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters, hyphens and underscores, got '{}'",
            config.crawler_name
        )));
    }

    if config.crawler_version.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_version cannot be empty".to_string(),
        ));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    validate_email(&config.contact_email)?;

    Ok(())
}

/// Validates an email address (basic validation)
fn validate_email(email: &str) -> Result<(), ConfigError> {
    let valid = match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.contains('@'),
        None => false,
    };

    if !valid {
        return Err(ConfigError::Validation(format!(
            "Invalid contact_email: '{}'",
            email
        )));
    }

    Ok(())
}

/// Validates loop timings
fn validate_timing_config(config: &TimingConfig) -> Result<(), ConfigError> {
    if config.poll_interval_ms < 1 {
        return Err(ConfigError::Validation(
            "poll_interval_ms must be >= 1".to_string(),
        ));
    }

    if config.max_page_attempts < 1 {
        return Err(ConfigError::Validation(
            "max_page_attempts must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates the job list
///
/// Table and column names end up in SQL, and checkpoint keys share one table,
/// so both must be well-formed and unique across jobs.
fn validate_jobs(jobs: &[CrawlJob]) -> Result<(), ConfigError> {
    let mut tables = HashSet::new();
    let mut keys = HashSet::new();

    for job in jobs {
        if job.label.is_empty() || job.category.is_empty() {
            return Err(ConfigError::Validation(
                "job label and category cannot be empty".to_string(),
            ));
        }

        for name in [&job.table, &job.id_column] {
            if !is_sql_identifier(name) {
                return Err(ConfigError::Validation(format!(
                    "'{}' in job '{}' is not a valid table or column name",
                    name, job.label
                )));
            }
        }

        if job.batch_size < 1 || job.batch_size > MAX_BATCH_SIZE {
            return Err(ConfigError::Validation(format!(
                "batch_size of job '{}' must be between 1 and {}, got {}",
                job.label, MAX_BATCH_SIZE, job.batch_size
            )));
        }

        if !tables.insert(job.table.clone()) {
            return Err(ConfigError::Validation(format!(
                "table '{}' is used by more than one job",
                job.table
            )));
        }

        for key in [job.count_key.clone(), job.cursor_key.clone(), job.done_key()] {
            if key.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "checkpoint keys of job '{}' cannot be empty",
                    job.label
                )));
            }
            if !keys.insert(key.clone()) {
                return Err(ConfigError::Validation(format!(
                    "checkpoint key '{}' is used more than once",
                    key
                )));
            }
        }
    }

    Ok(())
}
