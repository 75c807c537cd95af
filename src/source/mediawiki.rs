//! MediaWiki API client
//!
//! This module implements [`ContentSource`] over the MediaWiki action API:
//! - `list=categorymembers` for paginated category listing
//! - `prop=revisions` for batch content lookup
//!
//! Both calls are plain GETs against a single `api.php` endpoint and carry the
//! descriptive user agent built from the configuration.

use crate::config::{SourceConfig, UserAgentConfig};
use crate::job::{normalize_title, MAX_BATCH_SIZE};
use crate::source::traits::{ContentSource, MemberPage, SourceError, SourceResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

/// Server-imposed ceiling on category members per listing call
pub const MAX_PAGE_LIMIT: u32 = 500;

/// Formats the user agent string: `Name/Version (+ContactURL; ContactEmail)`
pub fn format_user_agent(config: &UserAgentConfig) -> String {
    format!(
        "{}/{} (+{}; {})",
        config.crawler_name, config.crawler_version, config.contact_url, config.contact_email
    )
}

/// Builds an HTTP client with the harvester's user agent and timeouts
pub fn build_http_client(
    user_agent: &UserAgentConfig,
    timeout: Duration,
) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(format_user_agent(user_agent))
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// MediaWiki-backed content source
#[derive(Debug, Clone)]
pub struct MediaWikiSource {
    client: Client,
    api_url: Url,
    page_limit: u32,
    batch_limit: usize,
}

impl MediaWikiSource {
    /// Creates a source from configuration
    pub fn new(source: &SourceConfig, user_agent: &UserAgentConfig) -> Result<Self, SourceError> {
        let api_url = Url::parse(&source.api_url)
            .map_err(|e| SourceError::Malformed(format!("invalid api url: {}", e)))?;
        let client = build_http_client(user_agent, Duration::from_secs(source.timeout_secs))?;

        Ok(Self {
            client,
            api_url,
            page_limit: source.page_limit.clamp(1, MAX_PAGE_LIMIT),
            batch_limit: MAX_BATCH_SIZE,
        })
    }

    /// Lowers the number of titles accepted per content lookup
    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit.clamp(1, MAX_BATCH_SIZE);
        self
    }

    /// Members requested per listing call
    pub fn page_limit(&self) -> u32 {
        self.page_limit
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        params: &[(&str, String)],
    ) -> SourceResult<T> {
        let response = self
            .client
            .get(self.api_url.clone())
            .query(params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Http {
                status: status.as_u16(),
                url: self.api_url.to_string(),
            });
        }

        let body = response.text().await?;
        let value: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| SourceError::Malformed(format!("invalid JSON: {}", e)))?;

        if let Some(error) = value.get("error") {
            let code = error
                .get("code")
                .and_then(|c| c.as_str())
                .unwrap_or("unknown")
                .to_string();
            let info = error
                .get("info")
                .and_then(|i| i.as_str())
                .unwrap_or_default()
                .to_string();
            return Err(SourceError::Api { code, info });
        }

        serde_json::from_value(value)
            .map_err(|e| SourceError::Malformed(format!("unexpected structure: {}", e)))
    }
}

#[async_trait]
impl ContentSource for MediaWikiSource {
    async fn list_category_members(
        &self,
        category: &str,
        cursor: Option<&str>,
    ) -> SourceResult<MemberPage> {
        let mut params = vec![
            ("action", "query".to_string()),
            ("list", "categorymembers".to_string()),
            ("cmtitle", category.to_string()),
            ("cmlimit", self.page_limit.to_string()),
            ("format", "json".to_string()),
        ];
        if let Some(cursor) = cursor {
            params.push(("cmcontinue", cursor.to_string()));
        }

        let parsed: ListResponse = self.get_json(&params).await?;
        let query = parsed
            .query
            .ok_or_else(|| SourceError::Malformed("missing query.categorymembers".to_string()))?;

        Ok(MemberPage {
            members: query
                .categorymembers
                .iter()
                .map(|m| normalize_title(&m.title))
                .collect(),
            next_cursor: parsed.continuation.and_then(|c| c.cmcontinue),
        })
    }

    async fn fetch_content_batch(
        &self,
        identifiers: &[String],
    ) -> SourceResult<HashMap<String, Option<String>>> {
        if identifiers.is_empty() {
            return Ok(HashMap::new());
        }
        if identifiers.len() > self.batch_limit {
            return Err(SourceError::BatchTooLarge {
                size: identifiers.len(),
                limit: self.batch_limit,
            });
        }

        let params = vec![
            ("action", "query".to_string()),
            ("prop", "revisions".to_string()),
            ("rvprop", "content".to_string()),
            ("format", "json".to_string()),
            ("titles", identifiers.join("|")),
        ];

        let parsed: ContentResponse = self.get_json(&params).await?;
        let query = parsed
            .query
            .ok_or_else(|| SourceError::Malformed("missing query.pages".to_string()))?;

        let renamed: HashMap<String, String> = query
            .normalized
            .into_iter()
            .map(|n| (n.from, n.to))
            .collect();

        let by_title: HashMap<String, Option<String>> = query
            .pages
            .into_values()
            .map(|page| (normalize_title(&page.title), page.into_content()))
            .collect();

        Ok(identifiers
            .iter()
            .map(|id| {
                let title = renamed.get(id).map(String::as_str).unwrap_or(id.as_str());
                let content = by_title.get(&normalize_title(title)).cloned().flatten();
                (id.clone(), content)
            })
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    query: Option<ListQuery>,
    #[serde(default, rename = "continue")]
    continuation: Option<ListContinuation>,
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    #[serde(default)]
    categorymembers: Vec<TitleItem>,
}

#[derive(Debug, Deserialize)]
struct ListContinuation {
    cmcontinue: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TitleItem {
    title: String,
}

#[derive(Debug, Deserialize)]
struct ContentResponse {
    query: Option<ContentQuery>,
}

#[derive(Debug, Deserialize)]
struct ContentQuery {
    #[serde(default)]
    normalized: Vec<Normalization>,
    #[serde(default)]
    pages: HashMap<String, PageItem>,
}

#[derive(Debug, Deserialize)]
struct Normalization {
    from: String,
    to: String,
}

#[derive(Debug, Deserialize)]
struct PageItem {
    #[serde(default)]
    title: String,
    missing: Option<serde_json::Value>,
    invalid: Option<serde_json::Value>,
    #[serde(default)]
    revisions: Vec<Revision>,
}

impl PageItem {
    fn into_content(self) -> Option<String> {
        if self.missing.is_some() || self.invalid.is_some() {
            return None;
        }
        let revision = self.revisions.into_iter().next()?;
        revision
            .content
            .or_else(|| revision.slots.and_then(|s| s.main).and_then(|m| m.content))
    }
}

#[derive(Debug, Deserialize)]
struct Revision {
    #[serde(rename = "*")]
    content: Option<String>,
    slots: Option<Slots>,
}

#[derive(Debug, Deserialize)]
struct Slots {
    main: Option<SlotContent>,
}

#[derive(Debug, Deserialize)]
struct SlotContent {
    #[serde(rename = "*")]
    content: Option<String>,
}
