//! Remote content source trait and error types

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

/// Errors raised by a remote content source
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("API error {code}: {info}")]
    Api { code: String, info: String },

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Batch of {size} identifiers exceeds the limit of {limit}")]
    BatchTooLarge { size: usize, limit: usize },
}

impl SourceError {
    /// HTTP status code, when the failure carried one
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Returns true if the remote service signalled it is overloaded
    ///
    /// Only affects how failures are classified in logs; every remote error
    /// is retried the same way.
    pub fn is_overloaded(&self) -> bool {
        if let Self::Api { code, .. } = self {
            return code == "maxlag" || code == "ratelimited";
        }
        matches!(self.status(), Some(429 | 502 | 503 | 504))
    }
}

/// Result type for remote source operations
pub type SourceResult<T> = Result<T, SourceError>;

/// One page of category members
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberPage {
    /// Normalized identifiers, in listing order
    pub members: Vec<String>,

    /// Continuation token; `None` means the category is exhausted
    pub next_cursor: Option<String>,
}

/// The network-facing side of the harvester
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Lists one page of a category's members, starting at `cursor`
    ///
    /// Returned members are already normalized into identifiers.
    async fn list_category_members(
        &self,
        category: &str,
        cursor: Option<&str>,
    ) -> SourceResult<MemberPage>;

    /// Fetches content for a batch of identifiers
    ///
    /// A missing key and a `None` value both mean the page has no retrievable
    /// content.
    async fn fetch_content_batch(
        &self,
        identifiers: &[String],
    ) -> SourceResult<HashMap<String, Option<String>>>;
}
