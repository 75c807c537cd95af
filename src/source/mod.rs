//! Remote content source
//!
//! The only network-facing part of the harvester. The engine talks to a
//! [`ContentSource`]; [`MediaWikiSource`] is the production implementation.

mod mediawiki;
mod traits;

pub use mediawiki::{build_http_client, format_user_agent, MediaWikiSource, MAX_PAGE_LIMIT};
pub use traits::{ContentSource, MemberPage, SourceError, SourceResult};
