//! Crawl job descriptors
//!
//! A [`CrawlJob`] is the static description of one harvested category: where
//! its members come from, where records land, and which checkpoint keys track
//! its progress. Jobs are processed strictly in declaration order.

use serde::Deserialize;

/// Maximum number of titles the remote API accepts in one content lookup
pub const MAX_BATCH_SIZE: usize = 50;

/// Static configuration for one harvested category
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CrawlJob {
    /// Display name used in logs and progress queries (e.g. "SNP")
    pub label: String,

    /// Wiki category to walk (e.g. "Category:Is_a_snp")
    pub category: String,

    /// Table receiving the harvested records
    pub table: String,

    /// Primary-key column of `table`
    #[serde(rename = "id-column")]
    pub id_column: String,

    /// Checkpoint key holding the running record count
    #[serde(rename = "count-key")]
    pub count_key: String,

    /// Checkpoint key holding the pagination cursor
    #[serde(rename = "cursor-key")]
    pub cursor_key: String,

    /// Checkpoint key marking the category as fully walked.
    /// Defaults to `<cursor-key>_done`.
    #[serde(rename = "done-key", default)]
    pub done_key: Option<String>,

    /// Expected number of records, for progress display only
    #[serde(rename = "expected-total")]
    pub expected_total: u64,

    /// Identifiers per content lookup
    #[serde(rename = "batch-size", default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_batch_size() -> usize {
    MAX_BATCH_SIZE
}

impl CrawlJob {
    /// The SNP job of the default work list
    pub fn snps() -> Self {
        Self {
            label: "SNP".to_string(),
            category: "Category:Is_a_snp".to_string(),
            table: "snps".to_string(),
            id_column: "rsid".to_string(),
            count_key: "snp_count".to_string(),
            cursor_key: "cmcontinue_snp".to_string(),
            done_key: None,
            expected_total: 110_000,
            batch_size: MAX_BATCH_SIZE,
        }
    }

    /// The genotype job of the default work list
    pub fn genotypes() -> Self {
        Self {
            label: "genotype".to_string(),
            category: "Category:Is_a_genotype".to_string(),
            table: "genotypes".to_string(),
            id_column: "id".to_string(),
            count_key: "genotype_count".to_string(),
            cursor_key: "cmcontinue_genotype".to_string(),
            done_key: None,
            expected_total: 104_887,
            batch_size: MAX_BATCH_SIZE,
        }
    }

    /// Default work list: SNPs first, then genotypes
    pub fn default_jobs() -> Vec<Self> {
        vec![Self::snps(), Self::genotypes()]
    }

    /// Checkpoint key of the exhaustion marker
    pub fn done_key(&self) -> String {
        self.done_key
            .clone()
            .unwrap_or_else(|| format!("{}_done", self.cursor_key))
    }

    /// Checkpoint key set when a page was given up on with members unsaved
    pub fn rewalk_key(&self) -> String {
        format!("{}_rewalk", self.cursor_key)
    }

    /// Batch size clamped to what the remote API accepts
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.clamp(1, MAX_BATCH_SIZE)
    }
}

/// Converts a raw wiki title into a storage identifier
///
/// Titles come back from the API with spaces; identifiers use underscores so
/// they round-trip through `titles=` lookups and stay stable as primary keys.
pub fn normalize_title(title: &str) -> String {
    title.trim().replace(' ', "_")
}
