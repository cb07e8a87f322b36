//! Core data types that flow between the collector, the indexes and the
//! query orchestrator.

use serde::Serialize;
use std::path::PathBuf;

/// A candidate document found on disk, before its content is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentDescriptor {
    /// Corpus key: `/`-separated path relative to the collection root.
    pub path: String,
    /// Location on disk.
    pub location: PathBuf,
    /// Modification time in milliseconds since the Unix epoch.
    pub modified_at: i64,
    pub size_bytes: i64,
}

/// A transient read of one document. Never cached beyond an indexing pass.
#[derive(Debug, Clone)]
pub struct Document {
    pub path: String,
    pub title: String,
    /// Normalized body: heading markers stripped, outer blank lines trimmed.
    pub body: String,
    pub modified_at: i64,
    pub size_bytes: i64,
}

/// Per-document change-detection record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub path: String,
    pub modified_at: i64,
    pub size_bytes: i64,
}

/// Stored lexical record for one document.
#[derive(Debug, Clone)]
pub struct IndexRecord {
    pub path: String,
    pub title: String,
    pub body: String,
}

/// A ranked search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub path: String,
    pub title: String,
    /// Excerpt with `>>>`/`<<<` around matched terms, or a plain body
    /// preview for hits found only by vector search.
    pub snippet: String,
    /// Fused reciprocal-rank score; higher is better.
    pub score: f64,
    /// 1-based position in the lexical result list, if present there.
    pub lexical_rank: Option<usize>,
    /// 1-based position in the vector result list, if present there.
    pub vector_rank: Option<usize>,
}

/// Counts reported by one indexer run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexSummary {
    pub indexed: usize,
    pub skipped: usize,
    pub removed: usize,
    /// Vectors written during the run.
    pub embedded: usize,
    /// Why the run fell back to lexical-only indexing, if it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_error: Option<String>,
}

/// Result of backfilling vectors for documents that have none.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EmbedSummary {
    pub pending: usize,
    pub embedded: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
