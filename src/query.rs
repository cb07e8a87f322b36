//! Query orchestration: lexical search, optional vector search, and weighted
//! Reciprocal Rank Fusion.
//!
//! # Scoring
//!
//! With a vector signal, each index contributes `candidate_multiplier × limit`
//! candidates and every path is scored as
//!
//! ```text
//! score = w_lex / (k + lexical_rank) + w_vec / (k + vector_rank)
//! ```
//!
//! where ranks are 1-based and a list that does not contain the path adds
//! nothing. Results are ordered by score descending, then path ascending.
//!
//! Without a vector signal the lexical list is returned as is, scored
//! `1 / (k + rank)`.

use anyhow::Result;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::config::RetrievalConfig;
use crate::embedding::Embedder;
use crate::error::LexicalError;
use crate::lexical::{self, LexicalHit, ELLIPSIS};
use crate::models::SearchHit;
use crate::store::IndexStore;

/// Rank-fusion parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionParams {
    pub k: f64,
    pub lexical_weight: f64,
    pub vector_weight: f64,
}

impl Default for FusionParams {
    fn default() -> Self {
        Self::from(&RetrievalConfig::default())
    }
}

impl From<&RetrievalConfig> for FusionParams {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            k: config.rrf_k,
            lexical_weight: config.lexical_weight,
            vector_weight: config.vector_weight,
        }
    }
}

/// One fused path with the ranks that produced its score.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedEntry {
    pub path: String,
    pub score: f64,
    pub lexical_rank: Option<usize>,
    pub vector_rank: Option<usize>,
}

/// Fuse two best-first path lists with weighted RRF.
///
/// A path appearing more than once in the same list keeps its best rank.
pub fn fuse<L, V>(lexical: &[L], vector: &[V], params: &FusionParams) -> Vec<FusedEntry>
where
    L: AsRef<str>,
    V: AsRef<str>,
{
    let mut entries: HashMap<&str, FusedEntry> = HashMap::new();

    for (i, path) in lexical.iter().enumerate() {
        let path = path.as_ref();
        let entry = entries.entry(path).or_insert_with(|| empty_entry(path));
        if entry.lexical_rank.is_none() {
            entry.lexical_rank = Some(i + 1);
        }
    }
    for (i, path) in vector.iter().enumerate() {
        let path = path.as_ref();
        let entry = entries.entry(path).or_insert_with(|| empty_entry(path));
        if entry.vector_rank.is_none() {
            entry.vector_rank = Some(i + 1);
        }
    }

    let mut fused: Vec<FusedEntry> = entries
        .into_values()
        .map(|mut e| {
            e.score = contribution(e.lexical_rank, params.lexical_weight, params.k)
                + contribution(e.vector_rank, params.vector_weight, params.k);
            e
        })
        .collect();

    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.path.cmp(&b.path))
    });
    fused
}

fn empty_entry(path: &str) -> FusedEntry {
    FusedEntry {
        path: path.to_string(),
        score: 0.0,
        lexical_rank: None,
        vector_rank: None,
    }
}

fn contribution(rank: Option<usize>, weight: f64, k: f64) -> f64 {
    rank.map(|r| weight / (k + r as f64)).unwrap_or(0.0)
}

/// Outcome of a search. Hits may be non-empty even when `invalid_query` is
/// set, if vector search still produced results.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
    /// Parser message when the lexical engine rejected the query text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid_query: Option<String>,
    /// Why the query could not be embedded, when vector search was expected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_error: Option<String>,
}

pub struct QueryEngine<'a> {
    store: &'a IndexStore,
    embedder: Option<&'a dyn Embedder>,
    retrieval: RetrievalConfig,
}

impl<'a> QueryEngine<'a> {
    pub fn new(
        store: &'a IndexStore,
        embedder: Option<&'a dyn Embedder>,
        retrieval: &RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            retrieval: retrieval.clone(),
        }
    }

    /// Search, embedding the query first when vector search is available.
    /// A failed query embedding degrades to lexical-only.
    pub async fn search(&self, text: &str, limit: usize) -> Result<SearchResponse> {
        let mut vector_error = None;
        let query_vector = match (self.store.vector_enabled(), self.embedder) {
            (true, Some(embedder)) if !text.trim().is_empty() => {
                match embedder.embed(text).await {
                    Ok(v) => Some(v),
                    Err(e) => {
                        tracing::warn!("query embedding failed, searching lexically: {:#}", e);
                        vector_error = Some(format!("{:#}", e));
                        None
                    }
                }
            }
            _ => None,
        };

        let mut response = self
            .search_with_vector(text, query_vector.as_deref(), limit)
            .await?;
        if response.vector_error.is_none() {
            response.vector_error = vector_error;
        }
        Ok(response)
    }

    /// Search with a precomputed query vector (or none).
    pub async fn search_with_vector(
        &self,
        text: &str,
        query_vector: Option<&[f32]>,
        limit: usize,
    ) -> Result<SearchResponse> {
        let mut response = SearchResponse::default();
        if limit == 0 {
            return Ok(response);
        }

        let vectors = match (self.store.vectors(), query_vector) {
            (Some(backend), Some(q)) => Some((backend, q)),
            _ => None,
        };

        let Some((backend, q)) = vectors else {
            let lexical_hits = match self.lexical(text, limit, &mut response).await? {
                Some(hits) => hits,
                None => return Ok(response),
            };
            let k = self.retrieval.rrf_k;
            response.hits = lexical_hits
                .into_iter()
                .enumerate()
                .map(|(i, hit)| SearchHit {
                    path: hit.path,
                    title: hit.title,
                    snippet: hit.snippet,
                    score: 1.0 / (k + (i + 1) as f64),
                    lexical_rank: Some(i + 1),
                    vector_rank: None,
                })
                .collect();
            return Ok(response);
        };

        let candidates = limit.saturating_mul(self.retrieval.candidate_multiplier.max(1));
        let lexical_hits = self
            .lexical(text, candidates, &mut response)
            .await?
            .unwrap_or_default();

        let vector_paths: Vec<String> = match backend.knn(q, candidates).await {
            Ok(matches) => matches.into_iter().map(|m| m.path).collect(),
            Err(e) => {
                tracing::warn!("vector search failed: {}", e);
                response.vector_error = Some(e.to_string());
                Vec::new()
            }
        };

        let lexical_paths: Vec<&str> = lexical_hits.iter().map(|h| h.path.as_str()).collect();
        let fused = fuse(&lexical_paths, &vector_paths, &FusionParams::from(&self.retrieval));

        let by_path: HashMap<&str, &LexicalHit> = lexical_hits
            .iter()
            .map(|h| (h.path.as_str(), h))
            .collect();

        for entry in fused {
            if response.hits.len() >= limit {
                break;
            }
            let (title, snippet) = match by_path.get(entry.path.as_str()) {
                Some(hit) => (hit.title.clone(), hit.snippet.clone()),
                None => match lexical::get(self.store.pool(), &entry.path).await? {
                    Some(record) => (
                        record.title,
                        preview(&record.body, self.retrieval.preview_chars),
                    ),
                    None => {
                        tracing::debug!(path = %entry.path, "vector hit without lexical record, dropped");
                        continue;
                    }
                },
            };
            response.hits.push(SearchHit {
                path: entry.path,
                title,
                snippet,
                score: entry.score,
                lexical_rank: entry.lexical_rank,
                vector_rank: entry.vector_rank,
            });
        }

        Ok(response)
    }

    /// Lexical candidates. `None` when the query was rejected; the reason is
    /// recorded in `response`.
    async fn lexical(
        &self,
        text: &str,
        limit: usize,
        response: &mut SearchResponse,
    ) -> Result<Option<Vec<LexicalHit>>> {
        match lexical::query(self.store.pool(), text, limit).await {
            Ok(hits) => Ok(Some(hits)),
            Err(LexicalError::InvalidQuery(msg)) => {
                tracing::debug!(query = text, "invalid lexical query: {}", msg);
                response.invalid_query = Some(msg);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// First `max_chars` characters of `body`, with an ellipsis when cut.
fn preview(body: &str, max_chars: usize) -> String {
    match body.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{}", &body[..cut], ELLIPSIS),
        None => body.to_string(),
    }
}
