//! Indexing pipeline: brings the lexical and vector indexes in sync with the
//! documents on disk.
//!
//! Three modes share one write path ([`IndexStore::upsert_document`]):
//!
//! - **Single-document** ([`Indexer::index_one`]): re-reads one path and
//!   upserts or tombstones it, ignoring timestamps.
//! - **Incremental** ([`Indexer::index_all`] with `full = false`): diffs the
//!   listing against `file_meta`; only new and changed documents are read and
//!   embedded, deleted ones are tombstoned.
//! - **Full** ([`Indexer::index_all`] with `full = true`): clears every index
//!   and re-derives it from the current listing.
//!
//! Embedding is best-effort. One `embed_batch` call covers all documents of a
//! run; if it fails the run continues lexical-only and reports why in
//! [`IndexSummary::vector_error`].

use anyhow::{bail, Result};
use std::collections::HashSet;

use crate::collector::{normalize_key, Collector};
use crate::embedding::Embedder;
use crate::lexical;
use crate::models::{Document, EmbedSummary, IndexSummary};
use crate::store::IndexStore;
use crate::tracker::{self, ChangeKind};

pub struct Indexer<'a> {
    store: &'a IndexStore,
    collector: &'a Collector,
    embedder: Option<&'a dyn Embedder>,
}

impl<'a> Indexer<'a> {
    /// `embedder` is ignored when the store has no vector index.
    pub fn new(
        store: &'a IndexStore,
        collector: &'a Collector,
        embedder: Option<&'a dyn Embedder>,
    ) -> Self {
        Self {
            store,
            collector,
            embedder,
        }
    }

    fn active_embedder(&self) -> Option<&'a dyn Embedder> {
        if self.store.vector_enabled() {
            self.embedder
        } else {
            None
        }
    }

    /// Re-index one document by its root-relative path.
    pub async fn index_one(&self, path: &str) -> Result<IndexSummary> {
        let key = normalize_key(path)?;
        let mut summary = IndexSummary::default();

        let doc = self
            .collector
            .describe(&key)?
            .and_then(|descriptor| self.collector.read(&descriptor));

        let Some(doc) = doc else {
            if self.store.remove_document(&key).await? {
                summary.removed = 1;
            } else {
                summary.skipped = 1;
            }
            tracing::debug!(path = %key, "document absent");
            return Ok(summary);
        };

        let docs = vec![doc];
        let vectors = self.embed_documents(&docs, &mut summary).await;
        self.write_all(&docs, vectors, &mut summary).await?;

        Ok(summary)
    }

    /// Sync every document under the collection root.
    pub async fn index_all(&self, full: bool) -> Result<IndexSummary> {
        let pool = self.store.pool();
        let listing = self.collector.list()?;
        let mut summary = IndexSummary::default();

        let (candidates, previously_tracked): (Vec<_>, HashSet<String>) = if full {
            let tracked = tracker::all_paths(pool).await?;
            let present: HashSet<&str> = listing.iter().map(|d| d.path.as_str()).collect();
            summary.removed = tracked
                .iter()
                .filter(|p| !present.contains(p.as_str()))
                .count();

            self.store.clear().await?;

            let candidates = listing
                .into_iter()
                .map(|d| {
                    let kind = if tracked.contains(&d.path) {
                        ChangeKind::Changed
                    } else {
                        ChangeKind::New
                    };
                    (d, kind)
                })
                .collect();
            (candidates, tracked)
        } else {
            let changes = tracker::diff(pool, listing).await?;
            summary.skipped = changes.unchanged;

            for path in &changes.deleted {
                if self.store.remove_document(path).await? {
                    summary.removed += 1;
                }
            }
            (changes.changed, HashSet::new())
        };

        let mut docs: Vec<Document> = Vec::with_capacity(candidates.len());
        for (descriptor, kind) in candidates {
            match self.collector.read(&descriptor) {
                Some(doc) => docs.push(doc),
                None => {
                    let was_tracked =
                        kind == ChangeKind::Changed || previously_tracked.contains(&descriptor.path);
                    // A full pass already cleared everything.
                    if !full {
                        self.store.remove_document(&descriptor.path).await?;
                    }
                    if was_tracked {
                        summary.removed += 1;
                    } else {
                        summary.skipped += 1;
                    }
                }
            }
        }

        let vectors = self.embed_documents(&docs, &mut summary).await;
        self.write_all(&docs, vectors, &mut summary).await?;

        tracing::info!(
            full,
            indexed = summary.indexed,
            skipped = summary.skipped,
            removed = summary.removed,
            embedded = summary.embedded,
            "index pass complete"
        );

        Ok(summary)
    }

    /// Embed every lexically indexed document that has no vector yet.
    ///
    /// Used after a dimension change or a run that fell back to lexical-only.
    /// Change tracking metadata is not touched.
    pub async fn embed_pending(&self) -> Result<EmbedSummary> {
        let Some(vectors) = self.store.vectors() else {
            bail!("vector search is disabled; set [vector] enabled = true in config");
        };
        let Some(embedder) = self.embedder else {
            bail!("no embedding provider configured");
        };

        let pool = self.store.pool();
        let have = vectors.paths().await?;

        let mut records = Vec::new();
        for path in lexical::paths(pool).await? {
            if have.contains(&path) {
                continue;
            }
            if let Some(record) = lexical::get(pool, &path).await? {
                records.push(record);
            }
        }

        let mut summary = EmbedSummary {
            pending: records.len(),
            ..EmbedSummary::default()
        };
        if records.is_empty() {
            return Ok(summary);
        }

        let texts: Vec<String> = records.iter().map(|r| r.body.clone()).collect();
        let embedded = match embedder.embed_batch(&texts).await {
            Ok(v) if v.len() == records.len() => v,
            Ok(v) => {
                let msg = format!("expected {} embeddings, got {}", records.len(), v.len());
                tracing::warn!("{}", msg);
                summary.error = Some(msg);
                return Ok(summary);
            }
            Err(e) => {
                tracing::warn!("embedding failed: {:#}", e);
                summary.error = Some(format!("{:#}", e));
                return Ok(summary);
            }
        };

        for (record, vector) in records.iter().zip(embedded.iter()) {
            match vectors.upsert(&record.path, vector).await {
                Ok(()) => summary.embedded += 1,
                Err(e) => tracing::warn!(path = %record.path, "vector write failed: {}", e),
            }
        }

        Ok(summary)
    }

    /// One batch call for all `docs`. `None` means this run is lexical-only.
    async fn embed_documents(
        &self,
        docs: &[Document],
        summary: &mut IndexSummary,
    ) -> Option<Vec<Vec<f32>>> {
        let embedder = self.active_embedder()?;
        if docs.is_empty() {
            return None;
        }

        let texts: Vec<String> = docs.iter().map(|d| d.body.clone()).collect();
        let error = match embedder.embed_batch(&texts).await {
            Ok(vectors) if vectors.len() == docs.len() => return Some(vectors),
            Ok(vectors) => format!(
                "embedding provider returned {} vectors for {} documents",
                vectors.len(),
                docs.len()
            ),
            Err(e) => format!("{:#}", e),
        };

        tracing::warn!(
            model = embedder.model_name(),
            "embedding failed, indexing lexically only: {}",
            error
        );
        summary.vector_error = Some(error);
        None
    }

    async fn write_all(
        &self,
        docs: &[Document],
        vectors: Option<Vec<Vec<f32>>>,
        summary: &mut IndexSummary,
    ) -> Result<()> {
        for (i, doc) in docs.iter().enumerate() {
            let embedding = vectors.as_ref().map(|v| v[i].as_slice());
            if self.store.upsert_document(doc, embedding).await? {
                summary.embedded += 1;
            }
            summary.indexed += 1;
        }
        Ok(())
    }
}
