//! Vector index: fixed-dimension embeddings keyed by document path.
//!
//! [`VectorBackend`] is the seam between the indexer/query code and whatever
//! performs nearest-neighbor search. [`SqliteVectors`] keeps the vectors in
//! the same SQLite file as the lexical index, as little-endian `f32` BLOBs,
//! and scans them in process.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::cmp::Ordering;
use std::collections::HashSet;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::VectorError;
use crate::migrate;

/// `index_meta` key holding the dimension of stored vectors.
const DIMENSION_KEY: &str = "vector_dimension";

/// A nearest-neighbor result.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    pub path: String,
    /// Cosine distance (`1 - cosine similarity`); lower is closer.
    pub distance: f32,
}

/// Storage and k-NN search over fixed-dimension vectors.
///
/// All stored vectors share [`dimension`](VectorBackend::dimension). Vectors
/// of any other length are rejected, never truncated or padded.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    fn dimension(&self) -> usize;

    /// Switch to dimension `n`. If vectors of another dimension are stored,
    /// the store is dropped and recreated empty. Returns whether that happened.
    async fn set_dimension(&mut self, n: usize) -> Result<bool, VectorError>;

    /// Insert or replace the vector for `path`.
    async fn upsert(&self, path: &str, vector: &[f32]) -> Result<(), VectorError>;

    /// Delete the vector for `path`, if any.
    async fn remove(&self, path: &str) -> Result<(), VectorError>;

    /// The `k` nearest vectors, ascending by cosine distance.
    async fn knn(&self, query: &[f32], k: usize) -> Result<Vec<VectorMatch>, VectorError>;

    async fn clear(&self) -> Result<(), VectorError>;

    /// Paths that currently have a vector.
    async fn paths(&self) -> Result<HashSet<String>, VectorError>;

    async fn count(&self) -> Result<usize, VectorError>;
}

/// Brute-force cosine search over the `note_vectors` table.
pub struct SqliteVectors {
    pool: SqlitePool,
    dimension: usize,
}

impl SqliteVectors {
    /// Open the vector table and migrate it to `dimension`.
    ///
    /// Returns the backend and whether existing vectors were dropped.
    pub async fn open(pool: SqlitePool, dimension: usize) -> Result<(Self, bool), VectorError> {
        create_table(&pool).await?;
        let mut backend = Self { pool, dimension };
        let rebuilt = backend.set_dimension(dimension).await?;
        Ok((backend, rebuilt))
    }

    /// Drop the vector table and its recorded dimension, if present.
    ///
    /// Called when a store is opened without vectors: lexical writes made in
    /// that mode are not mirrored here, so any kept vectors would go stale.
    /// Returns how many vectors were dropped.
    pub async fn discard(pool: &SqlitePool) -> Result<usize, VectorError> {
        let exists: Option<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'note_vectors'",
        )
        .fetch_optional(pool)
        .await?;

        let dropped = match exists {
            Some(_) => {
                let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM note_vectors")
                    .fetch_one(pool)
                    .await?;
                sqlx::query("DROP TABLE note_vectors").execute(pool).await?;
                n as usize
            }
            None => 0,
        };
        migrate::delete_meta(pool, DIMENSION_KEY).await?;

        Ok(dropped)
    }

    fn check(&self, vector: &[f32]) -> Result<(), VectorError> {
        if vector.len() != self.dimension {
            return Err(VectorError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    /// Dimension of what is on disk: the recorded value, or else inferred
    /// from any stored BLOB.
    async fn stored_dimension(&self) -> Result<Option<usize>, VectorError> {
        let recorded = migrate::get_meta(&self.pool, DIMENSION_KEY)
            .await?
            .and_then(|v| v.parse::<usize>().ok());
        if recorded.is_some() {
            return Ok(recorded);
        }

        let bytes: Option<i64> =
            sqlx::query_scalar("SELECT length(embedding) FROM note_vectors LIMIT 1")
                .fetch_optional(&self.pool)
                .await?;
        Ok(bytes.map(|b| b as usize / 4))
    }
}

async fn create_table(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS note_vectors (
            path TEXT PRIMARY KEY,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

#[async_trait]
impl VectorBackend for SqliteVectors {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn set_dimension(&mut self, n: usize) -> Result<bool, VectorError> {
        let stored = self.stored_dimension().await?;
        let rebuilt = match stored {
            Some(old) if old != n => {
                let dropped = self.count().await?;
                tracing::warn!(
                    old_dimension = old,
                    new_dimension = n,
                    dropped,
                    "vector dimension changed; recreating vector store (run a full index to rebuild embeddings)"
                );
                let mut tx = self.pool.begin().await?;
                sqlx::query("DROP TABLE IF EXISTS note_vectors")
                    .execute(&mut *tx)
                    .await?;
                sqlx::query(
                    "CREATE TABLE note_vectors (path TEXT PRIMARY KEY, embedding BLOB NOT NULL)",
                )
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;
                true
            }
            _ => false,
        };

        if stored != Some(n) {
            migrate::set_meta(&self.pool, DIMENSION_KEY, &n.to_string()).await?;
        }
        self.dimension = n;
        Ok(rebuilt)
    }

    async fn upsert(&self, path: &str, vector: &[f32]) -> Result<(), VectorError> {
        self.check(vector)?;
        sqlx::query(
            r#"
            INSERT INTO note_vectors (path, embedding) VALUES (?, ?)
            ON CONFLICT(path) DO UPDATE SET embedding = excluded.embedding
            "#,
        )
        .bind(path)
        .bind(vec_to_blob(vector))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<(), VectorError> {
        sqlx::query("DELETE FROM note_vectors WHERE path = ?")
            .bind(path)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn knn(&self, query: &[f32], k: usize) -> Result<Vec<VectorMatch>, VectorError> {
        self.check(query)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query("SELECT path, embedding FROM note_vectors")
            .fetch_all(&self.pool)
            .await?;

        let mut matches: Vec<VectorMatch> = Vec::with_capacity(rows.len());
        for row in &rows {
            let path: String = row.get("path");
            let blob: Vec<u8> = row.get("embedding");
            let vector = blob_to_vec(&blob);
            if vector.len() != self.dimension {
                tracing::warn!(path = %path, len = vector.len(), "skipping vector with wrong dimension");
                continue;
            }
            matches.push(VectorMatch {
                path,
                distance: 1.0 - cosine_similarity(query, &vector),
            });
        }

        matches.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.path.cmp(&b.path))
        });
        matches.truncate(k);

        Ok(matches)
    }

    async fn clear(&self) -> Result<(), VectorError> {
        sqlx::query("DELETE FROM note_vectors")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn paths(&self) -> Result<HashSet<String>, VectorError> {
        let paths: Vec<String> = sqlx::query_scalar("SELECT path FROM note_vectors")
            .fetch_all(&self.pool)
            .await?;
        Ok(paths.into_iter().collect())
    }

    async fn count(&self) -> Result<usize, VectorError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM note_vectors")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }
}
