//! The index store: one SQLite file holding the lexical index, change
//! tracking metadata and, when enabled, the vector index.
//!
//! [`IndexStore::open`] connects, runs migrations and resolves the vector
//! capability once. Every document write goes through
//! [`IndexStore::upsert_document`] / [`IndexStore::remove_document`] so the
//! three per-path records stay keyed 1:1:1.

use anyhow::{Context, Result};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::Config;
use crate::lexical;
use crate::migrate;
use crate::models::{Document, FileMeta};
use crate::tracker;
use crate::vector::{SqliteVectors, VectorBackend};

/// Open a WAL-mode connection pool on `db_path`, creating the file and its
/// parent directory when missing.
pub async fn connect(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open index store: {}", db_path.display()))?;

    Ok(pool)
}

pub struct IndexStore {
    pool: SqlitePool,
    vectors: Option<Box<dyn VectorBackend>>,
    db_path: PathBuf,
    dimension_reset: bool,
}

impl IndexStore {
    /// Open the store configured in `config.index.db_path`. The vector index
    /// is attached only when `config.vector.enabled` is set.
    pub async fn open(config: &Config) -> Result<Self> {
        let dimension = config
            .vector
            .enabled
            .then(|| config.vector.resolved_dimension());
        Self::open_at(&config.index.db_path, dimension).await
    }

    /// Open the store at `db_path`, with a vector index of `vector_dimension`
    /// when given. Without one, any previously stored vectors are dropped.
    pub async fn open_at(db_path: &Path, vector_dimension: Option<usize>) -> Result<Self> {
        let pool = connect(db_path).await?;
        migrate::run_migrations(&pool).await?;

        let mut dimension_reset = false;
        let vectors: Option<Box<dyn VectorBackend>> = match vector_dimension {
            Some(dimension) => {
                let (backend, rebuilt) = SqliteVectors::open(pool.clone(), dimension).await?;
                if rebuilt {
                    tracing::info!(dimension, "vector store recreated for new dimension");
                }
                dimension_reset = rebuilt;
                Some(Box::new(backend))
            }
            None => {
                let dropped = SqliteVectors::discard(&pool).await?;
                if dropped > 0 {
                    tracing::info!(dropped, "vector search disabled; stored vectors discarded");
                }
                None
            }
        };

        tracing::debug!(
            db = %db_path.display(),
            vectors = vectors.is_some(),
            "index store opened"
        );

        Ok(Self {
            pool,
            vectors,
            db_path: db_path.to_path_buf(),
            dimension_reset,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Whether a vector index is attached.
    pub fn vector_enabled(&self) -> bool {
        self.vectors.is_some()
    }

    pub fn vectors(&self) -> Option<&dyn VectorBackend> {
        self.vectors.as_deref()
    }

    /// True when opening dropped vectors of a previous dimension.
    pub fn dimension_reset(&self) -> bool {
        self.dimension_reset
    }

    /// Write one document. The vector goes first (or a stale one is removed
    /// when `embedding` is `None`); the lexical record and its `file_meta` row
    /// are then written in a single transaction, so `file_meta` is last.
    ///
    /// Vector write failures are logged and do not prevent the lexical write.
    /// Returns whether a vector was stored.
    pub async fn upsert_document(&self, doc: &Document, embedding: Option<&[f32]>) -> Result<bool> {
        let mut embedded = false;
        if let Some(vectors) = self.vectors() {
            let result = match embedding {
                Some(vector) => vectors.upsert(&doc.path, vector).await.map(|_| true),
                None => vectors.remove(&doc.path).await.map(|_| false),
            };
            match result {
                Ok(stored) => embedded = stored,
                Err(e) => tracing::warn!(path = %doc.path, "vector write failed: {}", e),
            }
        }

        let mut tx = self.pool.begin().await?;
        lexical::upsert(&mut *tx, &doc.path, &doc.title, &doc.body).await?;
        tracker::put(
            &mut *tx,
            &FileMeta {
                path: doc.path.clone(),
                modified_at: doc.modified_at,
                size_bytes: doc.size_bytes,
            },
        )
        .await?;
        tx.commit().await?;

        Ok(embedded)
    }

    /// Tombstone `path` in every index. Returns whether it was tracked.
    pub async fn remove_document(&self, path: &str) -> Result<bool> {
        if let Some(vectors) = self.vectors() {
            vectors.remove(path).await?;
        }

        let mut tx = self.pool.begin().await?;
        lexical::remove(&mut *tx, path).await?;
        let tracked = tracker::remove(&mut *tx, path).await?;
        tx.commit().await?;

        Ok(tracked)
    }

    /// Empty the lexical index, `file_meta` and the vector index.
    pub async fn clear(&self) -> Result<()> {
        if let Some(vectors) = self.vectors() {
            vectors.clear().await?;
        }

        let mut tx = self.pool.begin().await?;
        lexical::clear(&mut *tx).await?;
        tracker::clear(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
