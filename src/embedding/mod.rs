//! Embedding provider abstraction and implementations.
//!
//! Defines the [`Embedder`] trait and its two implementations:
//! - **`LocalEmbedder`**: runs a model on-device via fastembed. The model is
//!   loaded on first use; texts are embedded one at a time.
//! - **[`RemoteEmbedder`]**: calls an OpenAI-compatible `/embeddings`
//!   endpoint with batching, retry, and backoff.
//!
//! Also provides vector utilities:
//! - [`cosine_similarity`]: similarity between two vectors
//! - [`l2_normalize`]: scale a vector to unit length
//! - [`vec_to_blob`] / [`blob_to_vec`]: little-endian `f32` BLOB encoding
//!
//! # Failure policy
//!
//! Embedding errors are always recoverable for callers. The indexer and the
//! query orchestrator log them and continue with lexical search only.
//!
//! # Provider Selection
//!
//! ```rust,no_run
//! # use kex_mem::config::VectorConfig;
//! # use kex_mem::embedding::create_embedder;
//! let config = VectorConfig::default(); // provider = "local", 384 dims
//! let embedder = create_embedder(&config).unwrap();
//! assert_eq!(embedder.dimension(), 384);
//! ```

#[cfg(feature = "local-embeddings")]
mod local;
mod remote;

#[cfg(feature = "local-embeddings")]
pub use local::LocalEmbedder;
pub use remote::RemoteEmbedder;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::config::{ProviderKind, VectorConfig};

/// A source of fixed-dimension text embeddings.
///
/// Implementations are created once by the caller (see [`create_embedder`])
/// and passed by reference to the indexer and query orchestrator.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Returns the length of every vector this embedder produces.
    fn dimension(&self) -> usize;

    /// Embed a batch of texts. The output has one vector per input, in
    /// input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed_batch(&[text.to_string()]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
    }
}

/// Create the embedder selected by `config.provider`.
///
/// # Errors
///
/// The remote provider fails immediately when no credential is configured.
/// The local provider fails when the crate was built without the
/// `local-embeddings` feature.
pub fn create_embedder(config: &VectorConfig) -> Result<Box<dyn Embedder>> {
    match config.provider {
        #[cfg(feature = "local-embeddings")]
        ProviderKind::Local => Ok(Box::new(LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embeddings"))]
        ProviderKind::Local => bail!(
            "Local embedding provider requires the `local-embeddings` feature; use provider = \"remote\""
        ),
        ProviderKind::Remote => Ok(Box::new(RemoteEmbedder::new(config)?)),
    }
}

/// Check that a provider returned `expected` vectors of `dimension` floats.
pub(crate) fn check_output(vectors: &[Vec<f32>], expected: usize, dimension: usize) -> Result<()> {
    if vectors.len() != expected {
        bail!(
            "embedding provider returned {} vectors for {} inputs",
            vectors.len(),
            expected
        );
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
        bail!(
            "embedding provider returned a {}-dimensional vector, expected {}",
            bad.len(),
            dimension
        );
    }
    Ok(())
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// Each `f32` is stored as 4 bytes in little-endian order, producing
/// a BLOB of `vec.len() × 4` bytes.
///
/// ```rust
/// use kex_mem::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode a BLOB back into a float vector. Trailing bytes that do not form a
/// whole `f32` are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors, vectors of
/// different lengths, and zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Scale `vec` to unit length in place. Zero vectors are left unchanged.
pub fn l2_normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in vec.iter_mut() {
            *x /= norm;
        }
    }
}
