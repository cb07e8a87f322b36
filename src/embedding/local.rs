use anyhow::{bail, Result};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

use super::{check_output, l2_normalize, Embedder};
use crate::config::{VectorConfig, LOCAL_MODELS};

const DEFAULT_MODEL: &str = "all-minilm-l6-v2";

/// On-device embedder running an ONNX model through fastembed.
///
/// The model is downloaded and loaded on the first call to
/// [`embed_batch`](Embedder::embed_batch), not at construction, so commands
/// that never embed pay nothing. Texts are embedded one at a time and every
/// output vector is L2-normalized.
pub struct LocalEmbedder {
    model_name: String,
    model: EmbeddingModel,
    dimension: usize,
    engine: OnceCell<Arc<Mutex<TextEmbedding>>>,
}

impl LocalEmbedder {
    pub fn new(config: &VectorConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let model = to_fastembed_model(&model_name)?;

        Ok(Self {
            model_name,
            model,
            dimension: config.resolved_dimension(),
            engine: OnceCell::new(),
        })
    }

    async fn engine(&self) -> Result<Arc<Mutex<TextEmbedding>>> {
        let engine = self
            .engine
            .get_or_try_init(|| async {
                let model = self.model.clone();
                tracing::info!(model = %self.model_name, "loading local embedding model");
                let engine = tokio::task::spawn_blocking(move || {
                    TextEmbedding::try_new(InitOptions::new(model).with_show_download_progress(false))
                        .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {}", e))
                })
                .await??;
                Ok::<_, anyhow::Error>(Arc::new(Mutex::new(engine)))
            })
            .await?;
        Ok(engine.clone())
    }
}

fn to_fastembed_model(name: &str) -> Result<EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(EmbeddingModel::BGEBaseENV15),
        "nomic-embed-text-v1.5" => Ok(EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(EmbeddingModel::MultilingualE5Small),
        other => {
            let names: Vec<&str> = LOCAL_MODELS.iter().map(|(n, _)| *n).collect();
            bail!(
                "Unknown local embedding model '{}'. Supported: {}",
                other,
                names.join(", ")
            )
        }
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let engine = self.engine().await?;
        let expected = texts.len();
        let texts = texts.to_vec();

        let vectors = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
            let mut engine = engine
                .lock()
                .map_err(|_| anyhow::anyhow!("local embedding model lock poisoned"))?;
            let mut out = Vec::with_capacity(texts.len());
            for text in texts {
                let mut result = engine
                    .embed(vec![text], None)
                    .map_err(|e| anyhow::anyhow!("Local embedding failed: {}", e))?;
                let mut vector = result
                    .pop()
                    .ok_or_else(|| anyhow::anyhow!("Local embedding returned no vector"))?;
                l2_normalize(&mut vector);
                out.push(vector);
            }
            Ok(out)
        })
        .await??;

        check_output(&vectors, expected, self.dimension)?;
        Ok(vectors)
    }
}
