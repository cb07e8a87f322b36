use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::{check_output, Embedder};
use crate::config::VectorConfig;

const DEFAULT_MODEL: &str = "text-embedding-3-small";

/// Embedder backed by an OpenAI-compatible `POST {api_base}/embeddings`
/// endpoint.
///
/// Inputs are split into batches of at most `max_batch_size` texts, sent one
/// batch at a time. Transient failures are retried:
/// - HTTP 429 or 5xx → retry with exponential backoff
/// - HTTP 4xx (not 429) → fail immediately
/// - Network error → retry
pub struct RemoteEmbedder {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    dimension: usize,
    max_batch_size: usize,
    max_retries: u32,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

impl RemoteEmbedder {
    /// # Errors
    ///
    /// Fails when neither `vector.credential` nor `OPENAI_API_KEY` is set.
    pub fn new(config: &VectorConfig) -> Result<Self> {
        let api_key = match config.credential.clone() {
            Some(key) if !key.trim().is_empty() => key,
            _ => match std::env::var("OPENAI_API_KEY") {
                Ok(key) if !key.trim().is_empty() => key,
                _ => bail!(
                    "remote embedding provider needs a credential: set vector.credential or OPENAI_API_KEY"
                ),
            },
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", config.api_base.trim_end_matches('/')),
            api_key,
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            dimension: config.resolved_dimension(),
            max_batch_size: config.max_batch_size.max(1),
            max_retries: config.max_retries,
        })
    }

    async fn embed_chunk(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // 1s, 2s, 4s, ... capped at 32s
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::debug!(attempt, ?delay, "retrying embedding request");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let parsed: EmbeddingResponse = response.json().await?;
                        return order_by_index(parsed);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(anyhow::anyhow!(
                            "embedding API error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    bail!("embedding API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("embedding failed after retries")))
    }
}

/// Response items may arrive in any order; each carries its input index.
fn order_by_index(response: EmbeddingResponse) -> Result<Vec<Vec<f32>>> {
    let mut items = response.data;
    items.sort_by_key(|item| item.index);
    for (expected, item) in items.iter().enumerate() {
        if item.index != expected {
            bail!(
                "embedding response has index {} where {} was expected",
                item.index,
                expected
            );
        }
    }
    Ok(items.into_iter().map(|item| item.embedding).collect())
}

#[async_trait]
impl Embedder for RemoteEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.max_batch_size) {
            let batch = self.embed_chunk(chunk).await?;
            check_output(&batch, chunk.len(), self.dimension)?;
            vectors.extend(batch);
        }
        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_by_index_sorts() {
        let response: EmbeddingResponse = serde_json::from_str(
            r#"{"data":[
                {"index":2,"embedding":[2.0]},
                {"index":0,"embedding":[0.0]},
                {"index":1,"embedding":[1.0]}
            ]}"#,
        )
        .unwrap();
        let vectors = order_by_index(response).unwrap();
        assert_eq!(vectors, vec![vec![0.0], vec![1.0], vec![2.0]]);
    }

    #[test]
    fn test_order_by_index_rejects_gaps() {
        let response: EmbeddingResponse =
            serde_json::from_str(r#"{"data":[{"index":1,"embedding":[1.0]}]}"#).unwrap();
        assert!(order_by_index(response).is_err());
    }

    #[test]
    fn test_credential_from_config() {
        let config = VectorConfig {
            provider: crate::config::ProviderKind::Remote,
            credential: Some("sk-test".to_string()),
            api_base: "http://localhost:9/v1/".to_string(),
            ..VectorConfig::default()
        };
        let embedder = RemoteEmbedder::new(&config).unwrap();
        assert_eq!(embedder.endpoint, "http://localhost:9/v1/embeddings");
        assert_eq!(embedder.model_name(), "text-embedding-3-small");
        assert_eq!(embedder.dimension(), 1536);
    }
}
