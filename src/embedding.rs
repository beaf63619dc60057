//! Embedder collaborator: chunk texts → vectors.
//!
//! The pipeline consumes embeddings through the [`Embedder`] trait; the
//! model itself is an external service. Two providers ship:
//!
//! - **[`DisabledEmbedder`]** — refuses every call; when configured, the
//!   pipeline skips the embed and load stages entirely.
//! - **[`OpenAiEmbedder`]** — calls the OpenAI embeddings API with
//!   batching, exponential backoff on 429/5xx, and fail-fast on other
//!   client errors.

use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Vector dimensionality.
    fn dims(&self) -> usize;

    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Instantiate the embedder named by the configuration.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Box<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledEmbedder)),
        "openai" => Ok(Box::new(OpenAiEmbedder::new(config)?)),
        other => Err(Error::Configuration(format!(
            "unknown embedding provider: '{other}'"
        ))),
    }
}

// ============ Disabled ============

pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> usize {
        0
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(Error::Embedding {
            item: String::new(),
            reason: "embedding provider is disabled".to_string(),
        })
    }
}

// ============ OpenAI ============

/// Embedding provider backed by `POST /v1/embeddings`.
///
/// Requires the `OPENAI_API_KEY` environment variable. Batches of up to
/// `batch_size` texts go out per request; transient failures (HTTP 429,
/// 5xx, network errors) retry with exponential backoff capped at 32s.
pub struct OpenAiEmbedder {
    model: String,
    dims: usize,
    batch_size: usize,
    max_retries: u32,
    timeout_secs: u64,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            Error::Configuration("embedding.model required for OpenAI provider".to_string())
        })?;
        let dims = config.dims.ok_or_else(|| {
            Error::Configuration("embedding.dims required for OpenAI provider".to_string())
        })?;

        if std::env::var("OPENAI_API_KEY").is_err() {
            return Err(Error::Configuration(
                "OPENAI_API_KEY environment variable not set".to_string(),
            ));
        }

        Ok(Self {
            model,
            dims,
            batch_size: config.batch_size,
            max_retries: config.max_retries,
            timeout_secs: config.timeout_secs,
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| Error::Embedding {
            item: String::new(),
            reason: "OPENAI_API_KEY not set".to_string(),
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()
            .map_err(|e| Error::Embedding {
                item: String::new(),
                reason: e.to_string(),
            })?;

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = client
                .post("https://api.openai.com/v1/embeddings")
                .header("Authorization", format!("Bearer {}", api_key))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value =
                            response.json().await.map_err(|e| Error::Embedding {
                                item: String::new(),
                                reason: format!("invalid response: {e}"),
                            })?;
                        return parse_embeddings_response(&json);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(attempt, %status, "embedding request throttled, retrying");
                        last_err = Some(format!("API error {status}: {body_text}"));
                        continue;
                    }

                    // Client error (not 429) — don't retry
                    return Err(Error::Embedding {
                        item: String::new(),
                        reason: format!("API error {status}: {body_text}"),
                    });
                }
                Err(e) => {
                    last_err = Some(e.to_string());
                    continue;
                }
            }
        }

        Err(Error::Embedding {
            item: String::new(),
            reason: last_err.unwrap_or_else(|| "embedding failed after retries".to_string()),
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size.max(1)) {
            vectors.extend(self.embed_batch(batch).await?);
        }
        Ok(vectors)
    }
}

/// Parse the embeddings API response, extracting `data[].embedding`
/// arrays realigned to input order via each entry's `index` field —
/// the API does not guarantee array position matches request order.
fn parse_embeddings_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| Error::Embedding {
            item: String::new(),
            reason: "invalid response: missing data array".to_string(),
        })?;

    let mut embeddings: Vec<Option<Vec<f32>>> = vec![None; data.len()];
    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| Error::Embedding {
                item: String::new(),
                reason: "invalid response: missing embedding".to_string(),
            })?;

        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        if index >= embeddings.len() {
            return Err(Error::Embedding {
                item: String::new(),
                reason: format!(
                    "invalid response: index {} out of range for {} entries",
                    index,
                    embeddings.len()
                ),
            });
        }

        embeddings[index] = Some(
            embedding
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect(),
        );
    }

    embeddings
        .into_iter()
        .map(|slot| {
            slot.ok_or_else(|| Error::Embedding {
                item: String::new(),
                reason: "invalid response: duplicate or missing index".to_string(),
            })
        })
        .collect()
}
