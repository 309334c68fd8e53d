//! OpenAI-compatible remote embedder.
//!
//! Sends `POST {base_url}/embeddings` with `{"model", "input"}` and reads
//! `data[].embedding`, reordered by `data[].index`. Each request is retried
//! under the configured [`RetryPolicy`].

use serde::{Deserialize, Serialize};
use tracing::debug;
use ureq::Agent;

use super::{EmbeddingBatch, EmbeddingService};
use crate::config::RemoteEmbeddingConfig;
use crate::error::{PlaybookError, Result};
use crate::http;
use crate::retry::RetryPolicy;
use crate::types::Embedding;

/// Embedder backed by an HTTP endpoint.
pub struct RemoteEmbedding {
    config: RemoteEmbeddingConfig,
    retry: RetryPolicy,
    agent: Agent,
}

impl std::fmt::Debug for RemoteEmbedding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteEmbedding")
            .field("model", &self.config.model)
            .field("base_url", &self.config.base_url)
            .finish()
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Embedding,
    #[serde(default)]
    index: usize,
}

impl RemoteEmbedding {
    /// Creates a remote embedder. No request is made until the first call.
    pub fn new(config: RemoteEmbeddingConfig, retry: RetryPolicy) -> Self {
        let agent = http::agent(config.timeout);
        Self {
            config,
            retry,
            agent,
        }
    }

    fn batch_from(&self, mut response: EmbeddingResponse) -> EmbeddingBatch {
        response.data.sort_by_key(|d| d.index);
        EmbeddingBatch {
            vectors: response.data.into_iter().map(|d| d.embedding).collect(),
            model: response
                .model
                .unwrap_or_else(|| self.config.model.clone()),
        }
    }
}

impl EmbeddingService for RemoteEmbedding {
    fn embed_batch(&self, texts: &[&str]) -> Result<EmbeddingBatch> {
        if texts.is_empty() {
            return Ok(EmbeddingBatch {
                vectors: Vec::new(),
                model: self.config.model.clone(),
            });
        }

        let key = http::api_key(&self.config.api_key_env).map_err(PlaybookError::embedding)?;
        let url = http::endpoint(&self.config.base_url, "embeddings");
        let request = EmbeddingRequest {
            model: &self.config.model,
            input: texts,
        };

        let response: EmbeddingResponse = self.retry.run("embeddings", || {
            http::post_json(&self.agent, &url, &key, &request).map_err(PlaybookError::embedding)
        })?;

        let batch = self.batch_from(response);
        batch.ensure_uniform(texts.len())?;
        debug!(count = texts.len(), model = %batch.model, "Embedded batch");
        Ok(batch)
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}
