//! remote embedding client
//!
//! implements the `Embedder` trait against an openai-compatible
//! `/embeddings` endpoint. the archive's keyframes were embedded with the
//! text tower of a multimodal model producing 1024-dim vectors, and the
//! serving side of that model is deployed behind this endpoint; queries are
//! translated to english before they get here.

use crate::providers::{Embedder, EmbeddingError};
use reqwest::Client;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// client for the remote embedding service
#[derive(Clone)]
pub struct RemoteEmbedder {
    client: Client,
    url: String,
    api_key: Option<String>,
    model: String,
}

impl RemoteEmbedder {
    pub fn new(url: String, api_key: Option<String>, model: String) -> Self {
        Self {
            client: Client::new(),
            url,
            api_key,
            model,
        }
    }
}

impl Embedder for RemoteEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: text,
        };

        let mut builder = self.client.post(&self.url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Api { status, body });
        }

        let parsed: EmbeddingResponse = response.json().await.map_err(|e| {
            EmbeddingError::Other(anyhow::anyhow!("failed to parse response: {}", e))
        })?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or(EmbeddingError::EmptyResponse)
    }

    fn name(&self) -> &'static str {
        "remote-clip"
    }
}
