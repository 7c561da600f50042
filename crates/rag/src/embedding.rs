use std::env;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use datachat_core::{Embedder, HashEmbedder, HashEmbedderConfig};
use reqwest::blocking::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::config::{EmbeddingConfig, EmbeddingProvider};

const OPENAI_BATCH: usize = 96;

pub enum EmbeddingBackend {
    Hash(HashEmbedder),
    OpenAi(OpenAiEmbeddingClient),
}

/// The embedding function shared by index builds and queries.
pub struct EmbeddingClient {
    backend: EmbeddingBackend,
}

impl EmbeddingClient {
    /// Builds the configured provider. A remote provider without a usable
    /// credential falls back to hashing with a warning.
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        match config.provider {
            EmbeddingProvider::OpenAi => match OpenAiEmbeddingClient::new(config) {
                Ok(client) => Self {
                    backend: EmbeddingBackend::OpenAi(client),
                },
                Err(err) => {
                    tracing::warn!(error = %err, "remote embeddings unavailable, using hash embeddings");
                    Self::hash(config)
                }
            },
            EmbeddingProvider::Hash => Self::hash(config),
        }
    }

    pub fn hash(config: &EmbeddingConfig) -> Self {
        Self {
            backend: EmbeddingBackend::Hash(HashEmbedder::new(HashEmbedderConfig {
                dimensions: config.dimensions,
                seed: config.seed,
            })),
        }
    }

    pub fn backend(&self) -> &EmbeddingBackend {
        &self.backend
    }
}

impl Embedder for EmbeddingClient {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut output = self.embed_batch(&[text])?;
        output
            .pop()
            .ok_or_else(|| anyhow!("embedding provider returned no vector"))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        match &self.backend {
            EmbeddingBackend::Hash(embedder) => {
                Ok(texts.iter().map(|text| embedder.embed_text(text)).collect())
            }
            EmbeddingBackend::OpenAi(client) => client.embed_batch(texts),
        }
    }

    fn dimensions(&self) -> usize {
        match &self.backend {
            EmbeddingBackend::Hash(embedder) => embedder.dimensions(),
            EmbeddingBackend::OpenAi(client) => client.dimensions,
        }
    }

    fn model_name(&self) -> &str {
        match &self.backend {
            EmbeddingBackend::Hash(embedder) => embedder.model_name(),
            EmbeddingBackend::OpenAi(client) => &client.model,
        }
    }
}

pub struct OpenAiEmbeddingClient {
    http: Client,
    model: String,
    dimensions: usize,
    base_url: String,
    api_key: SecretString,
}

impl OpenAiEmbeddingClient {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = env::var(&config.api_key_env)
            .map_err(|_| anyhow!("{} is required for openai embeddings", config.api_key_env))?;
        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("failed to build embeddings http client")?;
        Ok(Self {
            http,
            model: config.model.clone(),
            dimensions: config.remote_dimensions,
            base_url: config.base_url.clone(),
            api_key: SecretString::new(api_key),
        })
    }

    pub fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
        let mut out = Vec::with_capacity(inputs.len());
        for batch in inputs.chunks(OPENAI_BATCH) {
            let payload = serde_json::json!({
                "model": self.model,
                "input": batch,
                "dimensions": self.dimensions,
            });
            let response = self
                .http
                .post(&url)
                .bearer_auth(self.api_key.expose_secret())
                .json(&payload)
                .send()
                .context("openai embeddings request failed")?;
            if !response.status().is_success() {
                return Err(anyhow!(
                    "openai embeddings request failed: {}",
                    response.status()
                ));
            }
            let parsed: OpenAiEmbeddingResponse = response
                .json()
                .context("failed to decode openai embeddings response")?;
            out.extend(checked_vectors(parsed, batch.len(), self.dimensions)?);
        }
        tracing::debug!(inputs = inputs.len(), model = %self.model, "remote embeddings");
        Ok(out)
    }
}

/// Orders vectors by input index and checks there is one per input, each of
/// the requested width.
fn checked_vectors(
    mut parsed: OpenAiEmbeddingResponse,
    inputs: usize,
    dimensions: usize,
) -> Result<Vec<Vec<f32>>> {
    if parsed.data.len() != inputs {
        return Err(anyhow!(
            "openai returned {} embeddings for {} inputs",
            parsed.data.len(),
            inputs
        ));
    }
    if let Some(bad) = parsed.data.iter().find(|data| data.embedding.len() != dimensions) {
        return Err(anyhow!(
            "openai returned a {}-dimension embedding, expected {}",
            bad.embedding.len(),
            dimensions
        ));
    }
    parsed.data.sort_by_key(|data| data.index);
    Ok(parsed.data.into_iter().map(|data| data.embedding).collect())
}

#[derive(Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingData>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}
