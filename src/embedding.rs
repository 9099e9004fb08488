//! Text embeddings for duplicate detection and retrieval.
//!
//! [`EmbeddingProvider`] is the only way the pipeline turns text into
//! vectors. [`create_provider`] picks the backend named in `[embedding]`:
//! `openai` ([`OpenAIProvider`], `POST {url}/embeddings`), `ollama`
//! ([`OllamaProvider`], `POST {url}/api/embed`) or `disabled`
//! ([`DisabledProvider`], every call fails).
//!
//! Both HTTP backends check that each returned vector has the configured
//! dimensionality, so a wrong `dims` setting is reported on the first call
//! instead of reaching the store.
//!
//! Vectors are persisted as little-endian `f32` blobs ([`vec_to_blob`],
//! [`blob_to_vec`]) and compared with [`cosine_similarity`].

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use crate::config::EmbeddingConfig;
use crate::http;

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com/v1";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Identifier stored next to every vector; rows are only compared
    /// within the same model.
    fn model_name(&self) -> &str;
    fn dims(&self) -> usize;
    /// One vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

pub async fn embed_one(provider: &dyn EmbeddingProvider, text: &str) -> Result<Vec<f32>> {
    provider
        .embed(&[text.to_string()])
        .await?
        .pop()
        .ok_or_else(|| anyhow!("{} returned no embedding", provider.model_name()))
}

pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    let provider: Arc<dyn EmbeddingProvider> = match config.provider.as_str() {
        "disabled" => Arc::new(DisabledProvider),
        "openai" => Arc::new(OpenAIProvider::new(config)?),
        "ollama" => Arc::new(OllamaProvider::new(config)?),
        other => bail!("Unknown embedding provider: {}", other),
    };
    Ok(provider)
}

/// Connection settings shared by the HTTP backends.
struct Endpoint {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
    max_retries: u32,
}

impl Endpoint {
    fn from_config(config: &EmbeddingConfig, backend: &str, default_url: &str) -> Result<Self> {
        let Some(model) = config.model.clone() else {
            bail!("embedding.model required for {} provider", backend);
        };
        let Some(dims) = config.dims else {
            bail!("embedding.dims required for {} provider", backend);
        };
        Ok(Self {
            client: http::client(config.timeout_secs)?,
            url: config.url.as_deref().unwrap_or(default_url).to_string(),
            model,
            dims,
            max_retries: config.max_retries,
        })
    }

    /// Reject a response whose shape does not match the request.
    fn check(&self, vectors: &[Vec<f32>], inputs: usize) -> Result<()> {
        if vectors.len() != inputs {
            bail!(
                "'{}' returned {} embeddings for {} inputs",
                self.model,
                vectors.len(),
                inputs
            );
        }
        check_dims(vectors, self.dims, &self.model)
    }
}

fn check_dims(vectors: &[Vec<f32>], expected: usize, model: &str) -> Result<()> {
    match vectors.iter().find(|v| v.len() != expected) {
        Some(bad) => bail!(
            "Embedding model '{}' returned {} dims, expected {}",
            model,
            bad.len(),
            expected
        ),
        None => Ok(()),
    }
}

/// Stand-in when `embedding.provider = "disabled"`. Duplicate detection
/// degrades to a warning and storage fails, so nothing unembedded is stored.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("Embedding provider is disabled")
    }
}

/// OpenAI-compatible `/embeddings` backend. Reads `OPENAI_API_KEY`.
pub struct OpenAIProvider {
    endpoint: Endpoint,
    api_key: String,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &EmbeddingConfig, api_key: String) -> Result<Self> {
        Ok(Self {
            endpoint: Endpoint::from_config(config, "OpenAI", OPENAI_DEFAULT_URL)?,
            api_key,
        })
    }
}

#[derive(Deserialize)]
struct OpenAIEmbeddings {
    data: Vec<OpenAIEmbedding>,
}

#[derive(Deserialize)]
struct OpenAIEmbedding {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.endpoint.model
    }
    fn dims(&self) -> usize {
        self.endpoint.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let ep = &self.endpoint;
        let url = http::join_url(&ep.url, "embeddings");
        let body = serde_json::json!({ "model": ep.model, "input": texts });

        let response = http::send_with_retry("OpenAI embeddings", ep.max_retries, || {
            ep.client.post(&url).bearer_auth(&self.api_key).json(&body)
        })
        .await?;

        let mut items = response.json::<OpenAIEmbeddings>().await?.data;
        // The API may answer out of order; `index` is authoritative.
        items.sort_by_key(|item| item.index);
        let vectors: Vec<Vec<f32>> = items.into_iter().map(|item| item.embedding).collect();
        ep.check(&vectors, texts.len())?;
        Ok(vectors)
    }
}

/// Local Ollama backend (`/api/embed`, batch input).
pub struct OllamaProvider {
    endpoint: Endpoint,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            endpoint: Endpoint::from_config(config, "Ollama", OLLAMA_DEFAULT_URL)?,
        })
    }
}

#[derive(Deserialize)]
struct OllamaEmbeddings {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.endpoint.model
    }
    fn dims(&self) -> usize {
        self.endpoint.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let ep = &self.endpoint;
        let url = http::join_url(&ep.url, "api/embed");
        let body = serde_json::json!({ "model": ep.model, "input": texts });

        let response = http::send_with_retry("Ollama embed", ep.max_retries, || {
            ep.client.post(&url).json(&body)
        })
        .await?;

        let vectors = response.json::<OllamaEmbeddings>().await?.embeddings;
        ep.check(&vectors, texts.len())?;
        Ok(vectors)
    }
}

pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Inverse of [`vec_to_blob`]; a trailing partial value is ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Cosine similarity in `[-1, 1]`. Mismatched lengths, empty input and
/// zero vectors score `0.0`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let (dot, aa, bb) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(dot, aa, bb), (x, y)| {
            (dot + x * y, aa + x * x, bb + y * y)
        });
    let norm = aa.sqrt() * bb.sqrt();
    if norm < f32::EPSILON {
        0.0
    } else {
        dot / norm
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_keeps_signs_and_fractions() {
        let vector = [0.25f32, -7.5, 0.0, 1e-3];
        let blob = vec_to_blob(&vector);
        assert_eq!(blob.len(), 16);
        assert_eq!(blob_to_vec(&blob), vector);
        assert_eq!(blob_to_vec(&blob[..6]), vec![0.25]);
    }

    #[test]
    fn cosine_of_parallel_and_perpendicular_vectors() {
        assert!((cosine_similarity(&[2.0, 4.0], &[1.0, 2.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[0.0, 3.0], &[5.0, 0.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_degenerate_inputs_score_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[tokio::test]
    async fn disabled_provider_errors() {
        let err = embed_one(&DisabledProvider, "free shipping").await.unwrap_err();
        assert!(err.to_string().contains("disabled"));
    }

    #[test]
    fn dims_mismatch_is_rejected() {
        let err = check_dims(&[vec![0.1, 0.2]], 3, "m").unwrap_err();
        assert!(err.to_string().contains("returned 2 dims, expected 3"));
    }

    #[test]
    fn enabled_backends_need_model_and_dims() {
        let config = EmbeddingConfig {
            provider: "ollama".to_string(),
            model: Some("nomic-embed-text".to_string()),
            dims: None,
            url: None,
            timeout_secs: 5,
            max_retries: 0,
        };
        let err = OllamaProvider::new(&config).err().map(|e| e.to_string());
        assert_eq!(
            err.as_deref(),
            Some("embedding.dims required for Ollama provider")
        );
    }
}
