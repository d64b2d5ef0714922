//! Embedding client (part of C6's "narrow client contract" collaborators)
//! and persistent embedding store (C3).

pub mod store;

pub use store::EmbeddingStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Narrow contract over an embedding model. Implementations must be
/// deterministic enough that identical text yields identical vectors within
/// a process, since the schema analyzer's retrieval (§4.3) depends on it.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Embeds `text`, returning a vector whose dimension is fixed for this client.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// HTTP embedding client speaking the OpenAI-compatible `/v1/embeddings` wire
/// shape, the same request/response pattern used by most embedding
/// providers (including self-hosted ones fronted by an OpenAI-compatible gateway).
#[derive(Debug, Clone)]
pub struct HttpEmbeddingClient {
    config: EmbeddingConfig,
    http: reqwest::Client,
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

impl EmbeddingConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: model.into(),
        }
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

impl HttpEmbeddingClient {
    pub fn new(config: EmbeddingConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(crate::constants::LLM_CALL_TIMEOUT)
            .build()
            .map_err(|e| AppError::internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { config, http })
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let response = self
            .http
            .post(format!("{}/embeddings", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&EmbeddingRequest {
                model: &self.config.model,
                input: text,
            })
            .send()
            .await
            .map_err(|e| AppError::schema_embed(format!("embedding request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::schema_embed(format!(
                "embedding provider returned {status}: {body}"
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| AppError::schema_embed(format!("malformed embedding response: {e}")))?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| AppError::schema_embed("embedding response had no data"))
    }
}

/// Deterministic mock embedding client for tests and the `mock` LLM provider
/// pairing: hashes overlapping word shingles into a fixed-width vector so
/// that semantically similar text (shared words) scores higher under cosine
/// similarity, without depending on a real model.
#[derive(Debug, Clone)]
pub struct MockEmbeddingClient {
    dim: usize,
}

impl MockEmbeddingClient {
    pub const DEFAULT_DIM: usize = 32;

    pub fn new() -> Self {
        Self { dim: Self::DEFAULT_DIM }
    }

    pub fn with_dim(dim: usize) -> Self {
        Self { dim }
    }
}

impl Default for MockEmbeddingClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingClient for MockEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dim];
        for word in text.to_lowercase().split_whitespace() {
            let bucket = simple_hash(word) % self.dim as u64;
            vector[bucket as usize] += 1.0;
        }
        normalize(&mut vector);
        Ok(vector)
    }
}

fn simple_hash(s: &str) -> u64 {
    // FNV-1a: fast, deterministic, no external dependency needed for a mock.
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in s.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Cosine similarity between two equal-length vectors. Returns 0.0 if either
/// is the zero vector.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_client_is_deterministic() {
        let client = MockEmbeddingClient::new();
        let a = client.embed("users and orders").await.unwrap();
        let b = client.embed("users and orders").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn shared_words_score_higher_than_disjoint_text() {
        let client = MockEmbeddingClient::new();
        let query = client.embed("show me all users").await.unwrap();
        let related = client.embed("list all users in the system").await.unwrap();
        let unrelated = client.embed("truncate payment ledger totals").await.unwrap();

        let related_score = cosine_similarity(&query, &related);
        let unrelated_score = cosine_similarity(&query, &unrelated);
        assert!(related_score > unrelated_score);
    }

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let v = vec![0.6, 0.8];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_with_zero_vector_is_zero() {
        let v = vec![1.0, 0.0];
        let zero = vec![0.0, 0.0];
        assert_eq!(cosine_similarity(&v, &zero), 0.0);
    }
}
