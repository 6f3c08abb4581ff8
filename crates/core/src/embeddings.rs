use crate::error::IndexError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

/// Embedding function used to build and query the vector index.
///
/// Failures are returned as [`IndexError::Embedding`] and never retried here;
/// the caller decides whether to try again.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_name(&self) -> &str;

    fn dimensions(&self) -> usize;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, IndexError> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| IndexError::Embedding("empty embedding response".to_string()))
    }
}

#[async_trait]
impl Embedder for Box<dyn Embedder> {
    fn model_name(&self) -> &str {
        self.as_ref().model_name()
    }

    fn dimensions(&self) -> usize {
        self.as_ref().dimensions()
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError> {
        self.as_ref().embed_batch(texts).await
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, IndexError> {
        self.as_ref().embed(text).await
    }
}

/// Offline hashed trigram embedder. Needs no credentials, which makes it the
/// fallback for local runs and tests.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn model_name(&self) -> &str {
        "char-trigram"
    }

    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError> {
        Ok(texts.iter().map(|text| self.embed_sync(text)).collect())
    }
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub model_name: String,
    pub project: String,
    pub location: String,
    /// Overrides the regional Vertex AI host, e.g. for a proxy.
    pub endpoint: Option<String>,
    pub access_token: Option<String>,
    pub dimensions: usize,
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_name: "textembedding-gecko@003".to_string(),
            project: String::new(),
            location: "us-central1".to_string(),
            endpoint: None,
            access_token: None,
            dimensions: 768,
            batch_size: 32,
        }
    }
}

/// Vertex AI text embedding model called over its REST `:predict` endpoint.
pub struct VertexEmbedder {
    config: EmbeddingConfig,
    client: Client,
}

impl VertexEmbedder {
    pub fn new(config: EmbeddingConfig) -> Result<Self, IndexError> {
        if config.project.trim().is_empty() {
            return Err(IndexError::Embedding(
                "embedding project identifier is required".to_string(),
            ));
        }
        Ok(Self {
            config,
            client: Client::new(),
        })
    }

    pub fn predict_url(&self) -> Result<Url, IndexError> {
        let cfg = &self.config;
        let base = match &cfg.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://{}-aiplatform.googleapis.com", cfg.location),
        };
        Ok(Url::parse(&format!(
            "{base}/v1/projects/{}/locations/{}/publishers/google/models/{}:predict",
            cfg.project, cfg.location, cfg.model_name
        ))?)
    }

    async fn predict(&self, url: &Url, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError> {
        let instances = texts
            .iter()
            .map(|text| json!({ "content": text }))
            .collect::<Vec<_>>();

        let mut request = self
            .client
            .post(url.clone())
            .json(&json!({ "instances": instances }));
        if let Some(token) = &self.config.access_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|error| IndexError::Embedding(error.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(IndexError::Embedding(format!(
                "embedding request returned {status}: {body}"
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|error| IndexError::Embedding(error.to_string()))?;
        let vectors = parse_predictions(&payload)?;

        if vectors.len() != texts.len() {
            return Err(IndexError::Embedding(format!(
                "expected {} embeddings, received {}",
                texts.len(),
                vectors.len()
            )));
        }
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for VertexEmbedder {
    fn model_name(&self) -> &str {
        &self.config.model_name
    }

    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError> {
        let url = self.predict_url()?;
        let mut vectors = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.config.batch_size.max(1)) {
            debug!(model = %self.config.model_name, batch = batch.len(), "embedding batch");
            vectors.extend(self.predict(&url, batch).await?);
        }

        Ok(vectors)
    }
}

fn parse_predictions(payload: &Value) -> Result<Vec<Vec<f32>>, IndexError> {
    let predictions = payload
        .pointer("/predictions")
        .and_then(Value::as_array)
        .ok_or_else(|| IndexError::Embedding("response has no predictions".to_string()))?;

    predictions
        .iter()
        .map(|prediction| {
            prediction
                .pointer("/embeddings/values")
                .and_then(Value::as_array)
                .map(|values| {
                    values
                        .iter()
                        .filter_map(Value::as_f64)
                        .map(|value| value as f32)
                        .collect::<Vec<_>>()
                })
                .ok_or_else(|| IndexError::Embedding("prediction has no embedding values".to_string()))
        })
        .collect()
}
