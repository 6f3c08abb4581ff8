//! Similarity-search collections the vector index writes to and reads from.
//!
//! [`LocalCollection`] keeps vectors in memory and can persist them as a JSON
//! file in a directory; [`QdrantCollection`] talks to a Qdrant server over
//! HTTP. Both rank by cosine similarity.

use crate::error::IndexError;
use crate::models::{SearchHit, TextChunk};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

const COLLECTION_FILE: &str = "collection.json";

#[async_trait]
pub trait Collection: Send + Sync {
    async fn count(&self) -> Result<usize, IndexError>;

    /// Inserts chunks, replacing any stored chunk with the same id.
    async fn upsert(&self, chunks: &[TextChunk], embeddings: &[Vec<f32>]) -> Result<(), IndexError>;

    async fn search(&self, query_vector: &[f32], k: usize) -> Result<Vec<SearchHit>, IndexError>;

    async fn persist(&self) -> Result<(), IndexError> {
        Ok(())
    }

    /// Whether a previous load already populated this collection, even if it
    /// loaded nothing.
    async fn was_built(&self) -> Result<bool, IndexError> {
        Ok(self.count().await? > 0)
    }
}

#[async_trait]
impl Collection for Box<dyn Collection> {
    async fn count(&self) -> Result<usize, IndexError> {
        self.as_ref().count().await
    }

    async fn upsert(&self, chunks: &[TextChunk], embeddings: &[Vec<f32>]) -> Result<(), IndexError> {
        self.as_ref().upsert(chunks, embeddings).await
    }

    async fn search(&self, query_vector: &[f32], k: usize) -> Result<Vec<SearchHit>, IndexError> {
        self.as_ref().search(query_vector, k).await
    }

    async fn persist(&self) -> Result<(), IndexError> {
        self.as_ref().persist().await
    }

    async fn was_built(&self) -> Result<bool, IndexError> {
        self.as_ref().was_built().await
    }
}

fn check_lengths(chunks: &[TextChunk], embeddings: &[Vec<f32>]) -> Result<(), IndexError> {
    if chunks.len() != embeddings.len() {
        return Err(IndexError::BackendResponse {
            backend: "collection".to_string(),
            details: format!(
                "embedding count {} doesn't match chunk count {}",
                embeddings.len(),
                chunks.len()
            ),
        });
    }
    Ok(())
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredVector {
    chunk: TextChunk,
    vector: Vec<f32>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CollectionFile {
    entries: Vec<StoredVector>,
}

/// In-process collection, optionally backed by `<dir>/collection.json`.
#[derive(Default)]
pub struct LocalCollection {
    entries: RwLock<Vec<StoredVector>>,
    persist_dir: Option<PathBuf>,
    persisted: AtomicBool,
}

impl LocalCollection {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Reopens a persisted collection if `dir` holds one, otherwise starts an
    /// empty collection that will persist into `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, IndexError> {
        let dir = dir.into();
        let file = dir.join(COLLECTION_FILE);

        let persisted = tokio::fs::try_exists(&file).await?;
        let entries = if persisted {
            let raw = tokio::fs::read(&file).await?;
            let parsed: CollectionFile = serde_json::from_slice(&raw)?;
            info!(path = %file.display(), entries = parsed.entries.len(), "reopened persisted collection");
            parsed.entries
        } else {
            Vec::new()
        };

        Ok(Self {
            entries: RwLock::new(entries),
            persist_dir: Some(dir),
            persisted: AtomicBool::new(persisted),
        })
    }

    pub fn persist_dir(&self) -> Option<&Path> {
        self.persist_dir.as_deref()
    }
}

#[async_trait]
impl Collection for LocalCollection {
    async fn count(&self) -> Result<usize, IndexError> {
        Ok(self.entries.read().await.len())
    }

    async fn upsert(&self, chunks: &[TextChunk], embeddings: &[Vec<f32>]) -> Result<(), IndexError> {
        check_lengths(chunks, embeddings)?;
        let mut entries = self.entries.write().await;

        for (chunk, vector) in chunks.iter().zip(embeddings.iter()) {
            let stored = StoredVector {
                chunk: chunk.clone(),
                vector: vector.clone(),
            };
            match entries
                .iter_mut()
                .find(|entry| entry.chunk.chunk_id == chunk.chunk_id)
            {
                Some(existing) => *existing = stored,
                None => entries.push(stored),
            }
        }

        Ok(())
    }

    async fn search(&self, query_vector: &[f32], k: usize) -> Result<Vec<SearchHit>, IndexError> {
        let entries = self.entries.read().await;

        if let Some(stored) = entries.first() {
            if stored.vector.len() != query_vector.len() {
                return Err(IndexError::DimensionMismatch {
                    expected: stored.vector.len(),
                    actual: query_vector.len(),
                });
            }
        }

        let mut hits = entries
            .iter()
            .map(|entry| SearchHit {
                chunk: entry.chunk.clone(),
                score: cosine_similarity(query_vector, &entry.vector),
            })
            .collect::<Vec<_>>();

        hits.sort_by(|left, right| right.score.total_cmp(&left.score));
        hits.truncate(k);
        Ok(hits)
    }

    async fn persist(&self) -> Result<(), IndexError> {
        let Some(dir) = &self.persist_dir else {
            return Ok(());
        };

        tokio::fs::create_dir_all(dir).await?;
        let entries = self.entries.read().await;
        let encoded = serde_json::to_vec(&CollectionFile {
            entries: entries.clone(),
        })?;

        let target = dir.join(COLLECTION_FILE);
        let staging = dir.join(format!("{COLLECTION_FILE}.tmp"));
        tokio::fs::write(&staging, encoded).await?;
        tokio::fs::rename(&staging, &target).await?;
        self.persisted.store(true, Ordering::SeqCst);

        info!(path = %target.display(), entries = entries.len(), "persisted collection");
        Ok(())
    }

    async fn was_built(&self) -> Result<bool, IndexError> {
        Ok(self.persisted.load(Ordering::SeqCst) || self.count().await? > 0)
    }
}

/// Collection stored in a Qdrant server. Qdrant is durable on its own, so
/// `persist` is a no-op.
pub struct QdrantCollection {
    endpoint: Url,
    collection: String,
    client: Client,
    vector_size: usize,
}

impl QdrantCollection {
    pub fn new(
        endpoint: &str,
        collection: impl Into<String>,
        vector_size: usize,
    ) -> Result<Self, IndexError> {
        Ok(Self {
            endpoint: Url::parse(endpoint)?,
            collection: collection.into(),
            client: Client::new(),
            vector_size,
        })
    }

    fn url(&self, suffix: &str) -> Result<Url, IndexError> {
        Ok(self
            .endpoint
            .join(&format!("collections/{}{suffix}", self.collection))?)
    }

    /// Creates the collection when it does not exist yet.
    pub async fn ensure_collection(&self) -> Result<(), IndexError> {
        let response = self.client.get(self.url("")?).send().await?;
        if response.status().is_success() {
            return Ok(());
        }
        if response.status() != StatusCode::NOT_FOUND {
            return Err(backend_error(response.status()));
        }

        let response = self
            .client
            .put(self.url("")?)
            .json(&json!({
                "vectors": { "size": self.vector_size, "distance": "Cosine" }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }
        info!(collection = %self.collection, "created qdrant collection");
        Ok(())
    }
}

fn backend_error(status: StatusCode) -> IndexError {
    IndexError::BackendResponse {
        backend: "qdrant".to_string(),
        details: status.to_string(),
    }
}

pub fn point_id(chunk_id: &str) -> Uuid {
    let digest = Sha256::digest(chunk_id.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes)
}

#[async_trait]
impl Collection for QdrantCollection {
    async fn count(&self) -> Result<usize, IndexError> {
        let response = self
            .client
            .post(self.url("/points/count")?)
            .json(&json!({ "exact": true }))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(0);
        }
        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        let parsed: Value = response.json().await?;
        Ok(parsed
            .pointer("/result/count")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize)
    }

    async fn upsert(&self, chunks: &[TextChunk], embeddings: &[Vec<f32>]) -> Result<(), IndexError> {
        check_lengths(chunks, embeddings)?;

        let points = chunks
            .iter()
            .zip(embeddings.iter())
            .map(|(chunk, embedding)| {
                if embedding.len() != self.vector_size {
                    return Err(IndexError::DimensionMismatch {
                        expected: self.vector_size,
                        actual: embedding.len(),
                    });
                }
                Ok(json!({
                    "id": point_id(&chunk.chunk_id).to_string(),
                    "vector": embedding,
                    "payload": serde_json::to_value(chunk)?,
                }))
            })
            .collect::<Result<Vec<_>, IndexError>>()?;

        if points.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .put(self.url("/points?wait=true")?)
            .json(&json!({ "points": points }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }
        debug!(points = chunks.len(), "upserted qdrant points");
        Ok(())
    }

    async fn search(&self, query_vector: &[f32], k: usize) -> Result<Vec<SearchHit>, IndexError> {
        if query_vector.len() != self.vector_size {
            return Err(IndexError::DimensionMismatch {
                expected: self.vector_size,
                actual: query_vector.len(),
            });
        }

        let response = self
            .client
            .post(self.url("/points/search")?)
            .json(&json!({
                "vector": query_vector,
                "limit": k,
                "with_payload": true,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        let parsed: Value = response.json().await?;
        parse_search_hits(&parsed)
    }
}

fn parse_search_hits(parsed: &Value) -> Result<Vec<SearchHit>, IndexError> {
    let hits = parsed
        .pointer("/result")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    hits.into_iter()
        .map(|hit| {
            let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0) as f32;
            let payload = hit.get("payload").cloned().unwrap_or(Value::Null);
            let chunk: TextChunk = serde_json::from_value(payload)?;
            Ok(SearchHit { chunk, score })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn chunk(id: &str, text: &str) -> TextChunk {
        TextChunk {
            chunk_id: id.to_string(),
            source: "doc.pdf".to_string(),
            page: 1,
            chunk_index: 0,
            text: text.to_string(),
        }
    }

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let score = cosine_similarity(&[1.0, 2.0], &[1.0, 2.0]);
        assert!((score - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[tokio::test]
    async fn local_search_ranks_by_similarity() -> Result<(), IndexError> {
        let collection = LocalCollection::in_memory();
        collection
            .upsert(
                &[chunk("x", "east"), chunk("y", "north")],
                &[vec![1.0, 0.0], vec![0.0, 1.0]],
            )
            .await?;

        let hits = collection.search(&[0.1, 0.9], 1).await?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.chunk_id, "y");
        Ok(())
    }

    #[tokio::test]
    async fn upsert_replaces_same_chunk_id() -> Result<(), IndexError> {
        let collection = LocalCollection::in_memory();
        collection.upsert(&[chunk("x", "old")], &[vec![1.0]]).await?;
        collection.upsert(&[chunk("x", "new")], &[vec![1.0]]).await?;

        assert_eq!(collection.count().await?, 1);
        let hits = collection.search(&[1.0], 5).await?;
        assert_eq!(hits[0].chunk.text, "new");
        Ok(())
    }

    #[tokio::test]
    async fn mismatched_lengths_are_rejected() {
        let collection = LocalCollection::in_memory();
        let result = collection.upsert(&[chunk("x", "a")], &[]).await;
        assert!(matches!(result, Err(IndexError::BackendResponse { .. })));
    }

    #[tokio::test]
    async fn persisted_collection_reopens() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let target = dir.path().join("store");

        let collection = LocalCollection::open(&target).await?;
        assert_eq!(collection.count().await?, 0);
        collection.upsert(&[chunk("x", "kept")], &[vec![0.5, 0.5]]).await?;
        collection.persist().await?;

        let reopened = LocalCollection::open(&target).await?;
        assert_eq!(reopened.count().await?, 1);
        let hits = reopened.search(&[0.5, 0.5], 1).await?;
        assert_eq!(hits[0].chunk.text, "kept");
        Ok(())
    }

    #[tokio::test]
    async fn query_with_wrong_dimension_is_rejected() -> Result<(), IndexError> {
        let collection = LocalCollection::in_memory();
        collection.upsert(&[chunk("x", "east")], &[vec![1.0, 0.0, 0.0]]).await?;

        let result = collection.search(&[1.0, 0.0], 3).await;
        assert!(matches!(
            result,
            Err(IndexError::DimensionMismatch { expected: 3, actual: 2 })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn empty_persisted_collection_counts_as_built() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;

        let collection = LocalCollection::open(dir.path()).await?;
        assert!(!collection.was_built().await?);
        collection.persist().await?;

        let reopened = LocalCollection::open(dir.path()).await?;
        assert_eq!(reopened.count().await?, 0);
        assert!(reopened.was_built().await?);
        Ok(())
    }

    #[test]
    fn point_ids_are_stable() {
        assert_eq!(point_id("chunk-1"), point_id("chunk-1"));
        assert_ne!(point_id("chunk-1"), point_id("chunk-2"));
    }

    #[test]
    fn qdrant_hits_rebuild_chunks_from_payload() -> Result<(), IndexError> {
        let parsed = json!({
            "result": [{
                "id": "abc",
                "score": 0.75,
                "payload": serde_json::to_value(chunk("x", "hydraulics"))?
            }]
        });

        let hits = parse_search_hits(&parsed)?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.text, "hydraulics");
        assert!((hits[0].score - 0.75).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn qdrant_urls_are_scoped_to_the_collection() -> Result<(), IndexError> {
        let collection = QdrantCollection::new("http://localhost:6333/", "quiz_chunks", 4)?;
        assert_eq!(
            collection.url("/points/search")?.as_str(),
            "http://localhost:6333/collections/quiz_chunks/points/search"
        );
        Ok(())
    }
}
