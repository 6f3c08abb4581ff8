use crate::collection::Collection;
use crate::embeddings::Embedder;
use crate::error::IndexError;
use crate::models::{SearchHit, TextChunk};
use crate::traits::Retriever;
use async_trait::async_trait;
use tracing::{debug, info};

/// Embeds chunks into a similarity collection and answers top-k queries.
///
/// An index counts as built once `load` has run or the collection it was
/// opened on was populated by an earlier load, even an empty one. Querying an unbuilt index is an error;
/// querying a built but empty one yields no hits.
pub struct VectorIndex<E: Embedder, C: Collection> {
    embedder: E,
    collection: C,
    built: bool,
}

impl<E: Embedder, C: Collection> VectorIndex<E, C> {
    pub async fn open(embedder: E, collection: C) -> Result<Self, IndexError> {
        let built = collection.was_built().await?;
        if built {
            info!(entries = collection.count().await?, "using existing collection");
        }
        Ok(Self {
            embedder,
            collection,
            built,
        })
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    pub fn embedder(&self) -> &E {
        &self.embedder
    }

    pub fn collection(&self) -> &C {
        &self.collection
    }

    /// Embeds and stores `chunks`, then persists the collection.
    pub async fn load(&mut self, chunks: &[TextChunk]) -> Result<usize, IndexError> {
        let texts = chunks
            .iter()
            .map(|chunk| chunk.text.clone())
            .collect::<Vec<_>>();

        let embeddings = if texts.is_empty() {
            Vec::new()
        } else {
            self.embedder.embed_batch(&texts).await?
        };

        if let Some(actual) = embeddings
            .iter()
            .map(Vec::len)
            .find(|len| *len != self.embedder.dimensions())
        {
            return Err(IndexError::DimensionMismatch {
                expected: self.embedder.dimensions(),
                actual,
            });
        }

        self.collection.upsert(chunks, &embeddings).await?;
        self.collection.persist().await?;
        self.built = true;

        info!(
            chunk_count = chunks.len(),
            model = self.embedder.model_name(),
            "loaded chunks into vector index"
        );
        Ok(chunks.len())
    }

    pub async fn query(&self, topic: &str, k: usize) -> Result<Vec<SearchHit>, IndexError> {
        if !self.built {
            return Err(IndexError::NotBuilt);
        }

        let query_vector = self.embedder.embed(topic).await?;
        let hits = self.collection.search(&query_vector, k).await?;
        debug!(topic, k, hits = hits.len(), "vector query");
        Ok(hits)
    }

    pub async fn top_match(&self, topic: &str) -> Result<Option<SearchHit>, IndexError> {
        Ok(self.query(topic, 1).await?.into_iter().next())
    }
}

#[async_trait]
impl<E: Embedder, C: Collection> Retriever for VectorIndex<E, C> {
    async fn retrieve(&self, topic: &str, k: usize) -> Result<Vec<SearchHit>, IndexError> {
        self.query(topic, k).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::{chunk_pages, ChunkingConfig};
    use crate::collection::LocalCollection;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::models::DocumentPage;
    use chrono::Utc;
    use tempfile::tempdir;

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        fn model_name(&self) -> &str {
            "failing"
        }

        fn dimensions(&self) -> usize {
            8
        }

        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError> {
            Err(IndexError::Embedding("quota exhausted".to_string()))
        }
    }

    fn chunk(id: &str, text: &str) -> TextChunk {
        TextChunk {
            chunk_id: id.to_string(),
            source: "local".to_string(),
            page: 1,
            chunk_index: 0,
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn query_before_load_is_not_built() -> Result<(), IndexError> {
        let index = VectorIndex::open(CharacterNgramEmbedder::default(), LocalCollection::in_memory()).await?;
        assert!(!index.is_built());
        assert!(matches!(index.query("rust", 3).await, Err(IndexError::NotBuilt)));
        Ok(())
    }

    #[tokio::test]
    async fn empty_load_yields_empty_results() -> Result<(), IndexError> {
        let mut index = VectorIndex::open(CharacterNgramEmbedder::default(), LocalCollection::in_memory()).await?;
        index.load(&[]).await?;

        assert!(index.query("rust", 3).await?.is_empty());
        assert!(index.top_match("rust").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn query_returns_most_similar_chunk_first() -> Result<(), IndexError> {
        let mut index = VectorIndex::open(CharacterNgramEmbedder::default(), LocalCollection::in_memory()).await?;
        index
            .load(&[
                chunk("a", "photosynthesis converts light into chemical energy"),
                chunk("b", "the french revolution began in 1789"),
            ])
            .await?;

        let hits = index.query("photosynthesis light energy", 2).await?;
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.chunk_id, "a");
        assert!(hits[0].score >= hits[1].score);
        Ok(())
    }

    #[tokio::test]
    async fn embedding_failures_propagate() -> Result<(), IndexError> {
        let mut index = VectorIndex::open(FailingEmbedder, LocalCollection::in_memory()).await?;
        let result = index.load(&[chunk("a", "text")]).await;

        assert!(matches!(result, Err(IndexError::Embedding(_))));
        assert!(!index.is_built());
        Ok(())
    }

    #[tokio::test]
    async fn reopened_persisted_index_is_built() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let embedder = CharacterNgramEmbedder::default();

        let mut index = VectorIndex::open(embedder, LocalCollection::open(dir.path()).await?).await?;
        index.load(&[chunk("a", "mitochondria are the powerhouse of the cell")]).await?;

        let reopened = VectorIndex::open(embedder, LocalCollection::open(dir.path()).await?).await?;
        assert!(reopened.is_built());
        let best = reopened.top_match("powerhouse of the cell").await?;
        assert_eq!(best.map(|hit| hit.chunk.chunk_id), Some("a".to_string()));
        Ok(())
    }

    fn page(source: &str, text: &str) -> DocumentPage {
        DocumentPage {
            source: source.to_string(),
            page: 1,
            text: text.to_string(),
            checksum: "sum".to_string(),
            ingested_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn reingesting_a_file_does_not_duplicate_chunks() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let embedder = CharacterNgramEmbedder::default();
        let config = ChunkingConfig::default();

        let mut index = VectorIndex::open(embedder, LocalCollection::open(dir.path()).await?).await?;
        index
            .load(&chunk_pages(&[page("a.pdf", "alpha text"), page("b.pdf", "beta text")], &config)?)
            .await?;

        let mut reopened = VectorIndex::open(embedder, LocalCollection::open(dir.path()).await?).await?;
        reopened.load(&chunk_pages(&[page("b.pdf", "beta text")], &config)?).await?;

        assert_eq!(reopened.collection().count().await?, 2);
        let beta_hits = reopened
            .query("beta text", 5)
            .await?
            .into_iter()
            .filter(|hit| hit.chunk.text == "beta text")
            .count();
        assert_eq!(beta_hits, 1);
        Ok(())
    }

    #[tokio::test]
    async fn reopening_with_another_embedder_is_a_dimension_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;

        let mut index = VectorIndex::open(
            CharacterNgramEmbedder::default(),
            LocalCollection::open(dir.path()).await?,
        )
        .await?;
        index.load(&[chunk("a", "osmosis moves water")]).await?;

        let narrow = VectorIndex::open(
            CharacterNgramEmbedder { dimensions: 32 },
            LocalCollection::open(dir.path()).await?,
        )
        .await?;
        assert!(matches!(
            narrow.query("osmosis", 1).await,
            Err(IndexError::DimensionMismatch { actual: 32, .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn empty_load_stays_built_after_reopen() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let embedder = CharacterNgramEmbedder::default();

        let mut index = VectorIndex::open(embedder, LocalCollection::open(dir.path()).await?).await?;
        index.load(&[]).await?;

        let reopened = VectorIndex::open(embedder, LocalCollection::open(dir.path()).await?).await?;
        assert!(reopened.is_built());
        assert!(reopened.query("anything", 3).await?.is_empty());
        Ok(())
    }
}
