pub mod bank;
pub mod chunking;
pub mod collection;
pub mod documents;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod generator;
pub mod index;
pub mod llm;
pub mod models;
pub mod prompt;
pub mod session;
pub mod traits;

pub use bank::{BankExport, QuestionBank};
pub use chunking::{chunk_pages, normalize_whitespace, split_text, ChunkingConfig};
pub use collection::{Collection, LocalCollection, QdrantCollection};
pub use documents::{discover_pdf_files, DocumentStore, IngestionReport, SkippedFile};
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, EmbeddingConfig, VertexEmbedder,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{IndexError, IngestError, LlmError, QuizError, Rejection};
pub use extractor::{LopdfExtractor, PageText, PdfExtractor};
pub use generator::{
    GenerationOutcome, GenerationPolicy, QuestionGenerator, RawAttempt, DEFAULT_TOPIC,
    MAX_QUESTIONS,
};
pub use index::VectorIndex;
pub use llm::{GeminiClient, LlmConfig};
pub use models::{Choice, ChoiceKey, DocumentPage, QuizQuestion, SearchHit, TextChunk};
pub use session::{Direction, QuizSession, ScoreSummary, SubmissionFeedback};
pub use traits::{LanguageModel, Retriever};
