use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("vector index has not been built; load documents first")]
    NotBuilt,

    #[error("embedding service error: {0}")]
    Embedding(String),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("embedding dimension {actual} does not match {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("persistence error: {0}")]
    Persistence(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("model api returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("model returned no content")]
    EmptyResponse,

    #[error("model output is not a json object: {0}")]
    InvalidJson(String),
}

#[derive(Debug, Error)]
pub enum QuizError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("generated {filled} of {requested} questions; slots {exhausted_slots:?} ran out of attempts")]
    Exhausted {
        filled: usize,
        requested: usize,
        exhausted_slots: Vec<usize>,
    },

    #[error("a quiz session needs at least one question")]
    EmptyBank,

    #[error("an answer submission is already in progress")]
    SubmissionInProgress,

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a generated question was discarded. Never surfaced to callers; it only
/// drives the retry loop and the discard log.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("question text is missing or empty")]
    EmptyQuestion,

    #[error("question duplicates an accepted question")]
    Duplicate,

    #[error("malformed question: {0}")]
    Malformed(String),
}
