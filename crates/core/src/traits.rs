use crate::error::{IndexError, LlmError};
use crate::models::SearchHit;
use async_trait::async_trait;
use serde_json::Value;

/// Supplies grounding passages for a topic.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, topic: &str, k: usize) -> Result<Vec<SearchHit>, IndexError>;
}

/// Structured completion endpoint of a language model.
///
/// `schema` is a JSON schema the output must conform to. Implementations
/// return the parsed JSON object and leave field-level validation to the
/// caller.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete_structured(&self, prompt: &str, schema: &Value) -> Result<Value, LlmError>;
}
