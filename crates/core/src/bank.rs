use crate::error::{QuizError, Rejection};
use crate::models::QuizQuestion;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

/// Ordered, append-only list of accepted questions. No two entries share the
/// same question text (exact, case-sensitive comparison).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuestionBank {
    questions: Vec<QuizQuestion>,
}

impl QuestionBank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    pub fn questions(&self) -> &[QuizQuestion] {
        &self.questions
    }

    pub fn get(&self, index: usize) -> Option<&QuizQuestion> {
        self.questions.get(index)
    }

    pub fn contains_question(&self, text: &str) -> bool {
        self.questions.iter().any(|existing| existing.question == text)
    }

    /// Rejects empty or already-present question text.
    pub fn check_novel(&self, question: &QuizQuestion) -> Result<(), Rejection> {
        if question.question.trim().is_empty() {
            return Err(Rejection::EmptyQuestion);
        }
        if self.contains_question(&question.question) {
            return Err(Rejection::Duplicate);
        }
        Ok(())
    }

    pub fn try_push(&mut self, question: QuizQuestion) -> Result<(), Rejection> {
        self.check_novel(&question)?;
        self.questions.push(question);
        Ok(())
    }

    pub fn into_questions(self) -> Vec<QuizQuestion> {
        self.questions
    }

    pub fn to_export(&self, topic: &str) -> BankExport {
        BankExport {
            topic: topic.to_string(),
            generated_at: Utc::now(),
            questions: self.questions.clone(),
        }
    }

    pub async fn save_json(&self, topic: &str, path: &Path) -> Result<(), QuizError> {
        let encoded = serde_json::to_vec_pretty(&self.to_export(topic))?;
        tokio::fs::write(path, encoded).await?;
        Ok(())
    }

    /// Loads an exported bank, dropping entries that would break the
    /// uniqueness rule.
    pub async fn load_json(path: &Path) -> Result<(String, Self), QuizError> {
        let raw = tokio::fs::read(path).await?;
        let export: BankExport = serde_json::from_slice(&raw)?;

        let mut bank = Self::new();
        for question in export.questions {
            if let Err(reason) = bank.try_push(question) {
                warn!(path = %path.display(), %reason, "dropped question from exported bank");
            }
        }
        Ok((export.topic, bank))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankExport {
    pub topic: String,
    pub generated_at: DateTime<Utc>,
    pub questions: Vec<QuizQuestion>,
}
