//! Prompt template and the structured output contract for one quiz question.

use crate::error::Rejection;
use crate::models::{Choice, ChoiceKey, QuizQuestion, SearchHit};
use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Shape the model is asked to return. Every field defaults so that a partial
/// response still deserializes and is rejected by validation instead.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct QuestionContract {
    /// The quiz question.
    #[serde(default)]
    pub question: String,
    /// Exactly four multiple choice options keyed A, B, C and D.
    #[serde(default)]
    pub choices: ContractChoices,
    /// The key of the correct choice.
    #[serde(default)]
    pub answer: String,
    /// Why the correct answer is right.
    #[serde(default)]
    pub explanation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum ContractChoices {
    Listed(Vec<ContractChoice>),
    Keyed(BTreeMap<String, String>),
}

impl Default for ContractChoices {
    fn default() -> Self {
        ContractChoices::Listed(Vec::new())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ContractChoice {
    pub key: String,
    pub value: String,
}

pub fn output_schema() -> Value {
    serde_json::to_value(schema_for!(QuestionContract)).unwrap_or_default()
}

const TEMPLATE: &str = r#"You are a subject matter expert on the topic: {topic}

Follow the instructions to create a quiz question:
1. Generate a question based on the topic provided and the context below.
2. Provide 4 multiple choice answers.
3. Specify the correct answer.
4. Explain why the correct answer is right.

Return a single JSON object matching this schema:
```json
{schema}
```

The choices must be returned in this format:
[
    {"key": "A", "value": "<choice A>"},
    {"key": "B", "value": "<choice B>"},
    {"key": "C", "value": "<choice C>"},
    {"key": "D", "value": "<choice D>"}
]

The answer must refer to the key from the choices list.

Context: {context}
"#;

pub fn render_prompt(topic: &str, context: &[SearchHit], schema: &Value) -> String {
    let context = context
        .iter()
        .map(|hit| hit.chunk.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    let schema = serde_json::to_string_pretty(schema).unwrap_or_default();

    TEMPLATE
        .replace("{topic}", topic)
        .replace("{schema}", &schema)
        .replace("{context}", &context)
}

impl QuestionContract {
    pub fn from_value(raw: &Value) -> Result<Self, Rejection> {
        serde_json::from_value(raw.clone()).map_err(|error| Rejection::Malformed(error.to_string()))
    }

    /// Checks field completeness and converts into a typed question. Novelty
    /// is checked separately by the question bank.
    pub fn into_question(self) -> Result<QuizQuestion, Rejection> {
        if self.question.trim().is_empty() {
            return Err(Rejection::EmptyQuestion);
        }

        let choices = normalize_choices(self.choices)?;
        let answer = resolve_answer(&self.answer, &choices)?;

        Ok(QuizQuestion {
            question: self.question,
            choices,
            answer,
            explanation: self.explanation,
        })
    }
}

fn normalize_choices(raw: ContractChoices) -> Result<Vec<Choice>, Rejection> {
    let pairs = match raw {
        ContractChoices::Listed(listed) => listed
            .into_iter()
            .map(|choice| (choice.key, choice.value))
            .collect::<Vec<_>>(),
        ContractChoices::Keyed(keyed) => keyed.into_iter().collect(),
    };

    if pairs.len() != ChoiceKey::ALL.len() {
        return Err(Rejection::Malformed(format!(
            "expected 4 choices, got {}",
            pairs.len()
        )));
    }

    let mut by_key = BTreeMap::new();
    for (key, value) in pairs {
        let key = key.parse::<ChoiceKey>().map_err(Rejection::Malformed)?;
        if by_key.insert(key, value).is_some() {
            return Err(Rejection::Malformed(format!("choice {key} appears twice")));
        }
    }

    Ok(by_key
        .into_iter()
        .map(|(key, value)| Choice { key, value })
        .collect())
}

fn resolve_answer(answer: &str, choices: &[Choice]) -> Result<ChoiceKey, Rejection> {
    let trimmed = answer.trim();
    if let Ok(key) = trimmed.parse::<ChoiceKey>() {
        return Ok(key);
    }

    // "B) Rome" or "B. Rome"
    let mut chars = trimmed.chars();
    if let (Some(letter), Some(')' | '.' | ':')) = (chars.next(), chars.next()) {
        if let Ok(key) = letter.to_string().parse::<ChoiceKey>() {
            return Ok(key);
        }
    }

    choices
        .iter()
        .find(|choice| choice.value.trim() == trimmed)
        .map(|choice| choice.key)
        .ok_or_else(|| Rejection::Malformed(format!("answer {trimmed:?} is not a choice key")))
}
