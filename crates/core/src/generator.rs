//! Retrieval-grounded question generation.
//!
//! Each question slot is filled by a bounded retry loop: retrieve context for
//! the topic, ask the model for one question, validate it, and either accept
//! it into the bank or wait out the cooldown and try again. Slots run one
//! after another so the uniqueness check always sees every accepted question
//! and the model API is never hit concurrently.
//!
//! Only validation failures are retried. Retrieval and model errors abort the
//! run immediately.

use crate::bank::QuestionBank;
use crate::error::{QuizError, Rejection};
use crate::models::QuizQuestion;
use crate::prompt::{output_schema, render_prompt, QuestionContract};
use crate::traits::{LanguageModel, Retriever};
use serde_json::Value;
use std::time::Duration;
use tracing::{info, instrument, warn};

pub const DEFAULT_TOPIC: &str = "General Knowledge";
pub const MAX_QUESTIONS: usize = 10;

#[derive(Debug, Clone)]
pub struct GenerationPolicy {
    pub max_attempts: usize,
    /// Pause after a discarded attempt, sized to the model API's rate limit.
    pub cooldown: Duration,
    /// Passages retrieved as grounding for each attempt.
    pub context_k: usize,
}

impl Default for GenerationPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            cooldown: Duration::from_secs(20),
            context_k: 4,
        }
    }
}

impl GenerationPolicy {
    fn validate(&self) -> Result<(), QuizError> {
        if self.max_attempts == 0 {
            return Err(QuizError::Configuration(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// One model response, recorded whether or not it was accepted.
#[derive(Debug, Clone)]
pub struct RawAttempt {
    pub slot: usize,
    pub attempt: usize,
    pub response: Value,
    pub rejection: Option<Rejection>,
}

#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub topic: String,
    pub requested: usize,
    pub bank: QuestionBank,
    pub raw_responses: Vec<RawAttempt>,
    /// Slots that used every attempt without producing an acceptable question.
    pub exhausted_slots: Vec<usize>,
}

impl GenerationOutcome {
    pub fn is_complete(&self) -> bool {
        self.exhausted_slots.is_empty()
    }

    pub fn require_complete(self) -> Result<QuestionBank, QuizError> {
        if self.is_complete() {
            return Ok(self.bank);
        }
        Err(QuizError::Exhausted {
            filled: self.bank.len(),
            requested: self.requested,
            exhausted_slots: self.exhausted_slots,
        })
    }
}

pub fn validate_count(count: usize) -> Result<usize, QuizError> {
    if count == 0 || count > MAX_QUESTIONS {
        return Err(QuizError::Configuration(format!(
            "number of questions must be between 1 and {MAX_QUESTIONS}, got {count}"
        )));
    }
    Ok(count)
}

/// Substitutes the default topic for a blank one; any other topic is kept
/// verbatim.
pub fn effective_topic(topic: &str) -> String {
    if topic.trim().is_empty() {
        DEFAULT_TOPIC.to_string()
    } else {
        topic.to_string()
    }
}

/// Parses a raw model response and checks it against the bank.
pub fn validate_question(bank: &QuestionBank, raw: &Value) -> Result<QuizQuestion, Rejection> {
    let question = QuestionContract::from_value(raw)?.into_question()?;
    bank.check_novel(&question)?;
    Ok(question)
}

pub struct QuestionGenerator<R: Retriever, M: LanguageModel> {
    topic: String,
    count: usize,
    retriever: R,
    model: M,
    policy: GenerationPolicy,
    schema: Value,
}

impl<R: Retriever, M: LanguageModel> QuestionGenerator<R, M> {
    pub fn new(topic: &str, count: usize, retriever: R, model: M) -> Result<Self, QuizError> {
        Ok(Self {
            topic: effective_topic(topic),
            count: validate_count(count)?,
            retriever,
            model,
            policy: GenerationPolicy::default(),
            schema: output_schema(),
        })
    }

    pub fn with_policy(mut self, policy: GenerationPolicy) -> Result<Self, QuizError> {
        policy.validate()?;
        self.policy = policy;
        Ok(self)
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn policy(&self) -> &GenerationPolicy {
        &self.policy
    }

    /// Generates the configured number of questions.
    pub async fn generate_quiz(&self) -> Result<GenerationOutcome, QuizError> {
        self.generate(self.count).await
    }

    #[instrument(skip(self), fields(topic = %self.topic))]
    pub async fn generate(&self, count: usize) -> Result<GenerationOutcome, QuizError> {
        let count = validate_count(count)?;
        let mut bank = QuestionBank::new();
        let mut raw_responses = Vec::new();
        let mut exhausted_slots = Vec::new();

        for slot in 0..count {
            let accepted = self.fill_slot(slot, &mut bank, &mut raw_responses).await?;
            if !accepted {
                warn!(
                    slot,
                    attempts = self.policy.max_attempts,
                    "no acceptable question for slot; continuing with a shorter quiz"
                );
                exhausted_slots.push(slot);
            }
        }

        info!(
            requested = count,
            generated = bank.len(),
            attempts = raw_responses.len(),
            "quiz generation finished"
        );

        Ok(GenerationOutcome {
            topic: self.topic.clone(),
            requested: count,
            bank,
            raw_responses,
            exhausted_slots,
        })
    }

    async fn fill_slot(
        &self,
        slot: usize,
        bank: &mut QuestionBank,
        raw_responses: &mut Vec<RawAttempt>,
    ) -> Result<bool, QuizError> {
        for attempt in 1..=self.policy.max_attempts {
            let context = self
                .retriever
                .retrieve(&self.topic, self.policy.context_k)
                .await?;
            let prompt = render_prompt(&self.topic, &context, &self.schema);
            let response = self.model.complete_structured(&prompt, &self.schema).await?;

            let verdict = validate_question(bank, &response).and_then(|question| bank.try_push(question));

            raw_responses.push(RawAttempt {
                slot,
                attempt,
                response,
                rejection: verdict.clone().err(),
            });

            match verdict {
                Ok(()) => {
                    info!(slot, attempt, "accepted unique question");
                    return Ok(true);
                }
                Err(reason) => {
                    warn!(slot, attempt, %reason, "discarded generated question");
                    if attempt < self.policy.max_attempts && !self.policy.cooldown.is_zero() {
                        tokio::time::sleep(self.policy.cooldown).await;
                    }
                }
            }
        }

        Ok(false)
    }
}
