use crate::bank::QuestionBank;
use crate::error::QuizError;
use crate::models::{ChoiceKey, QuizQuestion};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionFeedback {
    pub index: usize,
    pub correct: bool,
    pub correct_answer: ChoiceKey,
    pub explanation: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreSummary {
    pub total: usize,
    pub answered: usize,
    pub correct: usize,
}

/// Navigation and answer state for one pass over a question bank.
///
/// Indices wrap in both directions, so navigation never fails. Answers are the
/// displayed choice strings (`"A) ..."`); grading checks the answer key prefix.
/// Not synchronised: callers sharing a session across handlers must wrap it
/// in a single mutex.
#[derive(Debug, Clone)]
pub struct QuizSession {
    questions: Vec<QuizQuestion>,
    current_index: usize,
    selected: HashMap<usize, String>,
    submitted: HashMap<usize, String>,
    is_submitting: bool,
}

impl QuizSession {
    pub fn new(bank: QuestionBank) -> Result<Self, QuizError> {
        Self::from_questions(bank.into_questions())
    }

    pub fn from_questions(questions: Vec<QuizQuestion>) -> Result<Self, QuizError> {
        if questions.is_empty() {
            return Err(QuizError::EmptyBank);
        }
        Ok(Self {
            questions,
            current_index: 0,
            selected: HashMap::new(),
            submitted: HashMap::new(),
            is_submitting: false,
        })
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    /// Always false; a session cannot be built from an empty bank.
    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    fn wrap(&self, index: usize) -> usize {
        index % self.questions.len()
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn current_question(&self) -> &QuizQuestion {
        &self.questions[self.current_index]
    }

    pub fn question_at(&self, index: usize) -> &QuizQuestion {
        &self.questions[self.wrap(index)]
    }

    pub fn next(&mut self, direction: Direction) -> usize {
        let len = self.questions.len();
        self.current_index = match direction {
            Direction::Forward => (self.current_index + 1) % len,
            Direction::Backward => (self.current_index + len - 1) % len,
        };
        debug!(index = self.current_index, ?direction, "moved to question");
        self.current_index
    }

    /// Highlights a choice without locking it in.
    pub fn select(&mut self, index: usize, choice: impl Into<String>) {
        let index = self.wrap(index);
        self.selected.insert(index, choice.into());
    }

    /// Current highlight for `index`, falling back to the submitted answer.
    pub fn selected(&self, index: usize) -> Option<&str> {
        let index = self.wrap(index);
        self.selected
            .get(&index)
            .or_else(|| self.submitted.get(&index))
            .map(String::as_str)
    }

    pub fn submitted(&self, index: usize) -> Option<&str> {
        self.submitted.get(&self.wrap(index)).map(String::as_str)
    }

    /// Records `choice` as the answer for `index` and grades it. A later call
    /// for the same index overwrites the earlier answer.
    pub fn submit(&mut self, index: usize, choice: impl Into<String>) -> SubmissionFeedback {
        let index = self.wrap(index);
        let choice = choice.into();
        let feedback = self.grade(index, &choice);
        self.submitted.insert(index, choice);
        feedback
    }

    /// Feedback for a previously submitted answer.
    pub fn feedback(&self, index: usize) -> Option<SubmissionFeedback> {
        let index = self.wrap(index);
        self.submitted
            .get(&index)
            .map(|choice| self.grade(index, choice))
    }

    fn grade(&self, index: usize, choice: &str) -> SubmissionFeedback {
        let question = &self.questions[index];
        SubmissionFeedback {
            index,
            correct: question.is_correct(choice),
            correct_answer: question.answer,
            explanation: question.explanation.clone(),
        }
    }

    pub fn is_submitting(&self) -> bool {
        self.is_submitting
    }

    pub fn begin_submission(&mut self) -> Result<(), QuizError> {
        if self.is_submitting {
            return Err(QuizError::SubmissionInProgress);
        }
        self.is_submitting = true;
        Ok(())
    }

    pub fn end_submission(&mut self) {
        self.is_submitting = false;
    }

    /// Grades the current question and moves forward, holding the submission
    /// lock for the duration.
    pub fn submit_and_advance(
        &mut self,
        choice: impl Into<String>,
    ) -> Result<SubmissionFeedback, QuizError> {
        self.begin_submission()?;
        let feedback = self.submit(self.current_index, choice);
        self.next(Direction::Forward);
        self.end_submission();
        Ok(feedback)
    }

    pub fn score(&self) -> ScoreSummary {
        let correct = self
            .submitted
            .iter()
            .filter(|(index, choice)| self.questions[**index].is_correct(choice))
            .count();

        ScoreSummary {
            total: self.questions.len(),
            answered: self.submitted.len(),
            correct,
        }
    }
}
