use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const BANK_VERSION: u32 = 2;
pub const DEFAULT_DOMAIN: &str = "General";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Question {
    pub id: String,
    pub question: String,
    pub choices: Vec<String>,
    pub correct_answers: Vec<usize>,
    #[serde(default)]
    pub explanation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Group {
    pub id: String,
    pub domain: String,
    #[serde(default)]
    pub context: String,
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Bank {
    pub version: u32,
    pub groups: Vec<Group>,
}

impl Default for Bank {
    fn default() -> Self {
        Self {
            version: BANK_VERSION,
            groups: Vec::new(),
        }
    }
}

impl Bank {
    pub fn question_count(&self) -> usize {
        self.groups.iter().map(|g| g.questions.len()).sum()
    }
}

/// A question with its group's fields denormalized onto it, as listed and
/// served to practice tests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FlatQuestion {
    #[serde(flatten)]
    pub question: Question,
    pub domain: String,
    pub group_id: String,
    pub group_context: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WrongAnswerEntry {
    pub question_id: String,
    pub wrong_count: u32,
    pub last_attempt: NaiveDateTime,
    #[serde(default)]
    pub last_answer: Vec<usize>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TestMode {
    Standard,
    Review,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PracticeTest {
    pub questions: Vec<FlatQuestion>,
    pub created_at: NaiveDateTime,
    pub mode: TestMode,
}

/// What the test taker sees: no answers, no explanation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestQuestionView {
    pub id: String,
    pub question: String,
    pub choices: Vec<String>,
    pub domain: String,
    pub group_context: String,
    pub multi_select: bool,
}

impl From<&FlatQuestion> for TestQuestionView {
    fn from(q: &FlatQuestion) -> Self {
        Self {
            id: q.question.id.clone(),
            question: q.question.question.clone(),
            choices: q.question.choices.clone(),
            domain: q.domain.clone(),
            group_context: q.group_context.clone(),
            multi_select: q.question.correct_answers.len() > 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionResult {
    pub question: FlatQuestion,
    pub selected: Vec<usize>,
    pub is_correct: bool,
    pub correct_answers: Vec<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub results: Vec<QuestionResult>,
    pub score: f64,
    pub correct_count: usize,
    pub total_questions: usize,
    pub mode: TestMode,
}

/// Submitted indices, deduplicated, sorted and limited to valid positions.
pub fn normalize_selection(question: &Question, submitted: &[usize]) -> Vec<usize> {
    submitted
        .iter()
        .copied()
        .filter(|idx| *idx < question.choices.len())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn score_answer(question: &Question, selected: &[usize]) -> bool {
    let expected: BTreeSet<_> = question.correct_answers.iter().collect();
    let actual: BTreeSet<_> = selected.iter().collect();
    !expected.is_empty() && expected == actual
}

pub fn score_percent(correct: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        ((correct as f64) * 100.0 / (total as f64) * 100.0).round() / 100.0
    }
}
