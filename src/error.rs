use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Why one question failed strict normalization.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("question must be a JSON object")]
    NotAnObject,
    #[error("question text is required")]
    MissingText,
    #[error("choices must be a list with at least two options")]
    TooFewChoices,
    #[error("at least one correct answer is required")]
    NoCorrectAnswer,
}

impl ValidationError {
    pub fn field(&self) -> &'static str {
        match self {
            Self::NotAnObject => "question",
            Self::MissingText => "question",
            Self::TooFewChoices => "choices",
            Self::NoCorrectAnswer => "correct_answers",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TranscriptError {
    #[error("no answer section found (expected a heading such as \"Answers\" or \"答案\")")]
    MissingAnswerSection,
    #[error("no numbered questions found before the answer section")]
    NoQuestions,
    #[error("question {number} has no text")]
    EmptyQuestion { number: u32 },
    #[error("question {number} needs at least two choices, found {found}")]
    TooFewChoices { number: u32, found: usize },
    #[error("question {number} lists choice {letter} more than once")]
    DuplicateChoice { number: u32, letter: char },
    #[error("question number {number} appears more than once")]
    DuplicateQuestion { number: u32 },
    #[error("answer key lists question {number} more than once")]
    DuplicateAnswer { number: u32 },
    #[error("answer key has no entry for question {number}")]
    MissingAnswer { number: u32 },
    #[error("answer {letter} is not a choice of question {number}")]
    InvalidAnswerLetter { number: u32, letter: char },
    #[error("no answer letter could be read for question {number}")]
    NoAnswerLetters { number: u32 },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to write {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize document: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("unsupported format: expected a list of questions or an object with groups or questions")]
    UnrecognizedFormat,
    #[error(transparent)]
    Transcript(#[from] TranscriptError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    pub field: String,
    pub issue: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: ErrorPayload,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<ErrorDetail>,
    pub request_id: String,
}

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub details: Vec<ErrorDetail>,
    pub request_id: String,
}

impl AppError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: Vec::new(),
            request_id: request_id.into(),
        }
    }

    pub fn with_details(mut self, details: Vec<ErrorDetail>) -> Self {
        self.details = details;
        self
    }

    pub fn not_found(what: &str, request_id: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", format!("{what} not found"), request_id)
    }

    pub fn validation(err: &ValidationError, request_id: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", err.to_string(), request_id).with_details(vec![
            ErrorDetail {
                field: err.field().to_string(),
                issue: err.to_string(),
            },
        ])
    }

    pub fn store(err: &StoreError, request_id: impl Into<String>) -> Self {
        tracing::error!("bank write failed: {}", err);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", "failed to save data", request_id)
    }

    pub fn import(err: ImportError, request_id: impl Into<String>) -> Self {
        match err {
            ImportError::UnrecognizedFormat => {
                Self::new(StatusCode::BAD_REQUEST, "FORMAT_ERROR", err.to_string(), request_id)
            }
            ImportError::Transcript(inner) => Self::transcript(&inner, request_id),
            ImportError::Store(inner) => Self::store(&inner, request_id),
        }
    }

    pub fn transcript(err: &TranscriptError, request_id: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "TRANSCRIPT_ERROR", err.to_string(), request_id)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let payload = ErrorBody {
            error: ErrorPayload {
                code: self.code,
                message: self.message,
                details: self.details,
                request_id: self.request_id,
            },
        };
        (self.status, Json(payload)).into_response()
    }
}
