use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::applications::service::ApplicationError;
use crate::applications::store::StoreError;
use crate::media::MediaError;
use crate::pipeline::{AnswerFailure, PipelineError};
use crate::storage::StorageError;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Illegal transition: {0}")]
    IllegalTransition(String),

    #[error("Empty answer set")]
    EmptyAnswerSet,

    #[error("Expected {expected} answers, got {actual}")]
    AnswerCountMismatch { expected: usize, actual: usize },

    #[error("{0}")]
    Answer(#[from] AnswerFailure),

    #[error("Database error: {0}")]
    Database(#[from] StoreError),

    #[error("S3 error: {0}")]
    S3(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<ApplicationError> for AppError {
    fn from(e: ApplicationError) -> Self {
        match e {
            ApplicationError::EmptyAnswerSet(_) => AppError::EmptyAnswerSet,
            ApplicationError::AnswerCountMismatch { expected, actual } => {
                AppError::AnswerCountMismatch { expected, actual }
            }
            ApplicationError::InvalidAnswers(msg) => AppError::Validation(msg),
            ApplicationError::IllegalTransition(msg) => AppError::IllegalTransition(msg),
            ApplicationError::Unauthorized(msg) => AppError::Forbidden(msg),
            ApplicationError::NotFound(what) => AppError::NotFound(what),
            ApplicationError::Store(e) => AppError::Database(e),
        }
    }
}

impl From<StorageError> for AppError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(key) => AppError::NotFound(format!("video {key}")),
            StorageError::S3(msg) => AppError::S3(msg),
        }
    }
}

impl From<MultipartError> for AppError {
    fn from(e: MultipartError) -> Self {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return AppError::PayloadTooLarge(e.body_text());
        }
        AppError::Validation(format!("malformed multipart body: {e}"))
    }
}

/// Stable code and HTTP status for a failed answer.
fn answer_failure_code(failure: &AnswerFailure) -> (StatusCode, &'static str) {
    match &failure.error {
        PipelineError::Media(MediaError::InsufficientFrames { .. }) => {
            (StatusCode::UNPROCESSABLE_ENTITY, "INSUFFICIENT_FRAMES")
        }
        PipelineError::Media(MediaError::FrameReadError { .. }) => {
            (StatusCode::UNPROCESSABLE_ENTITY, "FRAME_READ_ERROR")
        }
        PipelineError::Media(_) => (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_MEDIA"),
        PipelineError::Transcription(_) => (StatusCode::INTERNAL_SERVER_ERROR, "TRANSCRIPTION_ERROR"),
        PipelineError::Embedding(_) => (StatusCode::INTERNAL_SERVER_ERROR, "EMBEDDING_ERROR"),
        PipelineError::Scoring(_) | PipelineError::Worker(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "SCORING_ERROR")
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut extra = Map::new();
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", format!("{msg} not found")),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone()),
            AppError::PayloadTooLarge(msg) => {
                (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE", msg.clone())
            }
            AppError::IllegalTransition(msg) => {
                (StatusCode::CONFLICT, "ILLEGAL_TRANSITION", msg.clone())
            }
            AppError::EmptyAnswerSet => (
                StatusCode::BAD_REQUEST,
                "EMPTY_ANSWER_SET",
                "At least one answer is required".to_string(),
            ),
            AppError::AnswerCountMismatch { .. } => {
                (StatusCode::BAD_REQUEST, "ANSWER_COUNT_MISMATCH", self.to_string())
            }
            AppError::Answer(failure) => {
                let (status, code) = answer_failure_code(failure);
                extra.insert("question_index".into(), json!(failure.question_index));
                extra.insert("stage".into(), json!(failure.stage));
                let message = if failure.is_media_fault() {
                    format!(
                        "Answer {} could not be processed, please re-upload: {}",
                        failure.question_index, failure.error
                    )
                } else {
                    tracing::error!("Scoring failure: {failure}");
                    format!("Answer {} could not be scored", failure.question_index)
                };
                (status, code, message)
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                )
            }
            AppError::S3(msg) => {
                tracing::error!("S3 error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "S3_ERROR",
                    "A storage error occurred".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let mut error = Map::new();
        error.insert("code".into(), json!(code));
        error.insert("message".into(), json!(message));
        error.extend(extra);

        let body = Json(json!({ "error": Value::Object(error) }));

        (status, body).into_response()
    }
}
