use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Reasons an access code cannot be redeemed.
///
/// All of these are expected outcomes of a participant typing a code; they
/// are rendered as plain messages and never retried with the same code.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessError {
    /// No session carries this code.
    #[error("No session matches this access code")]
    NotFound,

    /// The session exists but has not been opened by the teacher yet.
    #[error("The session has not started yet")]
    NotStarted,

    /// The session was completed.
    #[error("The session has ended")]
    Ended,

    /// The session expired or was cancelled.
    #[error("The session is no longer available")]
    Unavailable,

    /// The session is past its end time and does not allow late entry.
    #[error("Late entry is not allowed for this session")]
    LateEntryDisallowed,
}

impl AccessError {
    /// Stable machine-readable code used in response bodies.
    pub fn code(&self) -> &'static str {
        match self {
            AccessError::NotFound => "not_found",
            AccessError::NotStarted => "not_started",
            AccessError::Ended => "ended",
            AccessError::Unavailable => "unavailable",
            AccessError::LateEntryDisallowed => "late_entry_disallowed",
        }
    }

    /// The message shown to the participant on the code-entry screen.
    pub fn user_message(&self) -> &'static str {
        match self {
            AccessError::NotFound => "Session not found. Please check your access key.",
            AccessError::NotStarted => "This session has not started yet. Please wait for your teacher.",
            AccessError::Ended => "This session has ended.",
            AccessError::Unavailable => "This session is no longer available.",
            AccessError::LateEntryDisallowed => "This session has ended and late entry is not allowed.",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AccessError::NotFound => StatusCode::NOT_FOUND,
            AccessError::NotStarted | AccessError::LateEntryDisallowed => StatusCode::FORBIDDEN,
            AccessError::Ended | AccessError::Unavailable => StatusCode::GONE,
        }
    }
}

/// Reasons a response submission (or update) is rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    /// The session disappeared between access and submission.
    #[error("Session not found")]
    SessionNotFound,

    /// A response already exists for this participant and session.
    #[error("A response has already been submitted for this session")]
    AlreadySubmitted,

    /// Required questions were left unanswered.
    #[error("Missing answers for required questions: {}", missing.join(", "))]
    IncompleteResponse { missing: Vec<String> },

    /// An answer does not fit its question.
    #[error("Invalid answer for question {question_id}: {reason}")]
    InvalidAnswer { question_id: String, reason: String },

    /// Update requested for a participant that never submitted.
    #[error("No response exists to update")]
    ResponseNotFound,
}

impl SubmitError {
    /// Stable machine-readable code used in response bodies.
    pub fn code(&self) -> &'static str {
        match self {
            SubmitError::SessionNotFound => "session_not_found",
            SubmitError::AlreadySubmitted => "already_submitted",
            SubmitError::IncompleteResponse { .. } => "incomplete_response",
            SubmitError::InvalidAnswer { .. } => "invalid_answer",
            SubmitError::ResponseNotFound => "response_not_found",
        }
    }

    /// The message shown to the participant.
    pub fn user_message(&self) -> String {
        match self {
            SubmitError::SessionNotFound => {
                "This session could not be found. It may have been removed.".to_string()
            }
            SubmitError::AlreadySubmitted => {
                "You have already submitted feedback for this session. Thank you!".to_string()
            }
            SubmitError::IncompleteResponse { .. } => {
                "Please answer all required questions before submitting.".to_string()
            }
            SubmitError::InvalidAnswer { .. } => {
                "One of your answers is not valid. Please review the form.".to_string()
            }
            SubmitError::ResponseNotFound => {
                "There is no earlier submission to update.".to_string()
            }
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            SubmitError::SessionNotFound | SubmitError::ResponseNotFound => StatusCode::NOT_FOUND,
            SubmitError::AlreadySubmitted => StatusCode::CONFLICT,
            SubmitError::IncompleteResponse { .. } | SubmitError::InvalidAnswer { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
        }
    }
}

/// The application's error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// A database error.
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// A connection pool error.
    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// A pool construction error.
    #[error("Pool creation error: {0}")]
    CreatePool(#[from] deadpool_postgres::CreatePoolError),

    /// A Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A row lacked a column or held an undecodable value.
    #[error("Missing data: {0}")]
    MissingData(String),

    /// The access code could not be redeemed.
    #[error(transparent)]
    Access(#[from] AccessError),

    /// The submission was rejected.
    #[error(transparent)]
    Submit(#[from] SubmitError),

    /// A validation error.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An internal server error.
    #[error("Internal server error: {0}")]
    Internal(String),

    /// A rate limit exceeded error.
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),
}

/// A `Result` type that uses `AppError` as the error type.
pub type Result<T> = std::result::Result<T, AppError>;

const TRY_AGAIN: &str = "Something went wrong while saving. Please try again.";

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::Database(ref e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::SERVICE_UNAVAILABLE, "storage_error", TRY_AGAIN.to_string())
            }

            AppError::Pool(ref e) => {
                tracing::error!("Pool error: {}", e);
                (StatusCode::SERVICE_UNAVAILABLE, "storage_error", TRY_AGAIN.to_string())
            }

            AppError::CreatePool(ref e) => {
                tracing::error!("Pool creation error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", TRY_AGAIN.to_string())
            }

            AppError::Redis(ref e) => {
                tracing::error!("Redis error: {}", e);
                (StatusCode::SERVICE_UNAVAILABLE, "cache_error", TRY_AGAIN.to_string())
            }

            AppError::MissingData(ref column) => {
                tracing::error!("Corrupted row, missing column: {}", column);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", TRY_AGAIN.to_string())
            }

            AppError::Access(ref e) => {
                tracing::debug!("Access denied: {}", e);
                (e.status(), e.code(), e.user_message().to_string())
            }

            AppError::Submit(ref e) => {
                tracing::debug!("Submission rejected: {}", e);
                (e.status(), e.code(), e.user_message())
            }

            AppError::Validation(ref msg) => {
                tracing::debug!("Validation error: {}", msg);
                (StatusCode::BAD_REQUEST, "validation_error", msg.clone())
            }

            AppError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", TRY_AGAIN.to_string())
            }

            AppError::RateLimitExceeded(ref msg) => {
                tracing::warn!("Rate limit exceeded: {}", msg);
                (StatusCode::TOO_MANY_REQUESTS, "rate_limited", msg.clone())
            }
        };

        let body = match &self {
            AppError::Submit(SubmitError::IncompleteResponse { missing }) => sonic_rs::json!({
                "error": code,
                "message": message,
                "missing": missing
            }),
            AppError::Submit(SubmitError::InvalidAnswer { question_id, .. }) => sonic_rs::json!({
                "error": code,
                "message": message,
                "question_id": question_id
            }),
            _ => sonic_rs::json!({
                "error": code,
                "message": message
            }),
        };

        let body = sonic_rs::to_string(&body)
            .unwrap_or_else(|_| r#"{"error":"internal_error"}"#.to_string());

        (status, [(http::header::CONTENT_TYPE, "application/json")], body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_never_leak_detail() {
        let response =
            AppError::MissingData("response_data".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn access_errors_map_to_distinct_statuses() {
        assert_eq!(AppError::from(AccessError::NotFound).into_response().status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::from(AccessError::NotStarted).into_response().status(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::from(AccessError::Ended).into_response().status(), StatusCode::GONE);
        assert_eq!(
            AppError::from(SubmitError::AlreadySubmitted).into_response().status(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn incomplete_response_names_missing_questions() {
        let err = SubmitError::IncompleteResponse {
            missing: vec!["q1".to_string(), "q3".to_string()],
        };
        assert_eq!(err.to_string(), "Missing answers for required questions: q1, q3");
    }
}
