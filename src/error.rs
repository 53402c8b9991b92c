use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Failures of the article feed: the cache flow, its store and its upstream.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Upstream news provider error: {0}")]
    Upstream(String),

    /// Unique constraint hit on insert. Recovered inside the cache, never surfaced.
    #[error("Duplicate record: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Persistence(#[from] sqlx::Error),
}

impl FeedError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, FeedError::Conflict(_))
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(err: reqwest::Error) -> Self {
        FeedError::Upstream(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FeedError>;

/// Maps unique-constraint violations to [`FeedError::Conflict`], anything else
/// to [`FeedError::Persistence`].
pub(crate) fn conflict_or_persistence(err: sqlx::Error, what: &str) -> FeedError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            FeedError::Conflict(what.to_string())
        }
        _ => FeedError::Persistence(err),
    }
}

/// Errors returned by the HTTP handlers, rendered as `{"error": ..}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    /// Query string or body the extractors could not accept.
    #[error("{message}")]
    Rejected { status: StatusCode, message: String },

    #[error("Failed to {action}")]
    Failed {
        action: &'static str,
        #[source]
        source: FeedError,
    },
}

impl ApiError {
    /// Wraps a feed failure; validation and conflict errors stay client errors.
    pub fn failed(action: &'static str, err: FeedError) -> Self {
        match err {
            FeedError::Validation(msg) => ApiError::BadRequest(msg),
            FeedError::Conflict(msg) => ApiError::BadRequest(msg),
            source => ApiError::Failed { action, source },
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Rejected {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Rejected {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Rejected { status, .. } => *status,
            ApiError::Failed { source, .. } => {
                error!("{}: {}", self, source);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let payload = Json(json!({"error": self.to_string()}));

        (status, payload).into_response()
    }
}
