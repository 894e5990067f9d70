use crate::domain::PortfolioError;
use crate::engine::PriceError;
use crate::orchestration::RecalculationError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Internal server error: {0}")]
    Internal(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<PriceError> for AppError {
    fn from(err: PriceError) -> Self {
        match err {
            PriceError::SameSymbols(_) => AppError::BadRequest(err.to_string()),
            PriceError::NotFound { .. } => AppError::NotFound(err.to_string()),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<RecalculationError> for AppError {
    fn from(err: RecalculationError) -> Self {
        match err {
            RecalculationError::NotFound(_) => AppError::NotFound(err.to_string()),
            RecalculationError::AlreadyExists(_) => AppError::Conflict(err.to_string()),
            RecalculationError::Portfolio(
                PortfolioError::DuplicateTransaction(_) | PortfolioError::DuplicateReference { .. },
            ) => AppError::Conflict(err.to_string()),
            RecalculationError::Portfolio(_) => AppError::BadRequest(err.to_string()),
            RecalculationError::Processing(_) => AppError::Conflict(err.to_string()),
            RecalculationError::Price(e) => e.into(),
            RecalculationError::Storage(e) => e.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}
